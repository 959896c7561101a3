//! In-process append-only frame store.

use crate::source::types::{RawFrame, StreamId};
use crate::source::{FrameSource, SourceError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct StreamLists {
    frames: Vec<RawFrame>,
    comments: Vec<String>,
}

/// Thread-safe store with one frame list and one annotation list per stream.
#[derive(Debug, Default)]
pub struct MemoryFrameStore {
    lists: RwLock<HashMap<StreamId, StreamLists>>,
    offline: AtomicBool,
}

impl MemoryFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame and return the new length of the stream's list.
    pub fn push_frame(&self, stream: &StreamId, frame: impl Into<RawFrame>) -> usize {
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        let entry = lists.entry(stream.clone()).or_default();
        entry.frames.push(frame.into());
        entry.frames.len()
    }

    /// Append several frames in order.
    pub fn push_frames<I, F>(&self, stream: &StreamId, frames: I) -> usize
    where
        I: IntoIterator<Item = F>,
        F: Into<RawFrame>,
    {
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        let entry = lists.entry(stream.clone()).or_default();
        entry.frames.extend(frames.into_iter().map(Into::into));
        entry.frames.len()
    }

    /// Append a raw annotation entry (`<unix-seconds>$<message>`).
    pub fn push_comment(&self, stream: &StreamId, comment: impl Into<String>) -> usize {
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        let entry = lists.entry(stream.clone()).or_default();
        entry.comments.push(comment.into());
        entry.comments.len()
    }

    /// Number of frames stored for a stream.
    pub fn frame_count(&self, stream: &StreamId) -> usize {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        lists.get(stream).map(|l| l.frames.len()).unwrap_or(0)
    }

    /// Simulate losing the connection to the store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), SourceError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(SourceError::Unavailable("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

impl FrameSource for MemoryFrameStore {
    fn frames_since(&self, stream: &StreamId, cursor: u64) -> Result<Vec<RawFrame>, SourceError> {
        self.check_online()?;
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        Ok(lists
            .get(stream)
            .map(|l| l.frames.iter().skip(cursor as usize).cloned().collect())
            .unwrap_or_default())
    }

    fn annotations(&self, stream: &StreamId, limit: usize) -> Result<Vec<String>, SourceError> {
        self.check_online()?;
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        Ok(lists
            .get(stream)
            .map(|l| {
                let start = l.comments.len().saturating_sub(limit);
                l.comments[start..].to_vec()
            })
            .unwrap_or_default())
    }

    fn streams(&self) -> Result<Vec<StreamId>, SourceError> {
        self.check_online()?;
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<StreamId> = lists.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_reads_only_new_frames() {
        let store = MemoryFrameStore::new();
        let id = StreamId::new("PEPI", "1");
        store.push_frames(&id, ["a", "b", "c"]);

        assert_eq!(store.frames_since(&id, 0).unwrap().len(), 3);
        assert_eq!(store.frames_since(&id, 2).unwrap(), vec!["c".to_string()]);
        assert!(store.frames_since(&id, 3).unwrap().is_empty());
        assert!(store.frames_since(&id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_stream_is_empty() {
        let store = MemoryFrameStore::new();
        let id = StreamId::new("PEPI", "nobody");
        assert!(store.frames_since(&id, 0).unwrap().is_empty());
        assert!(store.annotations(&id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_annotations_keep_latest() {
        let store = MemoryFrameStore::new();
        let id = StreamId::new("PEPI", "1");
        for i in 0..15 {
            store.push_comment(&id, format!("{i}$note {i}"));
        }
        let latest = store.annotations(&id, 10).unwrap();
        assert_eq!(latest.len(), 10);
        assert_eq!(latest[0], "5$note 5");
        assert_eq!(latest[9], "14$note 14");
    }

    #[test]
    fn test_offline_store_reports_unavailable() {
        let store = MemoryFrameStore::new();
        let id = StreamId::new("PEPI", "1");
        store.push_frame(&id, "x");
        store.set_offline(true);
        assert!(matches!(
            store.frames_since(&id, 0),
            Err(SourceError::Unavailable(_))
        ));
        store.set_offline(false);
        assert_eq!(store.streams().unwrap(), vec![id]);
    }
}
