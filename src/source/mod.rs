//! Inbound frame sources.
//!
//! The device appends raw frames (and free-text annotations) to an
//! append-only store. A [`FrameSource`] exposes that store to the pipeline
//! through a cursor, so each frame is handed to a stream exactly once.

pub mod file;
pub mod memory;
pub mod synthetic;
pub mod types;

pub use file::FileFrameSource;
pub use memory::MemoryFrameStore;
pub use synthetic::SyntheticDevice;
pub use types::{ParseStreamIdError, RawFrame, StreamId};

use std::sync::Arc;

/// Read access to the device's append-only frame store.
pub trait FrameSource: Send + Sync {
    /// Frames appended after the first `cursor` frames of the stream.
    ///
    /// An unknown stream has no frames yet and returns an empty list.
    fn frames_since(&self, stream: &StreamId, cursor: u64) -> Result<Vec<RawFrame>, SourceError>;

    /// The most recent `limit` raw annotation entries, oldest first.
    fn annotations(&self, stream: &StreamId, limit: usize) -> Result<Vec<String>, SourceError>;

    /// Every stream the store currently knows about.
    fn streams(&self) -> Result<Vec<StreamId>, SourceError>;
}

/// Shared handle to a frame source.
pub type SharedFrameSource = Arc<dyn FrameSource>;

/// Errors reported by frame sources.
#[derive(Debug)]
pub enum SourceError {
    /// The store cannot be reached at all
    Unavailable(String),
    /// The store was reached but reading failed
    Io(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Unavailable(e) => write!(f, "Frame source unavailable: {e}"),
            SourceError::Io(e) => write!(f, "Frame source IO error: {e}"),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e.to_string())
    }
}
