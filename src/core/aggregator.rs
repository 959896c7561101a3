//! Per-stream aggregation.
//!
//! The aggregator owns one [`StreamState`] per (project, subject): the
//! source cursor, the filter history of every channel and stage, the
//! unfinished detrend block and the decimation cursor. Each call does work
//! proportional to the new frames only.
//!
//! Calls for the same stream are serialized by a per-stream mutex. Calls for
//! different streams only share the map lookup.

use crate::core::annotations::{format_annotations, ANNOTATION_LIMIT};
use crate::core::cascade::{CascadeDesign, CascadeState, FilterCascade, FilteredVector};
use crate::core::decoder::decode_frames;
use crate::core::detrend::BlockDetrender;
use crate::core::normalize::normalize;
use crate::source::{RawFrame, SharedFrameSource, SourceError, StreamId};
use crate::telemetry::SharedPipelineStats;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};
use std::time::{Duration, Instant};

/// Keep every n-th full-rate sample for display.
pub const DEFAULT_DECIMATION_STRIDE: usize = 5;

/// Decimal places kept in emitted values.
pub const DEFAULT_DISPLAY_DECIMALS: u32 = 2;

/// Display samples kept in the rolling window.
pub const DEFAULT_WINDOW_LEN: usize = 50;

/// Everything the aggregator needs to build and present a stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatorSettings {
    pub cascade: CascadeDesign,
    pub decimation_stride: usize,
    pub display_decimals: u32,
    pub window_len: usize,
    /// Values with a smaller magnitude are emitted as exactly zero
    pub zero_threshold: Option<f64>,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            cascade: CascadeDesign::default(),
            decimation_stride: DEFAULT_DECIMATION_STRIDE,
            display_decimals: DEFAULT_DISPLAY_DECIMALS,
            window_len: DEFAULT_WINDOW_LEN,
            zero_threshold: None,
        }
    }
}

impl AggregatorSettings {
    fn present_value(&self, value: f64) -> f64 {
        let scale = 10f64.powi(self.display_decimals as i32);
        let rounded = (value * scale).round() / scale;
        match self.zero_threshold {
            Some(threshold) if rounded.abs() < threshold => 0.0,
            // Adding zero folds -0.0 into 0.0.
            _ => rounded + 0.0,
        }
    }

    fn present(&self, sample: FilteredVector) -> FilteredVector {
        sample.map(|value| self.present_value(value))
    }
}

/// Output of one ingest or flush.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Decimated, rounded samples for live viewers
    pub display: Vec<FilteredVector>,
    /// Every emitted sample, rounded, for the archive
    pub full_rate: Vec<FilteredVector>,
    /// Samples decoded from this call's frames
    pub decoded_samples: usize,
    /// Groups the decoder discarded
    pub dropped_groups: usize,
    /// Frames consumed by this call
    pub frames: usize,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.full_rate.is_empty()
    }
}

/// Health of a stream as seen by [`StreamAggregator::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    /// First contact with this stream; state was zero-initialised
    Created,
    /// Source reachable. The batch may still be empty
    Healthy,
    /// Source could not be read; nothing was consumed
    SourceUnavailable,
}

/// Result of polling a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub stream: StreamId,
    pub status: IngestStatus,
    pub batch: Batch,
    /// Formatted annotations, oldest first
    pub annotations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Mutable state of one stream.
#[derive(Debug)]
pub struct StreamState {
    cursor: u64,
    cascade: CascadeState,
    detrender: BlockDetrender,
    emitted: u64,
    samples_decoded: u64,
    dropped_groups: u64,
    window: VecDeque<FilteredVector>,
    last_batch: Option<Batch>,
    last_active: Instant,
    /// Set once a poll has reported `Created` for this state
    introduced: bool,
    /// Set under the lock when the slot leaves the map; holders of a stale
    /// `Arc` must look the stream up again
    evicted: bool,
}

impl StreamState {
    fn new(settings: &AggregatorSettings, cursor: u64) -> Self {
        Self {
            cursor,
            cascade: CascadeState::default(),
            detrender: BlockDetrender::new(
                settings.cascade.block_size,
                settings.cascade.detrend_mode,
            ),
            emitted: 0,
            samples_decoded: 0,
            dropped_groups: 0,
            window: VecDeque::with_capacity(settings.window_len),
            last_batch: None,
            last_active: Instant::now(),
            introduced: false,
            evicted: false,
        }
    }
}

/// Read-only view of a stream's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub stream: StreamId,
    pub frames_consumed: u64,
    pub samples_decoded: u64,
    pub dropped_groups: u64,
    pub samples_emitted: u64,
    pub pending_samples: usize,
    pub cascade: CascadeState,
    pub idle_secs: u64,
}

/// A stream removed by [`StreamAggregator::evict_idle`] and the samples
/// its unfinished detrend block still held.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictedStream {
    pub stream: StreamId,
    pub tail: Batch,
}

type StreamSlot = Arc<Mutex<StreamState>>;

/// Owns every stream's state and drives frames through the cascade.
pub struct StreamAggregator {
    settings: AggregatorSettings,
    cascade: FilterCascade,
    streams: RwLock<HashMap<StreamId, StreamSlot>>,
    /// Source cursors of evicted streams, so a returning stream never
    /// re-reads frames it already consumed
    retired_cursors: Mutex<HashMap<StreamId, u64>>,
    source: Option<SharedFrameSource>,
    stats: Option<SharedPipelineStats>,
    timezone: Tz,
}

impl StreamAggregator {
    pub fn new(settings: AggregatorSettings) -> Self {
        Self {
            cascade: FilterCascade::new(settings.cascade),
            settings,
            streams: RwLock::new(HashMap::new()),
            retired_cursors: Mutex::new(HashMap::new()),
            source: None,
            stats: None,
            timezone: chrono_tz::UTC,
        }
    }

    /// Attach the frame source used by [`StreamAggregator::poll`].
    pub fn with_source(mut self, source: SharedFrameSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_stats(mut self, stats: SharedPipelineStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Timezone used when formatting annotations.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    pub fn source(&self) -> Option<&SharedFrameSource> {
        self.source.as_ref()
    }

    /// Look up a stream, creating it on first contact.
    fn slot(&self, stream: &StreamId) -> StreamSlot {
        if let Some(slot) = self
            .streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
        {
            return Arc::clone(slot);
        }

        let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        let mut created = false;
        let slot = streams.entry(stream.clone()).or_insert_with(|| {
            created = true;
            let cursor = self
                .retired_cursors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(stream)
                .unwrap_or(0);
            Arc::new(Mutex::new(StreamState::new(&self.settings, cursor)))
        });
        let slot = Arc::clone(slot);
        drop(streams);

        if created {
            tracing::info!("Created stream {}", stream);
            if let Some(stats) = &self.stats {
                stats.record_stream_created();
            }
        }
        slot
    }

    fn existing_slot(&self, stream: &StreamId) -> Option<StreamSlot> {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
            .cloned()
    }

    /// Run `f` on a stream's state, creating the stream if needed.
    ///
    /// A slot evicted between lookup and lock is discarded and the lookup
    /// retried, so work never lands on state that left the map.
    fn with_state<R>(&self, stream: &StreamId, f: impl FnOnce(&mut StreamState) -> R) -> R {
        loop {
            let slot = self.slot(stream);
            let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if state.evicted {
                continue;
            }
            return f(&mut state);
        }
    }

    /// Like [`Self::with_state`] but never creates the stream.
    fn with_existing<R>(&self, stream: &StreamId, f: impl FnOnce(&mut StreamState) -> R) -> Option<R> {
        loop {
            let slot = self.existing_slot(stream)?;
            let mut state = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if state.evicted {
                continue;
            }
            return Some(f(&mut state));
        }
    }

    /// Feed frames the caller has not delivered before.
    ///
    /// Only completed detrend blocks are emitted; the remainder is carried to
    /// the next call. Frames are assumed new: delivering one twice filters it
    /// twice.
    pub fn ingest(&self, stream: &StreamId, frames: &[RawFrame]) -> Batch {
        self.with_state(stream, |state| self.process(stream, state, frames))
    }

    fn process(&self, stream: &StreamId, state: &mut StreamState, frames: &[RawFrame]) -> Batch {
        if frames.is_empty() {
            return Batch::default();
        }
        state.last_active = Instant::now();
        state.cursor += frames.len() as u64;

        let report = decode_frames(frames.iter().map(String::as_str));
        let decoded = report.samples.len();
        if report.dropped_groups > 0 {
            tracing::warn!(
                "Stream {} dropped {} malformed group(s)",
                stream,
                report.dropped_groups
            );
        }

        let normalized = normalize(&report.samples);
        let filtered = self.cascade.apply_iir(&normalized, &mut state.cascade);
        let ready = state.detrender.push(filtered);

        let mut batch = self.present(state, ready);
        batch.decoded_samples = decoded;
        batch.dropped_groups = report.dropped_groups;
        batch.frames = frames.len();

        state.samples_decoded += decoded as u64;
        state.dropped_groups += report.dropped_groups as u64;
        state.last_batch = Some(batch.clone());

        if let Some(stats) = &self.stats {
            stats.record_frames(frames.len() as u64);
            stats.record_decoded(decoded as u64, report.dropped_groups as u64);
            stats.record_emitted(batch.full_rate.len() as u64);
        }

        tracing::debug!(
            "Stream {}: {} frame(s), {} sample(s) decoded, {} emitted",
            stream,
            frames.len(),
            decoded,
            batch.full_rate.len()
        );
        batch
    }

    /// Round, decimate on the global sample index and update the window.
    fn present(&self, state: &mut StreamState, ready: Vec<FilteredVector>) -> Batch {
        let stride = self.settings.decimation_stride.max(1) as u64;
        let full_rate: Vec<FilteredVector> = ready
            .into_iter()
            .map(|sample| self.settings.present(sample))
            .collect();

        let mut display = Vec::with_capacity(full_rate.len() / stride as usize + 1);
        for sample in &full_rate {
            if state.emitted % stride == 0 {
                display.push(*sample);
            }
            state.emitted += 1;
        }

        state.window.extend(display.iter().copied());
        while state.window.len() > self.settings.window_len {
            state.window.pop_front();
        }

        Batch {
            display,
            full_rate,
            ..Batch::default()
        }
    }

    /// Emit the unfinished detrend block of a stream.
    ///
    /// Returns `None` for a stream that was never seen.
    pub fn flush(&self, stream: &StreamId) -> Option<Batch> {
        self.with_existing(stream, |state| self.flush_state(state))
    }

    fn flush_state(&self, state: &mut StreamState) -> Batch {
        let tail = state.detrender.flush();
        let batch = self.present(state, tail);
        if let Some(stats) = &self.stats {
            stats.record_emitted(batch.full_rate.len() as u64);
        }
        if !batch.is_empty() {
            state.last_batch = Some(batch.clone());
        }
        batch
    }

    /// Read unseen frames from the attached source and ingest them.
    pub fn poll(&self, stream: &StreamId) -> IngestOutcome {
        let Some(source) = self.source.clone() else {
            return IngestOutcome {
                stream: stream.clone(),
                status: IngestStatus::SourceUnavailable,
                batch: Batch::default(),
                annotations: Vec::new(),
                error: Some("no frame source attached".to_string()),
            };
        };

        let read: Result<(bool, Batch), SourceError> = self.with_state(stream, |state| {
            let frames = source.frames_since(stream, state.cursor)?;
            let created = !state.introduced;
            state.introduced = true;
            Ok((created, self.process(stream, state, &frames)))
        });

        let (created, batch) = match read {
            Ok(read) => read,
            Err(e) => {
                tracing::warn!("Failed to read frames for {}: {}", stream, e);
                if let Some(stats) = &self.stats {
                    stats.record_source_failure();
                }
                return IngestOutcome {
                    stream: stream.clone(),
                    status: IngestStatus::SourceUnavailable,
                    batch: Batch::default(),
                    annotations: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        let annotations = match source.annotations(stream, ANNOTATION_LIMIT) {
            Ok(raw) => format_annotations(&raw, self.timezone),
            Err(e) => {
                tracing::warn!("Failed to read annotations for {}: {}", stream, e);
                Vec::new()
            }
        };

        IngestOutcome {
            stream: stream.clone(),
            status: if created {
                IngestStatus::Created
            } else {
                IngestStatus::Healthy
            },
            batch,
            annotations,
            error: None,
        }
    }

    /// Most recent display samples, oldest first.
    pub fn window(&self, stream: &StreamId) -> Option<Vec<FilteredVector>> {
        self.with_existing(stream, |state| state.window.iter().copied().collect())
    }

    /// The last non-empty batch produced for a stream.
    pub fn last_batch(&self, stream: &StreamId) -> Option<Batch> {
        self.with_existing(stream, |state| state.last_batch.clone())
            .flatten()
    }

    pub fn snapshot(&self, stream: &StreamId) -> Option<StreamSnapshot> {
        self.with_existing(stream, |state| StreamSnapshot {
            stream: stream.clone(),
            frames_consumed: state.cursor,
            samples_decoded: state.samples_decoded,
            dropped_groups: state.dropped_groups,
            samples_emitted: state.emitted,
            pending_samples: state.detrender.pending_len(),
            cascade: state.cascade,
            idle_secs: state.last_active.elapsed().as_secs(),
        })
    }

    /// Drop streams that consumed no frames for at least `max_idle`.
    ///
    /// The unfinished detrend block is flushed into the returned tail, which
    /// the caller must deliver: those samples come from frames the cursor
    /// already moved past. Only the source cursor survives eviction; a
    /// stream that comes back starts with fresh filter state. Streams busy
    /// in another call are skipped.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<EvictedStream> {
        let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        let mut retired = self
            .retired_cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut evicted = Vec::new();

        streams.retain(|id, slot| {
            let mut state = match slot.try_lock() {
                Ok(state) => state,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return true,
            };
            if state.last_active.elapsed() < max_idle {
                return true;
            }
            let tail = self.flush_state(&mut state);
            state.evicted = true;
            retired.insert(id.clone(), state.cursor);
            evicted.push(EvictedStream {
                stream: id.clone(),
                tail,
            });
            false
        });
        drop(retired);
        drop(streams);

        if !evicted.is_empty() {
            tracing::info!("Evicted {} idle stream(s)", evicted.len());
            if let Some(stats) = &self.stats {
                stats.record_streams_evicted(evicted.len() as u64);
            }
        }
        evicted.sort_by(|a, b| a.stream.cmp(&b.stream));
        evicted
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self
            .streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn stream_count(&self) -> usize {
        self.streams
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for StreamAggregator {
    fn default() -> Self {
        Self::new(AggregatorSettings::default())
    }
}

/// Thread-safe shared aggregator.
pub type SharedAggregator = Arc<StreamAggregator>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FrameSource, MemoryFrameStore, SyntheticDevice};
    use crate::telemetry::PipelineStats;

    fn frames(count: usize, groups: usize) -> Vec<RawFrame> {
        SyntheticDevice::default()
            .with_groups_per_frame(groups)
            .frames(count)
    }

    #[test]
    fn test_ingest_emits_completed_blocks_only() {
        let aggregator = StreamAggregator::default();
        let id = StreamId::new("PEPI", "1");

        let batch = aggregator.ingest(&id, &frames(1, 120));
        assert_eq!(batch.decoded_samples, 120);
        assert_eq!(batch.full_rate.len(), 100);
        assert_eq!(batch.display.len(), 20);

        let snapshot = aggregator.snapshot(&id).unwrap();
        assert_eq!(snapshot.pending_samples, 20);

        let tail = aggregator.flush(&id).unwrap();
        assert_eq!(tail.full_rate.len(), 20);
        assert_eq!(tail.display.len(), 4);
        assert_eq!(aggregator.snapshot(&id).unwrap().pending_samples, 0);
    }

    #[test]
    fn test_chunked_ingest_matches_single_call() {
        let all = frames(6, 70);
        let (a, b) = all.split_at(2);
        let id = StreamId::new("PEPI", "chunks");

        let chunked = StreamAggregator::default();
        let mut chunked_out = chunked.ingest(&id, a).full_rate;
        chunked_out.extend(chunked.ingest(&id, b).full_rate);
        chunked_out.extend(chunked.flush(&id).unwrap().full_rate);

        let whole = StreamAggregator::default();
        let mut whole_out = whole.ingest(&id, &all).full_rate;
        whole_out.extend(whole.flush(&id).unwrap().full_rate);

        assert_eq!(chunked_out, whole_out);
        assert_eq!(
            chunked.snapshot(&id).unwrap().cascade,
            whole.snapshot(&id).unwrap().cascade
        );
    }

    #[test]
    fn test_decimation_follows_global_index() {
        let all = frames(1, 100);
        let id = StreamId::new("PEPI", "decimate");

        let whole = StreamAggregator::default();
        let expected = whole.ingest(&id, &all).display;

        // 100 groups split 50/50 into separate frames.
        let mut device = SyntheticDevice::default().with_groups_per_frame(50);
        let parts = device.frames(2);
        let chunked = StreamAggregator::default();
        let mut display = chunked.ingest(&id, &parts[..1]).display;
        display.extend(chunked.ingest(&id, &parts[1..]).display);

        assert_eq!(display, expected);
        assert_eq!(display.len(), 20);
    }

    #[test]
    fn test_values_are_rounded() {
        let aggregator = StreamAggregator::default();
        let id = StreamId::new("PEPI", "round");
        let batch = aggregator.ingest(&id, &frames(1, 50));
        for value in batch.full_rate.iter().flatten() {
            assert_eq!(*value, (value * 100.0).round() / 100.0);
        }
    }

    #[test]
    fn test_zero_threshold_clamps_small_values() {
        let settings = AggregatorSettings {
            zero_threshold: Some(1e6),
            ..AggregatorSettings::default()
        };
        let aggregator = StreamAggregator::new(settings);
        let id = StreamId::new("PEPI", "zero");
        let batch = aggregator.ingest(&id, &frames(1, 50));
        assert!(batch.full_rate.iter().flatten().all(|v| *v == 0.0));
    }

    #[test]
    fn test_window_is_bounded() {
        let aggregator = StreamAggregator::default();
        let id = StreamId::new("PEPI", "window");
        aggregator.ingest(&id, &frames(2, 500));
        let window = aggregator.window(&id).unwrap();
        assert_eq!(window.len(), DEFAULT_WINDOW_LEN);
        assert_eq!(
            window.last(),
            aggregator.last_batch(&id).unwrap().display.last()
        );
    }

    #[test]
    fn test_poll_reports_created_then_healthy() {
        let store = Arc::new(MemoryFrameStore::new());
        let id = StreamId::new("PEPI", "poll");
        store.push_frames(&id, frames(1, 100));
        store.push_comment(&id, "0$start");

        let stats = Arc::new(PipelineStats::new());
        let aggregator = StreamAggregator::default()
            .with_source(store.clone())
            .with_stats(stats.clone());

        let first = aggregator.poll(&id);
        assert_eq!(first.status, IngestStatus::Created);
        assert_eq!(first.batch.decoded_samples, 100);
        assert_eq!(first.annotations, vec!["01/01/1970, 00:00:00: start"]);

        let second = aggregator.poll(&id);
        assert_eq!(second.status, IngestStatus::Healthy);
        assert!(second.batch.is_empty());
        assert_eq!(second.batch.decoded_samples, 0);

        assert_eq!(stats.snapshot().streams_created, 1);
        assert_eq!(stats.snapshot().frames_consumed, 1);
    }

    #[test]
    fn test_unavailable_source_consumes_nothing() {
        let store = Arc::new(MemoryFrameStore::new());
        let id = StreamId::new("PEPI", "offline");
        store.push_frames(&id, frames(1, 100));
        let aggregator = StreamAggregator::default().with_source(store.clone());

        store.set_offline(true);
        let outcome = aggregator.poll(&id);
        assert_eq!(outcome.status, IngestStatus::SourceUnavailable);
        assert!(outcome.batch.is_empty());
        assert!(outcome.annotations.is_empty());
        assert!(outcome.error.is_some());

        store.set_offline(false);
        let outcome = aggregator.poll(&id);
        assert_eq!(outcome.batch.decoded_samples, 100);
        assert_eq!(aggregator.snapshot(&id).unwrap().frames_consumed, 1);
        assert_eq!(store.frames_since(&id, 1).unwrap().len(), 0);
    }

    #[test]
    fn test_poll_without_source() {
        let aggregator = StreamAggregator::default();
        let outcome = aggregator.poll(&StreamId::new("PEPI", "none"));
        assert_eq!(outcome.status, IngestStatus::SourceUnavailable);
        assert_eq!(aggregator.stream_count(), 0);
    }

    #[test]
    fn test_unknown_stream_queries() {
        let aggregator = StreamAggregator::default();
        let id = StreamId::new("PEPI", "ghost");
        assert!(aggregator.flush(&id).is_none());
        assert!(aggregator.window(&id).is_none());
        assert!(aggregator.snapshot(&id).is_none());
    }

    #[test]
    fn test_evict_idle() {
        let aggregator = StreamAggregator::default();
        let a = StreamId::new("PEPI", "a");
        let b = StreamId::new("PEPI", "b");
        aggregator.ingest(&a, &[]);
        aggregator.ingest(&b, &[]);
        assert_eq!(aggregator.stream_ids(), vec![a.clone(), b.clone()]);

        assert!(aggregator.evict_idle(Duration::from_secs(3600)).is_empty());
        let evicted: Vec<StreamId> = aggregator
            .evict_idle(Duration::ZERO)
            .into_iter()
            .map(|e| e.stream)
            .collect();
        assert_eq!(evicted, vec![a, b]);
        assert_eq!(aggregator.stream_count(), 0);
    }

    #[test]
    fn test_eviction_flushes_pending_block() {
        let aggregator = StreamAggregator::default();
        let id = StreamId::new("PEPI", "tail");
        let batch = aggregator.ingest(&id, &frames(1, 120));
        assert_eq!(batch.full_rate.len(), 100);

        let evicted = aggregator.evict_idle(Duration::ZERO);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].stream, id);
        assert_eq!(evicted[0].tail.full_rate.len(), 20);
        assert_eq!(evicted[0].tail.display.len(), 4);
        assert!(aggregator.flush(&id).is_none());
    }

    #[test]
    fn test_empty_polls_do_not_refresh_activity() {
        let store = Arc::new(MemoryFrameStore::new());
        let id = StreamId::new("PEPI", "quiet");
        store.push_frames(&id, frames(1, 50));
        let aggregator = StreamAggregator::default().with_source(store.clone());

        aggregator.poll(&id);
        std::thread::sleep(Duration::from_millis(40));
        aggregator.poll(&id);
        aggregator.poll(&id);

        assert_eq!(aggregator.evict_idle(Duration::from_millis(30)).len(), 1);
    }

    #[test]
    fn test_created_reported_after_failed_first_poll() {
        let store = Arc::new(MemoryFrameStore::new());
        let id = StreamId::new("PEPI", "late");
        store.push_frames(&id, frames(1, 50));
        let aggregator = StreamAggregator::default().with_source(store.clone());

        store.set_offline(true);
        assert_eq!(aggregator.poll(&id).status, IngestStatus::SourceUnavailable);
        store.set_offline(false);

        let outcome = aggregator.poll(&id);
        assert_eq!(outcome.status, IngestStatus::Created);
        assert_eq!(outcome.batch.decoded_samples, 50);
        assert_eq!(aggregator.poll(&id).status, IngestStatus::Healthy);
    }

    #[test]
    fn test_stale_slot_is_marked_on_eviction() {
        let store = Arc::new(MemoryFrameStore::new());
        let id = StreamId::new("PEPI", "stale");
        store.push_frames(&id, frames(2, 50));
        let aggregator = StreamAggregator::default().with_source(store.clone());
        aggregator.poll(&id);

        // A caller that looked the slot up just before eviction.
        let stale = aggregator.slot(&id);
        aggregator.evict_idle(Duration::ZERO);
        assert!(stale.lock().unwrap().evicted);

        store.push_frames(&id, frames(1, 50));
        let outcome = aggregator.poll(&id);
        assert_eq!(outcome.batch.frames, 1);
        assert_eq!(aggregator.snapshot(&id).unwrap().frames_consumed, 3);
        assert_eq!(stale.lock().unwrap().cursor, 2);
    }

    #[test]
    fn test_frames_consumed_once_under_concurrent_eviction() {
        let store = Arc::new(MemoryFrameStore::new());
        let id = StreamId::new("PEPI", "contended");
        let aggregator = StreamAggregator::default().with_source(store.clone());
        let input = frames(60, 10);
        let done = std::sync::atomic::AtomicBool::new(false);

        let polled: usize = std::thread::scope(|scope| {
            let pollers: Vec<_> = (0..3)
                .map(|_| {
                    scope.spawn(|| {
                        let mut consumed = 0;
                        while !done.load(std::sync::atomic::Ordering::SeqCst) {
                            consumed += aggregator.poll(&id).batch.frames;
                        }
                        consumed
                    })
                })
                .collect();
            scope.spawn(|| {
                while !done.load(std::sync::atomic::Ordering::SeqCst) {
                    aggregator.evict_idle(Duration::ZERO);
                }
            });

            for frame in &input {
                store.push_frame(&id, frame.clone());
                std::thread::yield_now();
            }
            done.store(true, std::sync::atomic::Ordering::SeqCst);
            pollers.into_iter().map(|h| h.join().unwrap()).sum()
        });

        let rest = aggregator.poll(&id).batch.frames;
        assert_eq!(polled + rest, input.len());
    }

    #[test]
    fn test_evicted_stream_keeps_its_cursor() {
        let store = Arc::new(MemoryFrameStore::new());
        let id = StreamId::new("PEPI", "returning");
        store.push_frames(&id, frames(2, 50));
        let aggregator = StreamAggregator::default().with_source(store.clone());

        assert_eq!(aggregator.poll(&id).batch.frames, 2);
        aggregator.evict_idle(Duration::ZERO);

        let outcome = aggregator.poll(&id);
        assert_eq!(outcome.status, IngestStatus::Created);
        assert_eq!(outcome.batch.frames, 0);
        assert_eq!(aggregator.snapshot(&id).unwrap().cascade, CascadeState::default());
    }

    #[test]
    fn test_streams_are_independent_across_threads() {
        let aggregator = StreamAggregator::default();
        let input = frames(3, 100);
        let ids: Vec<StreamId> = (0..4).map(|i| StreamId::new("PEPI", i.to_string())).collect();

        std::thread::scope(|scope| {
            for id in &ids {
                let aggregator = &aggregator;
                let input = &input;
                scope.spawn(move || {
                    for frame in input {
                        aggregator.ingest(id, std::slice::from_ref(frame));
                    }
                });
            }
        });

        let reference = aggregator.snapshot(&ids[0]).unwrap();
        for id in &ids[1..] {
            let snapshot = aggregator.snapshot(id).unwrap();
            assert_eq!(snapshot.cascade, reference.cascade);
            assert_eq!(snapshot.samples_emitted, 300);
        }
    }
}
