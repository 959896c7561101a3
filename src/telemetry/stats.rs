//! Atomic pipeline counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current process, optionally backed by a JSON file.
#[derive(Debug)]
pub struct PipelineStats {
    /// Raw frames read from sources
    frames_consumed: AtomicU64,
    /// Samples decoded from those frames
    samples_decoded: AtomicU64,
    /// Groups dropped by the decoder
    groups_dropped: AtomicU64,
    /// Full-rate filtered samples emitted
    samples_emitted: AtomicU64,
    /// Live payloads handed to the live sink
    batches_delivered: AtomicU64,
    /// Live payloads the live sink refused
    deliveries_failed: AtomicU64,
    /// Rows written to the archive
    rows_archived: AtomicU64,
    /// Polls that found the source unreachable
    source_failures: AtomicU64,
    /// Streams created on first contact
    streams_created: AtomicU64,
    /// Streams evicted after going idle
    streams_evicted: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            frames_consumed: AtomicU64::new(0),
            samples_decoded: AtomicU64::new(0),
            groups_dropped: AtomicU64::new(0),
            samples_emitted: AtomicU64::new(0),
            batches_delivered: AtomicU64::new(0),
            deliveries_failed: AtomicU64::new(0),
            rows_archived: AtomicU64::new(0),
            source_failures: AtomicU64::new(0),
            streams_created: AtomicU64::new(0),
            streams_evicted: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats backed by a file, loading previous totals if present.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous pipeline stats: {}", e);
        }

        stats
    }

    pub fn record_frames(&self, count: u64) {
        self.frames_consumed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_decoded(&self, samples: u64, dropped_groups: u64) {
        self.samples_decoded.fetch_add(samples, Ordering::Relaxed);
        self.groups_dropped.fetch_add(dropped_groups, Ordering::Relaxed);
    }

    pub fn record_emitted(&self, count: u64) {
        self.samples_emitted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_archived(&self, rows: u64) {
        self.rows_archived.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn record_source_failure(&self) {
        self.source_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_created(&self) {
        self.streams_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_streams_evicted(&self, count: u64) {
        self.streams_evicted.fetch_add(count, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_consumed: self.frames_consumed.load(Ordering::Relaxed),
            samples_decoded: self.samples_decoded.load(Ordering::Relaxed),
            groups_dropped: self.groups_dropped.load(Ordering::Relaxed),
            samples_emitted: self.samples_emitted.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            rows_archived: self.rows_archived.load(Ordering::Relaxed),
            source_failures: self.source_failures.load(Ordering::Relaxed),
            streams_created: self.streams_created.load(Ordering::Relaxed),
            streams_evicted: self.streams_evicted.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Pipeline Statistics:\n\
             - Frames consumed: {}\n\
             - Samples decoded: {}\n\
             - Groups dropped: {}\n\
             - Samples emitted: {}\n\
             - Live batches delivered: {} ({} refused)\n\
             - Rows archived: {}\n\
             - Source failures: {}\n\
             - Streams created/evicted: {}/{}\n\
             - Session duration: {} seconds",
            s.frames_consumed,
            s.samples_decoded,
            s.groups_dropped,
            s.samples_emitted,
            s.batches_delivered,
            s.deliveries_failed,
            s.rows_archived,
            s.source_failures,
            s.streams_created,
            s.streams_evicted,
            s.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats {
                counters: self.snapshot().into(),
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                let c = persisted.counters;

                self.frames_consumed.store(c.frames_consumed, Ordering::Relaxed);
                self.samples_decoded.store(c.samples_decoded, Ordering::Relaxed);
                self.groups_dropped.store(c.groups_dropped, Ordering::Relaxed);
                self.samples_emitted.store(c.samples_emitted, Ordering::Relaxed);
                self.batches_delivered.store(c.batches_delivered, Ordering::Relaxed);
                self.deliveries_failed.store(c.deliveries_failed, Ordering::Relaxed);
                self.rows_archived.store(c.rows_archived, Ordering::Relaxed);
                self.source_failures.store(c.source_failures, Ordering::Relaxed);
                self.streams_created.store(c.streams_created, Ordering::Relaxed);
                self.streams_evicted.store(c.streams_evicted, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.frames_consumed,
            &self.samples_decoded,
            &self.groups_dropped,
            &self.samples_emitted,
            &self.batches_delivered,
            &self.deliveries_failed,
            &self.rows_archived,
            &self.source_failures,
            &self.streams_created,
            &self.streams_evicted,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub frames_consumed: u64,
    pub samples_decoded: u64,
    pub groups_dropped: u64,
    pub samples_emitted: u64,
    pub batches_delivered: u64,
    pub deliveries_failed: u64,
    pub rows_archived: u64,
    pub source_failures: u64,
    pub streams_created: u64,
    pub streams_evicted: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Counters {
    frames_consumed: u64,
    samples_decoded: u64,
    groups_dropped: u64,
    samples_emitted: u64,
    batches_delivered: u64,
    deliveries_failed: u64,
    rows_archived: u64,
    source_failures: u64,
    streams_created: u64,
    streams_evicted: u64,
}

impl From<StatsSnapshot> for Counters {
    fn from(s: StatsSnapshot) -> Self {
        Self {
            frames_consumed: s.frames_consumed,
            samples_decoded: s.samples_decoded,
            groups_dropped: s.groups_dropped,
            samples_emitted: s.samples_emitted,
            batches_delivered: s.batches_delivered,
            deliveries_failed: s.deliveries_failed,
            rows_archived: s.rows_archived,
            source_failures: s.source_failures,
            streams_created: s.streams_created,
            streams_evicted: s.streams_evicted,
        }
    }
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    #[serde(flatten)]
    counters: Counters,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared pipeline stats.
pub type SharedPipelineStats = Arc<PipelineStats>;

pub fn create_shared_stats() -> SharedPipelineStats {
    Arc::new(PipelineStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedPipelineStats {
    Arc::new(PipelineStats::with_persistence(path))
}
