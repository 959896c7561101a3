//! The pump ties a source, the aggregator and the sinks together.
//!
//! One tick polls every known stream, pushes the display batch to the live
//! sink and the full-rate batch to the archive. Streams are processed on
//! scoped threads; a failure in one stream never aborts the others.

use crate::core::aggregator::{Batch, IngestStatus, SharedAggregator};
use crate::sink::{ArchiveSink, LivePayload, LiveSink};
use crate::source::StreamId;
use crate::telemetry::SharedPipelineStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// What happened to one stream during a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamReport {
    pub stream: StreamId,
    pub status: IngestStatus,
    pub frames: usize,
    pub decoded_samples: usize,
    pub dropped_groups: usize,
    pub emitted_samples: usize,
    pub archived_rows: usize,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<String>,
}

/// Result of one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PumpReport {
    pub streams: Vec<StreamReport>,
    pub evicted: Vec<StreamId>,
    /// Set when the source could not list its streams
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
}

impl StreamReport {
    fn empty(stream: &StreamId, status: IngestStatus) -> Self {
        Self {
            stream: stream.clone(),
            status,
            frames: 0,
            decoded_samples: 0,
            dropped_groups: 0,
            emitted_samples: 0,
            archived_rows: 0,
            delivered: false,
            errors: Vec::new(),
        }
    }
}

impl PumpReport {
    pub fn emitted_samples(&self) -> usize {
        self.streams.iter().map(|s| s.emitted_samples).sum()
    }

    pub fn has_errors(&self) -> bool {
        self.source_error.is_some() || self.streams.iter().any(|s| !s.errors.is_empty())
    }
}

/// Drives polling and delivery.
pub struct Pump {
    aggregator: SharedAggregator,
    live: Arc<dyn LiveSink>,
    archive: Arc<dyn ArchiveSink>,
    stats: Option<SharedPipelineStats>,
    idle_eviction: Option<Duration>,
}

impl Pump {
    pub fn new(
        aggregator: SharedAggregator,
        live: Arc<dyn LiveSink>,
        archive: Arc<dyn ArchiveSink>,
    ) -> Self {
        Self {
            aggregator,
            live,
            archive,
            stats: None,
            idle_eviction: None,
        }
    }

    pub fn with_stats(mut self, stats: SharedPipelineStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Evict streams idle for longer than `max_idle` at the end of each tick.
    ///
    /// The unfinished block of an evicted stream is archived before its state
    /// is dropped.
    pub fn with_idle_eviction(mut self, max_idle: Duration) -> Self {
        self.idle_eviction = Some(max_idle);
        self
    }

    pub fn aggregator(&self) -> &SharedAggregator {
        &self.aggregator
    }

    /// Streams the source lists plus the ones already tracked.
    fn streams(&self) -> (Vec<StreamId>, Option<String>) {
        let mut ids: BTreeSet<StreamId> = self.aggregator.stream_ids().into_iter().collect();
        let mut source_error = None;

        if let Some(source) = self.aggregator.source() {
            match source.streams() {
                Ok(listed) => ids.extend(listed),
                Err(e) => {
                    tracing::warn!("Failed to list streams: {}", e);
                    if let Some(stats) = &self.stats {
                        stats.record_source_failure();
                    }
                    source_error = Some(e.to_string());
                }
            }
        }

        (ids.into_iter().collect(), source_error)
    }

    /// Poll every stream once.
    pub fn tick(&self) -> PumpReport {
        let (ids, source_error) = self.streams();

        let mut streams: Vec<StreamReport> = std::thread::scope(|scope| {
            let handles: Vec<_> = ids
                .iter()
                .map(|id| (id, scope.spawn(move || self.pump_stream(id))))
                .collect();

            handles
                .into_iter()
                .map(|(id, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        tracing::error!("Stream {} panicked during tick", id);
                        let mut report = StreamReport::empty(id, IngestStatus::SourceUnavailable);
                        report.errors.push("stream worker panicked".to_string());
                        report
                    })
                })
                .collect()
        });

        let mut evicted = Vec::new();
        if let Some(max_idle) = self.idle_eviction {
            for eviction in self.aggregator.evict_idle(max_idle) {
                let id = eviction.stream;
                let index = match streams.iter().position(|s| s.stream == id) {
                    Some(index) => index,
                    None => {
                        streams.push(StreamReport::empty(&id, IngestStatus::Healthy));
                        streams.len() - 1
                    }
                };
                let report = &mut streams[index];
                report.emitted_samples += eviction.tail.full_rate.len();
                self.archive(&id, &eviction.tail, report);
                evicted.push(id);
            }
        }

        PumpReport {
            streams,
            evicted,
            source_error,
        }
    }

    fn pump_stream(&self, id: &StreamId) -> StreamReport {
        let outcome = self.aggregator.poll(id);
        let mut report = StreamReport {
            stream: id.clone(),
            status: outcome.status,
            frames: outcome.batch.frames,
            decoded_samples: outcome.batch.decoded_samples,
            dropped_groups: outcome.batch.dropped_groups,
            emitted_samples: outcome.batch.full_rate.len(),
            archived_rows: 0,
            delivered: false,
            errors: outcome.error.into_iter().collect(),
        };

        if outcome.status == IngestStatus::SourceUnavailable {
            return report;
        }

        self.deliver(id, &outcome.batch, outcome.annotations, &mut report);
        self.archive(id, &outcome.batch, &mut report);
        report
    }

    fn deliver(&self, id: &StreamId, batch: &Batch, annotations: Vec<String>, report: &mut StreamReport) {
        let payload = LivePayload::new(id, batch.display.clone(), annotations);
        match self.live.deliver(payload) {
            Ok(()) => {
                report.delivered = true;
                if let Some(stats) = &self.stats {
                    stats.record_delivery();
                }
            }
            Err(e) => {
                tracing::warn!("Live delivery failed for {}: {}", id, e);
                if let Some(stats) = &self.stats {
                    stats.record_delivery_failure();
                }
                report.errors.push(e.to_string());
            }
        }
    }

    fn archive(&self, id: &StreamId, batch: &Batch, report: &mut StreamReport) {
        if batch.full_rate.is_empty() {
            return;
        }
        match self.archive.append(id, &batch.full_rate) {
            Ok(rows) => {
                report.archived_rows += rows;
                if let Some(stats) = &self.stats {
                    stats.record_archived(rows as u64);
                }
            }
            Err(e) => {
                tracing::error!("Failed to archive {} sample(s) for {}: {}", batch.full_rate.len(), id, e);
                report.errors.push(e.to_string());
            }
        }
    }

    /// Flush every stream's unfinished block into the archive.
    ///
    /// Meant for shutdown: a flushed stream restarts its blocks afterwards.
    pub fn flush_all(&self) -> usize {
        let mut archived = 0;
        for id in self.aggregator.stream_ids() {
            let Some(batch) = self.aggregator.flush(&id) else {
                continue;
            };
            let mut report = StreamReport::empty(&id, IngestStatus::Healthy);
            report.emitted_samples = batch.full_rate.len();
            self.archive(&id, &batch, &mut report);
            archived += report.archived_rows;
        }
        archived
    }
}
