//! Pipeline telemetry.
//!
//! Counters describing what the pipeline consumed and produced, persisted
//! between runs so `eeg-stream status` can report totals.

pub mod stats;

// Re-export commonly used types
pub use stats::{
    create_shared_stats, create_shared_stats_with_persistence, PipelineStats, SharedPipelineStats,
    StatsSnapshot,
};
