//! EEG Stream Pipeline - decode and filter 8-channel EEG pushed as framed text.
//!
//! An acquisition device appends text frames to an append-only store. This
//! library turns those frames into filtered, display-ready samples, one
//! stream per (project, subject).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       EEG Stream Pipeline                        │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────────┐  │
//! │  │  Source  │──▶│  Decode  │──▶│ Normalize │──▶│   Cascade    │  │
//! │  │ (cursor) │   │ (frames) │   │  (-32768) │   │ notch/HP/LP  │  │
//! │  └──────────┘   └──────────┘   └───────────┘   └──────────────┘  │
//! │                                                       │          │
//! │                                                       ▼          │
//! │  ┌──────────┐   ┌──────────┐                   ┌──────────────┐  │
//! │  │   Live   │◀──│ Decimate │◀──────────────────│   Detrend    │  │
//! │  │   sink   │   │  round   │──▶ Archive        │  (blocks)    │  │
//! │  └──────────┘   └──────────┘                   └──────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use eeg_stream_pipeline::core::StreamAggregator;
//! use eeg_stream_pipeline::source::{StreamId, SyntheticDevice};
//!
//! let aggregator = StreamAggregator::default();
//! let stream = StreamId::new("PEPI", "demo");
//! let frames = SyntheticDevice::default().frames(2);
//!
//! let batch = aggregator.ingest(&stream, &frames);
//! assert_eq!(batch.decoded_samples, 1000);
//! assert_eq!(batch.display.len(), 200);
//! ```

pub mod config;
pub mod core;
pub mod pump;
pub mod sink;
pub mod source;
pub mod telemetry;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, PipelineConfig};
pub use core::{
    decode, normalize, AggregatorSettings, Batch, FilterCascade, IngestOutcome, IngestStatus,
    StreamAggregator,
};
pub use pump::{Pump, PumpReport};
pub use source::{FrameSource, SourceError, StreamId};
pub use telemetry::{PipelineStats, SharedPipelineStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
