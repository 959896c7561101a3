//! Decode and filter core.
//!
//! This module contains:
//! - Frame decoding and baseline normalization
//! - Biquad design and the per-channel filter cascade
//! - Block detrending
//! - The per-stream aggregator and annotation formatting

pub mod aggregator;
pub mod annotations;
pub mod biquad;
pub mod cascade;
pub mod decoder;
pub mod detrend;
pub mod normalize;

// Re-export commonly used types
pub use aggregator::{
    AggregatorSettings, Batch, EvictedStream, IngestOutcome, IngestStatus, SharedAggregator,
    StreamAggregator, StreamSnapshot,
};
pub use annotations::{format_annotation, ANNOTATION_LIMIT};
pub use biquad::{Biquad, BiquadCoefficients, BiquadState, FilterKind};
pub use cascade::{CascadeDesign, CascadeState, FilterCascade, FilteredVector};
pub use decoder::{decode, decode_with_report, DecodeReport, SampleVector, CHANNELS};
pub use detrend::{BlockDetrender, DetrendMode};
pub use normalize::{normalize, offset_to_millivolts, to_millivolts, BASELINE_OFFSET};

/// Channel labels in acquisition order.
pub const CHANNEL_LABELS: [&str; CHANNELS] = ["FP1", "FP2", "T3", "T4", "O1", "O2", "C3", "C4"];
