//! Live delivery to viewers.

use crate::core::cascade::FilteredVector;
use crate::source::StreamId;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

/// What a live viewer receives after each poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePayload {
    pub project: String,
    pub subject: String,
    pub samples: Vec<FilteredVector>,
    pub annotations: Vec<String>,
}

impl LivePayload {
    pub fn new(stream: &StreamId, samples: Vec<FilteredVector>, annotations: Vec<String>) -> Self {
        Self {
            project: stream.project.clone(),
            subject: stream.subject.clone(),
            samples,
            annotations,
        }
    }
}

/// Push mechanism keyed by subject.
pub trait LiveSink: Send + Sync {
    /// Hand a payload over without blocking.
    fn deliver(&self, payload: LivePayload) -> Result<(), DeliveryError>;
}

/// Live delivery errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The consumer is not keeping up
    Full,
    /// The consumer is gone
    Disconnected,
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Full => write!(f, "Live channel is full"),
            DeliveryError::Disconnected => write!(f, "Live channel is disconnected"),
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Live sink backed by a bounded crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelLiveSink {
    sender: Sender<LivePayload>,
}

impl ChannelLiveSink {
    /// Create a sink and the receiver viewers read from.
    pub fn new(capacity: usize) -> (Self, Receiver<LivePayload>) {
        let (sender, receiver) = bounded(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl LiveSink for ChannelLiveSink {
    fn deliver(&self, payload: LivePayload) -> Result<(), DeliveryError> {
        self.sender.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Disconnected(_) => DeliveryError::Disconnected,
        })
    }
}

/// Live sink that discards everything, for headless runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLiveSink;

impl LiveSink for NoopLiveSink {
    fn deliver(&self, _payload: LivePayload) -> Result<(), DeliveryError> {
        Ok(())
    }
}
