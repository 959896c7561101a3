//! Block detrending.
//!
//! Each channel is cut into contiguous blocks of a fixed size and the block
//! statistic (mean or median) is subtracted from every sample of the block.
//! A trailing block shorter than the block size uses its own statistic.

use crate::core::cascade::FilteredVector;
use crate::core::decoder::CHANNELS;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Median, Statistics};

/// Default block length in samples.
pub const DEFAULT_BLOCK_SIZE: usize = 50;

/// Statistic removed from each block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetrendMode {
    #[default]
    Mean,
    Median,
}

impl DetrendMode {
    /// Compute the statistic of a non-empty block of values.
    pub fn statistic(self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            DetrendMode::Mean => values.iter().mean(),
            DetrendMode::Median => Data::new(values.to_vec()).median(),
        }
    }
}

impl std::str::FromStr for DetrendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(DetrendMode::Mean),
            "median" => Ok(DetrendMode::Median),
            other => Err(format!("unknown detrend mode '{other}'")),
        }
    }
}

/// Detrend one block in place, channel by channel.
pub fn detrend_block(block: &mut [FilteredVector], mode: DetrendMode) {
    if block.is_empty() {
        return;
    }
    let mut column = Vec::with_capacity(block.len());
    for channel in 0..CHANNELS {
        column.clear();
        column.extend(block.iter().map(|sample| sample[channel]));
        let offset = mode.statistic(&column);
        for sample in block.iter_mut() {
            sample[channel] -= offset;
        }
    }
}

/// Detrend a whole sequence block by block, starting at its first sample.
pub fn detrend_blocks(samples: &mut [FilteredVector], block_size: usize, mode: DetrendMode) {
    for block in samples.chunks_mut(block_size.max(1)) {
        detrend_block(block, mode);
    }
}

/// Streaming detrender that carries an unfinished block between calls.
///
/// Only completed blocks leave [`BlockDetrender::push`], so the emitted
/// values do not depend on how the input was chunked.
#[derive(Debug, Clone)]
pub struct BlockDetrender {
    block_size: usize,
    mode: DetrendMode,
    pending: Vec<FilteredVector>,
}

impl BlockDetrender {
    pub fn new(block_size: usize, mode: DetrendMode) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            mode,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Add samples and return every block completed by them, detrended.
    pub fn push(&mut self, samples: Vec<FilteredVector>) -> Vec<FilteredVector> {
        self.pending.extend(samples);

        let complete = self.pending.len() - self.pending.len() % self.block_size;
        if complete == 0 {
            return Vec::new();
        }

        let remainder = self.pending.split_off(complete);
        let mut ready = std::mem::replace(&mut self.pending, remainder);
        detrend_blocks(&mut ready, self.block_size, self.mode);
        ready
    }

    /// Emit the unfinished block, detrended with its own statistic.
    pub fn flush(&mut self) -> Vec<FilteredVector> {
        let mut partial = std::mem::take(&mut self.pending);
        detrend_block(&mut partial, self.mode);
        partial
    }

    /// Number of samples waiting for their block to complete.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn mode(&self) -> DetrendMode {
        self.mode
    }
}
