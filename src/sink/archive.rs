//! Archival of full-rate filtered samples.
//!
//! The archive, not the pipeline, assigns timestamps: one sample period
//! apart within a batch, and strictly increasing across batches of the
//! same stream.

use crate::core::cascade::FilteredVector;
use crate::source::StreamId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// One archived sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRow {
    pub id: Uuid,
    pub project: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub values: FilteredVector,
    /// Set for operator-marked events, false for device samples
    #[serde(default)]
    pub event: bool,
}

/// Destination for full-rate samples.
pub trait ArchiveSink: Send + Sync {
    /// Append samples, stamping them as if the batch arrived at `now`.
    fn append_at(
        &self,
        stream: &StreamId,
        samples: &[FilteredVector],
        now: DateTime<Utc>,
    ) -> Result<usize, ArchiveError>;

    /// Rows of a stream with `start <= timestamp <= end`, in timestamp order.
    fn query(
        &self,
        stream: &StreamId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ArchiveRow>, ArchiveError>;

    fn append(&self, stream: &StreamId, samples: &[FilteredVector]) -> Result<usize, ArchiveError> {
        self.append_at(stream, samples, Utc::now())
    }
}

/// Archive errors.
#[derive(Debug)]
pub enum ArchiveError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveError::Io(e) => write!(f, "Archive IO error: {e}"),
            ArchiveError::Parse(e) => write!(f, "Archive parse error: {e}"),
        }
    }
}

impl std::error::Error for ArchiveError {}

impl From<std::io::Error> for ArchiveError {
    fn from(e: std::io::Error) -> Self {
        ArchiveError::Io(e.to_string())
    }
}

/// Per-stream sample clock.
#[derive(Debug, Clone)]
pub struct SampleClock {
    period: Duration,
    last: HashMap<StreamId, DateTime<Utc>>,
}

impl SampleClock {
    pub fn new(sampling_rate_hz: f64) -> Self {
        let nanos = (1e9 / sampling_rate_hz.max(f64::MIN_POSITIVE)).round() as i64;
        Self {
            period: Duration::nanoseconds(nanos.max(1)),
            last: HashMap::new(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Seed the last timestamp of a stream, e.g. from rows already on disk.
    pub fn observe(&mut self, stream: &StreamId, last: DateTime<Utc>) {
        let entry = self.last.entry(stream.clone()).or_insert(last);
        if last > *entry {
            *entry = last;
        }
    }

    pub fn last(&self, stream: &StreamId) -> Option<DateTime<Utc>> {
        self.last.get(stream).copied()
    }

    /// Timestamps for `count` new samples arriving at `now`.
    pub fn stamp(&mut self, stream: &StreamId, count: usize, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        if count == 0 {
            return Vec::new();
        }
        let start = match self.last.get(stream) {
            Some(last) => now.max(*last + self.period),
            None => now,
        };
        let stamps: Vec<DateTime<Utc>> = (0..count as i32)
            .map(|i| start + self.period * i)
            .collect();
        if let Some(last) = stamps.last() {
            self.last.insert(stream.clone(), *last);
        }
        stamps
    }
}

fn build_rows(stream: &StreamId, samples: &[FilteredVector], stamps: Vec<DateTime<Utc>>) -> Vec<ArchiveRow> {
    samples
        .iter()
        .zip(stamps)
        .map(|(values, timestamp)| ArchiveRow {
            id: Uuid::new_v4(),
            project: stream.project.clone(),
            subject: stream.subject.clone(),
            timestamp,
            values: *values,
            event: false,
        })
        .collect()
}

#[derive(Debug)]
struct MemoryInner {
    clock: SampleClock,
    rows: HashMap<StreamId, Vec<ArchiveRow>>,
}

/// In-memory archive.
#[derive(Debug)]
pub struct MemoryArchive {
    inner: Mutex<MemoryInner>,
}

impl MemoryArchive {
    pub fn new(sampling_rate_hz: f64) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                clock: SampleClock::new(sampling_rate_hz),
                rows: HashMap::new(),
            }),
        }
    }

    pub fn row_count(&self, stream: &StreamId) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.rows.get(stream).map(Vec::len).unwrap_or(0)
    }
}

impl ArchiveSink for MemoryArchive {
    fn append_at(
        &self,
        stream: &StreamId,
        samples: &[FilteredVector],
        now: DateTime<Utc>,
    ) -> Result<usize, ArchiveError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let stamps = inner.clock.stamp(stream, samples.len(), now);
        let rows = build_rows(stream, samples, stamps);
        let written = rows.len();
        inner.rows.entry(stream.clone()).or_default().extend(rows);
        Ok(written)
    }

    fn query(
        &self,
        stream: &StreamId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ArchiveRow>, ArchiveError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .rows
            .get(stream)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.timestamp >= start && row.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Archive writing one JSON-lines file per stream:
/// `<root>/<project>/<subject>.jsonl`.
#[derive(Debug)]
pub struct JsonlArchive {
    root: PathBuf,
    clock: Mutex<SampleClock>,
}

impl JsonlArchive {
    pub fn new(root: impl Into<PathBuf>, sampling_rate_hz: f64) -> Self {
        Self {
            root: root.into(),
            clock: Mutex::new(SampleClock::new(sampling_rate_hz)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_path(&self, stream: &StreamId) -> PathBuf {
        self.root
            .join(&stream.project)
            .join(format!("{}.jsonl", stream.subject))
    }

    fn read_rows(&self, stream: &StreamId) -> Result<Vec<ArchiveRow>, ArchiveError> {
        let path = self.file_path(stream);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(fs::File::open(&path)?);
        let mut rows = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row: ArchiveRow = serde_json::from_str(&line)
                .map_err(|e| ArchiveError::Parse(format!("{path:?} line {}: {e}", number + 1)))?;
            rows.push(row);
        }
        Ok(rows)
    }
}

impl ArchiveSink for JsonlArchive {
    fn append_at(
        &self,
        stream: &StreamId,
        samples: &[FilteredVector],
        now: DateTime<Utc>,
    ) -> Result<usize, ArchiveError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let mut clock = self.clock.lock().unwrap_or_else(PoisonError::into_inner);
        if clock.last(stream).is_none() {
            // Resume after rows written by an earlier run.
            if let Some(last) = self.read_rows(stream)?.iter().map(|r| r.timestamp).max() {
                clock.observe(stream, last);
            }
        }
        let stamps = clock.stamp(stream, samples.len(), now);
        let rows = build_rows(stream, samples, stamps);

        let path = self.file_path(stream);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        for row in &rows {
            let json = serde_json::to_string(row).map_err(|e| ArchiveError::Parse(e.to_string()))?;
            writeln!(writer, "{json}")?;
        }
        writer.flush()?;

        Ok(rows.len())
    }

    fn query(
        &self,
        stream: &StreamId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ArchiveRow>, ArchiveError> {
        let mut rows: Vec<ArchiveRow> = self
            .read_rows(stream)?
            .into_iter()
            .filter(|row| row.timestamp >= start && row.timestamp <= end)
            .collect();
        rows.sort_by_key(|row| row.timestamp);
        Ok(rows)
    }
}
