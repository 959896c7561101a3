//! CSV export of archived rows.
//!
//! The header is a block of `%`-prefixed comment lines that downstream
//! biosignal converters read before the data rows.

use crate::core::normalize::offset_to_millivolts;
use crate::core::CHANNEL_LABELS;
use crate::sink::archive::ArchiveRow;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Unit of the exported values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CsvUnits {
    /// Filtered acquisition codes, as archived
    #[default]
    Codes,
    /// Millivolts
    Millivolts,
}

impl CsvUnits {
    fn label(self) -> &'static str {
        match self {
            CsvUnits::Codes => "codes",
            CsvUnits::Millivolts => "mV",
        }
    }

    fn convert(self, value: f64) -> f64 {
        match self {
            CsvUnits::Codes => value,
            CsvUnits::Millivolts => (offset_to_millivolts(value) * 100.0).round() / 100.0,
        }
    }
}

impl std::str::FromStr for CsvUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "codes" => Ok(CsvUnits::Codes),
            "mv" | "millivolts" => Ok(CsvUnits::Millivolts),
            other => Err(format!("unknown unit '{other}'")),
        }
    }
}

/// Header fields of an export.
#[derive(Debug, Clone)]
pub struct CsvMeta {
    pub title: String,
    pub patient: String,
    pub sampling_rate_hz: f64,
    pub units: CsvUnits,
    /// Prefix each row with its RFC 3339 timestamp
    pub include_timestamps: bool,
}

impl CsvMeta {
    pub fn new(patient: impl Into<String>, sampling_rate_hz: f64) -> Self {
        Self {
            title: "EEG recording".to_string(),
            patient: patient.into(),
            sampling_rate_hz,
            units: CsvUnits::default(),
            include_timestamps: false,
        }
    }
}

/// Write `rows` as CSV. Returns the number of data rows written.
pub fn write_csv<W: Write>(rows: &[ArchiveRow], meta: &CsvMeta, writer: &mut W) -> io::Result<usize> {
    writeln!(writer, "% {}", meta.title)?;
    writeln!(writer, "% Patient: {}", meta.patient)?;
    writeln!(writer, "% Sampling rate: {} Hz", meta.sampling_rate_hz)?;
    writeln!(writer)?;
    writeln!(writer, "% Channels: {}", CHANNEL_LABELS.len())?;
    writeln!(writer, "% {}", CHANNEL_LABELS.join(","))?;
    writeln!(writer, "% Units: {}", meta.units.label())?;
    writeln!(writer)?;

    let mut written = 0;
    for row in rows.iter().filter(|row| !row.event) {
        let values: Vec<String> = row
            .values
            .iter()
            .map(|v| meta.units.convert(*v).to_string())
            .collect();
        if meta.include_timestamps {
            writeln!(writer, "{},{}", row.timestamp.to_rfc3339(), values.join(","))?;
        } else {
            writeln!(writer, "{}", values.join(","))?;
        }
        written += 1;
    }

    writer.flush()?;
    Ok(written)
}
