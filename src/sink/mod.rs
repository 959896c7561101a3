//! Outbound collaborators: live delivery, archival and export.

pub mod archive;
pub mod csv;
pub mod live;

pub use archive::{ArchiveError, ArchiveRow, ArchiveSink, JsonlArchive, MemoryArchive, SampleClock};
pub use csv::{write_csv, CsvMeta, CsvUnits};
pub use live::{ChannelLiveSink, DeliveryError, LivePayload, LiveSink, NoopLiveSink};
