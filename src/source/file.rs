//! Directory-backed frame source.
//!
//! Layout, one directory per stream:
//!
//! ```text
//! <root>/<project>/<subject>/frames.log    one raw frame per line
//! <root>/<project>/<subject>/comments.log  one annotation per line
//! ```

use crate::source::types::{RawFrame, StreamId};
use crate::source::{FrameSource, SourceError};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

const FRAMES_FILE: &str = "frames.log";
const COMMENTS_FILE: &str = "comments.log";

/// Where the last read of a frames file stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ReadPosition {
    /// Frames before `byte`
    line: u64,
    /// Offset just past the last complete line read
    byte: u64,
}

/// Reads (and, for tools and tests, appends) frames under a root directory.
///
/// Each stream remembers the byte offset its last read stopped at, so a
/// poll reads only the lines appended since. Clones share those offsets.
#[derive(Debug, Clone)]
pub struct FileFrameSource {
    root: PathBuf,
    positions: Arc<Mutex<HashMap<StreamId, ReadPosition>>>,
}

impl FileFrameSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            positions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stream_dir(&self, stream: &StreamId) -> PathBuf {
        self.root.join(&stream.project).join(&stream.subject)
    }

    /// Append frames to a stream, creating its directory if needed.
    pub fn append_frames<I, F>(&self, stream: &StreamId, frames: I) -> Result<usize, SourceError>
    where
        I: IntoIterator<Item = F>,
        F: AsRef<str>,
    {
        self.append_lines(stream, FRAMES_FILE, frames)
    }

    /// Append annotation entries to a stream.
    pub fn append_comments<I, F>(&self, stream: &StreamId, comments: I) -> Result<usize, SourceError>
    where
        I: IntoIterator<Item = F>,
        F: AsRef<str>,
    {
        self.append_lines(stream, COMMENTS_FILE, comments)
    }

    fn append_lines<I, F>(&self, stream: &StreamId, name: &str, lines: I) -> Result<usize, SourceError>
    where
        I: IntoIterator<Item = F>,
        F: AsRef<str>,
    {
        let dir = self.stream_dir(stream);
        fs::create_dir_all(&dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(name))?;

        let mut written = 0;
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() || line.contains('\n') {
                continue;
            }
            writeln!(file, "{line}")?;
            written += 1;
        }
        Ok(written)
    }

    fn read_lines(&self, path: &Path) -> Result<Vec<String>, SourceError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        let mut lines = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Read frames from `cursor` on, resuming from the remembered offset when
    /// it lies at or before `cursor`. A trailing line without a newline is
    /// still being written and is left for the next read.
    fn read_frames(&self, stream: &StreamId, cursor: u64) -> Result<Vec<RawFrame>, SourceError> {
        let path = self.stream_dir(stream).join(FRAMES_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut file = fs::File::open(&path)?;
        let len = file.metadata()?.len();

        let start = self
            .positions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(stream)
            .copied()
            .filter(|p| p.line <= cursor && p.byte <= len)
            .unwrap_or_default();
        file.seek(SeekFrom::Start(start.byte))?;

        let mut reader = BufReader::new(file);
        let mut position = start;
        let mut frames = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 || !line.ends_with('\n') {
                break;
            }
            position.byte += read as u64;
            let frame = line.trim();
            if frame.is_empty() {
                continue;
            }
            if position.line >= cursor {
                frames.push(frame.to_string());
            }
            position.line += 1;
        }

        self.positions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(stream.clone(), position);
        Ok(frames)
    }

    fn check_root(&self) -> Result<(), SourceError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(SourceError::Unavailable(format!(
                "source directory {:?} does not exist",
                self.root
            )))
        }
    }
}

impl FrameSource for FileFrameSource {
    fn frames_since(&self, stream: &StreamId, cursor: u64) -> Result<Vec<RawFrame>, SourceError> {
        self.check_root()?;
        self.read_frames(stream, cursor)
    }

    fn annotations(&self, stream: &StreamId, limit: usize) -> Result<Vec<String>, SourceError> {
        self.check_root()?;
        let mut lines = self.read_lines(&self.stream_dir(stream).join(COMMENTS_FILE))?;
        let start = lines.len().saturating_sub(limit);
        Ok(lines.split_off(start))
    }

    fn streams(&self) -> Result<Vec<StreamId>, SourceError> {
        self.check_root()?;
        let mut ids = Vec::new();

        for project in fs::read_dir(&self.root)? {
            let project = project?;
            if !project.file_type()?.is_dir() {
                continue;
            }
            for subject in fs::read_dir(project.path())? {
                let subject = subject?;
                if subject.path().join(FRAMES_FILE).is_file() {
                    ids.push(StreamId::new(
                        project.file_name().to_string_lossy(),
                        subject.file_name().to_string_lossy(),
                    ));
                }
            }
        }

        ids.sort();
        tracing::debug!("File source found {} stream(s) under {:?}", ids.len(), self.root);
        Ok(ids)
    }
}
