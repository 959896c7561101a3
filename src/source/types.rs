//! Stream identity and raw frame types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An opaque text frame as pushed by the acquisition device.
pub type RawFrame = String;

/// Identity of a stream: one subject within one project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    pub project: String,
    pub subject: String,
}

impl StreamId {
    pub fn new(project: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            subject: subject.into(),
        }
    }

    /// Key of the device's frame list in the upstream store.
    pub fn frames_key(&self) -> String {
        format!("proyecto:{}:{}:datos", self.project, self.subject)
    }

    /// Key of the annotation list in the upstream store.
    pub fn comments_key(&self) -> String {
        format!("proyecto:{}:{}:comentarios", self.project, self.subject)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.subject)
    }
}

/// Error parsing a `project/subject` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStreamIdError(String);

impl fmt::Display for ParseStreamIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid stream id '{}', expected <project>/<subject>", self.0)
    }
}

impl std::error::Error for ParseStreamIdError {}

impl FromStr for StreamId {
    type Err = ParseStreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((project, subject))
                if !project.is_empty() && !subject.is_empty() && !subject.contains('/') =>
            {
                Ok(StreamId::new(project, subject))
            }
            _ => Err(ParseStreamIdError(s.to_string())),
        }
    }
}
