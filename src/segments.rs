//! Segment identifier parsing and segment list loading
//!
//! A segment list is a flat text file of provider segment identifiers, one per
//! line. Commas are accepted as separators too, blank lines and `#` comments
//! are ignored, and duplicates are dropped keeping the first occurrence.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Provider-specific roadway segment identifier (e.g. an INRIX XD id)
///
/// # Examples
///
/// ```
/// use segment_data_downloader::SegmentId;
///
/// let id = SegmentId::parse(" 1524643473 ").unwrap();
/// assert_eq!(id.as_str(), "1524643473");
/// assert!(SegmentId::parse("12 34").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(String);

impl SegmentId {
    /// Parse a single identifier, trimming surrounding whitespace
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty or contains characters
    /// other than ASCII alphanumerics, `-` and `_`.
    pub fn parse(s: &str) -> Result<Self, SegmentError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SegmentError::InvalidId(
                "segment identifier cannot be empty".to_string(),
            ));
        }
        if let Some(c) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(SegmentError::InvalidId(format!(
                "segment identifier '{trimmed}' contains invalid character '{c}'"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Identifier as sent to the portal
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The fixed, non-empty set of segments requested in every job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSet {
    ids: Vec<SegmentId>,
}

impl SegmentSet {
    /// Build a set from identifiers, dropping duplicates in order
    pub fn new<I>(ids: I) -> Result<Self, SegmentError>
    where
        I: IntoIterator<Item = SegmentId>,
    {
        let mut seen = HashSet::new();
        let ids: Vec<SegmentId> = ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        if ids.is_empty() {
            return Err(SegmentError::Empty);
        }
        Ok(Self { ids })
    }

    /// Parse segment list contents
    pub fn parse(contents: &str) -> Result<Self, SegmentError> {
        let mut ids = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = match line.find('#') {
                Some(idx) => &line[..idx],
                None => line,
            };
            for token in line.split(',') {
                if token.trim().is_empty() {
                    continue;
                }
                let id = SegmentId::parse(token).map_err(|e| match e {
                    SegmentError::InvalidId(msg) => {
                        SegmentError::InvalidId(format!("line {}: {msg}", line_no + 1))
                    }
                    other => other,
                })?;
                ids.push(id);
            }
        }
        Self::new(ids)
    }

    /// Load a segment list file
    ///
    /// A missing or empty file is a configuration error: the caller should
    /// treat it as fatal at startup.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SegmentError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading segment list");

        let contents = std::fs::read_to_string(path).map_err(|e| SegmentError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let set = Self::parse(&contents)?;

        info!(
            path = %path.display(),
            segments = set.len(),
            "Segment list loaded"
        );
        Ok(set)
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always false for a constructed set; provided for API completeness
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate the identifiers in file order
    pub fn iter(&self) -> impl Iterator<Item = &SegmentId> {
        self.ids.iter()
    }

    /// Identifiers as plain strings, in file order
    pub fn to_strings(&self) -> Vec<String> {
        self.ids.iter().map(|id| id.as_str().to_string()).collect()
    }
}

/// Segment list errors
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// Segment file could not be read
    #[error("cannot read segment file {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },

    /// A malformed identifier
    #[error("invalid segment identifier: {0}")]
    InvalidId(String),

    /// No identifiers at all
    #[error("segment list is empty")]
    Empty,
}
