//! Result writers
//!
//! A writer turns the raw payload of a finished job into one durable table
//! file whose name depends only on the job's [`ResultKey`], so storing the
//! same key twice overwrites instead of duplicating.

use std::path::PathBuf;

pub mod csv;
pub mod path;

pub use path::{result_path, sanitize_label, ResultKey};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV read or write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Zip archive could not be read
    #[error("archive error: {0}")]
    ArchiveError(String),

    /// Payload held no bytes
    #[error("empty payload for {0}")]
    EmptyPayload(String),

    /// Archive held no CSV entry
    #[error("no CSV file found in archive for {0}")]
    MissingCsv(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// A result confirmed durable on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResult {
    /// Storage key the result was written under
    pub key: ResultKey,
    /// Final file location
    pub path: PathBuf,
    /// Data rows written, excluding the header
    pub rows: u64,
}

/// Stores a job's raw payload under its key
pub trait ResultWriter: Send + Sync {
    /// Persist `payload`; returns only once the file is durable
    fn store(&self, key: &ResultKey, payload: &[u8]) -> OutputResult<StoredResult>;
}
