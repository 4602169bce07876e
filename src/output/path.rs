//! Deterministic result file naming
//!
//! Catch-up days and intraday refreshes are stored as `<dir>/<YYYY-MM-DD>.csv`;
//! single-shot ranges as `<dir>/<label>.csv` with the label sanitized so it is
//! safe both as a file name and as a portal job name.

use chrono::NaiveDate;
use std::fmt;
use std::path::{Path, PathBuf};

/// File extension of stored results
pub const RESULT_EXTENSION: &str = "csv";

/// What a stored result is filed under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultKey {
    /// One calendar day
    Date(NaiveDate),
    /// A sanitized single-shot label
    Label(String),
}

impl ResultKey {
    /// Key for a free-form label
    ///
    /// # Errors
    ///
    /// Returns an error if nothing usable is left after sanitizing.
    pub fn label(raw: &str) -> Result<Self, String> {
        let label = sanitize_label(raw);
        if label.is_empty() {
            return Err(format!("label '{raw}' has no usable characters"));
        }
        Ok(ResultKey::Label(label))
    }

    /// File stem for this key
    pub fn file_stem(&self) -> String {
        match self {
            ResultKey::Date(date) => date.format("%Y-%m-%d").to_string(),
            ResultKey::Label(label) => label.clone(),
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_stem())
    }
}

/// Make a label safe for file names and the portal
///
/// Spaces become underscores; anything other than ASCII alphanumerics, `-`,
/// `_` and `.` is dropped, as are leading dots.
pub fn sanitize_label(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') => Some(c),
            _ => None,
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

/// Final path of the result stored under `key`
pub fn result_path(dir: &Path, key: &ResultKey) -> PathBuf {
    dir.join(format!("{}.{RESULT_EXTENSION}", key.file_stem()))
}
