//! Checkpoint store: the last calendar date whose data is stored locally
//!
//! The checkpoint file holds a single human-readable date (`YYYY-MM-DD`). It is
//! the only persisted scheduling state. Writes go through a temp file in the
//! same directory followed by an atomic rename, under an advisory lock, so a
//! reader only ever sees the previous or the new date.

use chrono::{NaiveDate, NaiveDateTime};
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Format written to the checkpoint file
const CHECKPOINT_FORMAT: &str = "%Y-%m-%d";

/// Legacy format still accepted on load. It records the next date to fetch,
/// so the date before it is the last one stored.
const LEGACY_CHECKPOINT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Anything bigger than this is not a date
const MAX_CHECKPOINT_FILE_SIZE: u64 = 1024;

/// Result of an [`CheckpointStore::advance`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The checkpoint moved forward by one day
    Advanced,
    /// The checkpoint already held this date
    Unchanged,
}

/// Durable record of the last successfully stored date
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    default_checkpoint: NaiveDate,
}

impl CheckpointStore {
    /// Create a store whose value defaults to `default_checkpoint` when the
    /// file does not exist yet
    pub fn new<P: Into<PathBuf>>(path: P, default_checkpoint: NaiveDate) -> Self {
        Self {
            path: path.into(),
            default_checkpoint,
        }
    }

    /// Create a store for a history that begins at `history_start`.
    ///
    /// With no checkpoint file the first date fetched is `history_start`.
    pub fn for_history_start<P: Into<PathBuf>>(path: P, history_start: NaiveDate) -> Self {
        let default_checkpoint = history_start.pred_opt().unwrap_or(history_start);
        Self::new(path, default_checkpoint)
    }

    /// Checkpoint file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Value reported when no checkpoint has been written yet
    pub fn default_checkpoint(&self) -> NaiveDate {
        self.default_checkpoint
    }

    /// Load the last completed date, or the default when no file exists
    ///
    /// # Errors
    ///
    /// [`CheckpointError::Corrupt`] if the file does not hold a valid date.
    pub fn load(&self) -> Result<NaiveDate, CheckpointError> {
        debug!(path = %self.path.display(), "Loading checkpoint");

        let lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock
            .read()
            .map_err(|e| CheckpointError::Lock(format!("Failed to acquire read lock: {e}")))?;

        match self.read_stored()? {
            Some(date) => {
                info!(checkpoint = %date, "Checkpoint loaded");
                Ok(date)
            }
            None => {
                info!(
                    default = %self.default_checkpoint,
                    "No checkpoint file found, starting from configured history start"
                );
                Ok(self.default_checkpoint)
            }
        }
    }

    /// Persist `date` as the new checkpoint
    ///
    /// Advancing to the current value is a no-op. Any other value than the
    /// day after the current checkpoint is rejected, so the checkpoint never
    /// regresses and never skips a date.
    pub fn advance(&self, date: NaiveDate) -> Result<Advance, CheckpointError> {
        if let Some(parent) = self.parent_dir() {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
        }

        let mut lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock
            .write()
            .map_err(|e| CheckpointError::Lock(format!("Failed to acquire write lock: {e}")))?;

        let current = self.read_stored()?.unwrap_or(self.default_checkpoint);
        if date == current {
            debug!(checkpoint = %date, "Checkpoint already at date, nothing to do");
            return Ok(Advance::Unchanged);
        }
        if current.succ_opt() != Some(date) {
            warn!(
                current = %current,
                requested = %date,
                "Rejected non-sequential checkpoint advance"
            );
            return Err(CheckpointError::NonSequential {
                current,
                requested: date,
            });
        }

        self.write_atomic(date)?;

        info!(
            path = %self.path.display(),
            checkpoint = %date,
            "Checkpoint advanced"
        );
        Ok(Advance::Advanced)
    }

    fn parent_dir(&self) -> Option<&Path> {
        self.path.parent().filter(|p| !p.as_os_str().is_empty())
    }

    fn open_lock_file(&self) -> Result<File, CheckpointError> {
        let lock_path = self.path.with_extension("lock");
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| CheckpointError::Lock(format!("Failed to create lock file: {e}")))
    }

    /// Read the stored date without locking. Callers hold the lock.
    fn read_stored(&self) -> Result<Option<NaiveDate>, CheckpointError> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::Io(e.to_string())),
        };
        if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
            return Err(CheckpointError::Corrupt {
                path: self.path.display().to_string(),
                value: format!("<{} bytes>", metadata.len()),
            });
        }

        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| CheckpointError::Io(e.to_string()))?;
        parse_checkpoint(&contents)
            .map(Some)
            .map_err(|_| CheckpointError::Corrupt {
                path: self.path.display().to_string(),
                value: contents.trim().to_string(),
            })
    }

    fn write_atomic(&self, date: NaiveDate) -> Result<(), CheckpointError> {
        let parent_dir = self.parent_dir().unwrap_or_else(|| Path::new("."));
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| CheckpointError::Io(format!("Failed to create temp file: {e}")))?;

        writeln!(temp_file, "{}", date.format(CHECKPOINT_FORMAT))
            .map_err(|e| CheckpointError::Io(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| CheckpointError::Io(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| CheckpointError::Io(format!("Failed to sync temp file: {e}")))?;

        temp_file
            .persist(&self.path)
            .map_err(|e| CheckpointError::Io(format!("Failed to persist temp file: {e}")))?;

        // Make the rename itself durable
        match sync_dir(parent_dir) {
            Ok(()) => {}
            Err(e) => warn!(
                dir = %parent_dir.display(),
                error = %e,
                "Checkpoint directory sync failed; the update may not survive a crash"
            ),
        }
        Ok(())
    }
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Parse checkpoint file contents into the last stored date
///
/// A legacy `YYYY-MM-DD HH:MM:SS` value names the date the next run starts
/// from, whatever the time part, so it maps to the day before.
pub fn parse_checkpoint(contents: &str) -> Result<NaiveDate, chrono::ParseError> {
    let trimmed = contents.trim();
    NaiveDate::parse_from_str(trimmed, CHECKPOINT_FORMAT).or_else(|e| {
        NaiveDateTime::parse_from_str(trimmed, LEGACY_CHECKPOINT_FORMAT)
            .ok()
            .and_then(|dt| dt.date().pred_opt())
            .ok_or(e)
    })
}

/// Checkpoint errors
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Stored value is not a calendar date
    #[error("checkpoint file {path} is corrupt: '{value}' is not a valid date")]
    Corrupt {
        /// Checkpoint file path
        path: String,
        /// Offending contents
        value: String,
    },

    /// Advance would regress or skip dates
    #[error("checkpoint at {current} cannot move to {requested}")]
    NonSequential {
        /// Stored checkpoint
        current: NaiveDate,
        /// Requested value
        requested: NaiveDate,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Lock error
    #[error("lock error: {0}")]
    Lock(String),
}
