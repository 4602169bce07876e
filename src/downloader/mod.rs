//! Job orchestration
//!
//! One extraction cycle is `submit -> poll -> retrieve`, always for a single
//! job at a time:
//!
//! 1. [`submitter::JobSubmitter`] validates a [`job::JobRequest`] and submits it
//! 2. [`poller::JobPoller`] waits for a terminal state with bounded backoff
//! 3. [`retriever::Retriever`] downloads the result and stores it
//!
//! [`scheduler::Scheduler`] composes these into single-shot, daily catch-up
//! and continuous runs, advancing the checkpoint after each stored day.
//!
//! # Error Handling
//!
//! Every failure is a [`DownloadError`]. Its [`FailureKind`] drives the
//! scheduler: configuration problems are fatal before any network traffic,
//! everything else stops the current pass and is retried by the next run.

pub mod clock;
pub mod config;
pub mod job;
pub mod poller;
pub mod progress;
pub mod retriever;
pub mod scheduler;
pub mod submitter;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, DownloadConfig, DownloadConfigBuilder, PollPolicy};
pub use job::{Job, JobRequest, JobStatus, SubmissionPolicy};
pub use poller::JobPoller;
pub use retriever::Retriever;
pub use scheduler::{CatchUpOutcome, CatchUpReport, ContinuousReport, Scheduler};
pub use submitter::JobSubmitter;

use crate::output::{OutputError, StoredResult};
use crate::portal::PortalError;
use crate::resume::CheckpointError;
use std::fmt;
use std::time::Duration;

/// Outcome of processing one date or range
pub type RunResult = Result<StoredResult, DownloadError>;

/// Why a submission failed
#[derive(Debug, thiserror::Error)]
pub enum SubmissionCause {
    /// The job broke a local rule and was never sent
    #[error("malformed job: {0}")]
    Malformed(String),

    /// The portal refused or could not be reached
    #[error(transparent)]
    Portal(#[from] PortalError),
}

/// Why a retrieval failed
#[derive(Debug, thiserror::Error)]
pub enum RetrievalCause {
    /// The job is not in the succeeded state
    #[error("job is {0}, not succeeded")]
    NotReady(JobStatus),

    /// The download failed
    #[error(transparent)]
    Portal(#[from] PortalError),

    /// The result could not be stored
    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Download errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Invalid configuration, detected before any network interaction
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Login rejected or session lost
    #[error("authentication error: {0}")]
    Auth(String),

    /// The job could not be submitted
    #[error("submission of {job} failed: {cause}")]
    Submission {
        /// Job name
        job: String,
        /// Underlying cause
        #[source]
        cause: SubmissionCause,
    },

    /// The job did not finish within the poll budget
    #[error("job {job} still not finished after {waited:?}")]
    PollTimeout {
        /// Job name
        job: String,
        /// Total time spent waiting
        waited: Duration,
    },

    /// The portal reported the job as failed
    #[error("job {job} failed on the portal: {reason}")]
    JobFailed {
        /// Job name
        job: String,
        /// Portal-provided reason
        reason: String,
    },

    /// The job succeeded remotely but its result could not be fetched or stored
    #[error("retrieval of {job} failed: {cause}")]
    Retrieval {
        /// Job name
        job: String,
        /// Underlying cause
        #[source]
        cause: RetrievalCause,
    },

    /// The checkpoint could not be updated
    #[error("checkpoint error: {0}")]
    Checkpoint(CheckpointError),

    /// Abort requested while a job was in flight
    #[error("aborted while waiting for job {job}")]
    Shutdown {
        /// Job name
        job: String,
    },
}

impl From<CheckpointError> for DownloadError {
    fn from(err: CheckpointError) -> Self {
        match err {
            // An unreadable checkpoint is a setup problem, not a run failure
            CheckpointError::Corrupt { .. } => {
                DownloadError::Configuration(ConfigError::CorruptCheckpoint(err.to_string()))
            }
            other => DownloadError::Checkpoint(other),
        }
    }
}

/// Coarse classification of a [`DownloadError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Invalid setup
    Configuration,
    /// Authentication
    Auth,
    /// Submission
    Submission,
    /// Poll budget exhausted
    PollTimeout,
    /// Remote job failure
    JobFailed,
    /// Fetch or storage
    Retrieval,
    /// Checkpoint persistence
    Checkpoint,
    /// Aborted
    Shutdown,
}

impl FailureKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Auth => "auth",
            FailureKind::Submission => "submission",
            FailureKind::PollTimeout => "poll_timeout",
            FailureKind::JobFailed => "job_failed",
            FailureKind::Retrieval => "retrieval",
            FailureKind::Checkpoint => "checkpoint",
            FailureKind::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl DownloadError {
    /// Classification of this error
    pub fn kind(&self) -> FailureKind {
        match self {
            DownloadError::Configuration(_) => FailureKind::Configuration,
            DownloadError::Auth(_) => FailureKind::Auth,
            DownloadError::Submission { .. } => FailureKind::Submission,
            DownloadError::PollTimeout { .. } => FailureKind::PollTimeout,
            DownloadError::JobFailed { .. } => FailureKind::JobFailed,
            DownloadError::Retrieval { .. } => FailureKind::Retrieval,
            DownloadError::Checkpoint(_) => FailureKind::Checkpoint,
            DownloadError::Shutdown { .. } => FailureKind::Shutdown,
        }
    }

    /// Whether running again later can succeed without changing the setup
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), FailureKind::Configuration)
    }

    /// Whether the portal rejected our credentials at any stage
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            DownloadError::Auth(_)
                | DownloadError::Submission {
                    cause: SubmissionCause::Portal(PortalError::Auth(_)),
                    ..
                }
                | DownloadError::Retrieval {
                    cause: RetrievalCause::Portal(PortalError::Auth(_)),
                    ..
                }
        )
    }
}
