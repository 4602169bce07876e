//! Data-provider portal capability
//!
//! The portal offers no data API, only an authenticated job workflow:
//! log in, submit an extraction job, watch the job history until it is
//! ready, download the result. [`PortalClient`] captures exactly those four
//! calls so the scheduler can run against the real portal or a fake.

use crate::{BinSize, ConfidenceScore, DateRange, Metric, TimeWindow, TravelTimeUnits};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod ritis;

/// Portal errors
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    /// Credentials rejected or session expired
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Portal refused the job description
    #[error("job rejected: {0}")]
    Rejected(String),

    /// Network-level failure (connection, timeout, 5xx)
    #[error("transport error: {0}")]
    Transport(String),

    /// Response did not have the expected shape
    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    /// No job with this handle is known to the portal
    #[error("job not found: {0}")]
    JobNotFound(String),
}

impl PortalError {
    /// Whether the error is worth retrying on the next poll
    pub fn is_transient(&self) -> bool {
        matches!(self, PortalError::Transport(_))
    }
}

/// Result type for portal operations
pub type PortalResult<T> = Result<T, PortalError>;

/// Authenticated session
///
/// Cookies live inside the client; the session carries what job submission
/// needs to know about the logged-in account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    account: String,
}

impl Session {
    /// Create a session for `account`
    pub fn new<S: Into<String>>(account: S) -> Self {
        Self {
            account: account.into(),
        }
    }

    /// Account the session belongs to
    pub fn account(&self) -> &str {
        &self.account
    }
}

/// Opaque identifier the portal uses to track one job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(String);

impl JobHandle {
    /// Wrap a portal-assigned identifier
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job state as reported by the portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Accepted, not started
    Pending,
    /// Being processed
    Processing,
    /// Result ready for download
    Ready,
    /// Processing failed
    Failed(String),
}

impl RemoteStatus {
    /// Whether the job will not change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteStatus::Ready | RemoteStatus::Failed(_))
    }
}

/// Raw downloaded result, usually a zip archive holding one CSV
pub type RawPayload = Bytes;

/// Everything the portal needs to run one extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    /// Job label shown in the portal history
    pub name: String,
    /// Inclusive calendar dates
    pub date_range: DateRange,
    /// Hours of each day to include
    pub window: TimeWindow,
    /// Segment identifiers
    pub segments: Vec<String>,
    /// Requested metric columns
    pub metrics: Vec<Metric>,
    /// Confidence tiers to include
    pub confidence_scores: Vec<ConfidenceScore>,
    /// Aggregation bin
    pub bin_size: BinSize,
    /// Travel-time units
    pub travel_time_units: TravelTimeUnits,
}

/// Portal capability used by the scheduler
#[async_trait]
pub trait PortalClient: Send + Sync {
    /// Log in and open a session
    async fn authenticate(&self) -> PortalResult<Session>;

    /// Submit a job, returning the handle used for polling and download
    async fn submit_job(&self, session: &Session, job: &JobDescription) -> PortalResult<JobHandle>;

    /// Current status of a submitted job
    async fn poll_status(&self, session: &Session, handle: &JobHandle) -> PortalResult<RemoteStatus>;

    /// Download the result of a ready job
    async fn fetch_result(&self, session: &Session, handle: &JobHandle) -> PortalResult<RawPayload>;
}
