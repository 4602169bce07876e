//! Extraction jobs and their lifecycle

use super::config::DownloadConfig;
use crate::portal::{JobDescription, JobHandle, RemoteStatus};
use crate::segments::SegmentSet;
use crate::{DateRange, TimeWindow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local view of a job's state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted by the portal, not yet seen running
    #[default]
    Submitted,
    /// The portal is working on it
    Running,
    /// Result ready
    Succeeded,
    /// The portal gave up on it
    Failed,
}

impl JobStatus {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl From<&RemoteStatus> for JobStatus {
    fn from(status: &RemoteStatus) -> Self {
        match status {
            RemoteStatus::Pending => JobStatus::Submitted,
            RemoteStatus::Processing => JobStatus::Running,
            RemoteStatus::Ready => JobStatus::Succeeded,
            RemoteStatus::Failed(_) => JobStatus::Failed,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Which date ranges a submission may ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionPolicy {
    /// Historical day: must end no later than yesterday
    CatchUp,
    /// Explicit user range: anything goes
    SingleShot,
    /// Partial day: today only
    IntradayRefresh,
}

/// A job description plus the rule it must satisfy
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// What to submit
    pub description: JobDescription,
    /// Range policy checked before submission
    pub policy: SubmissionPolicy,
}

impl JobRequest {
    fn build(
        config: &DownloadConfig,
        segments: &SegmentSet,
        name: String,
        date_range: DateRange,
        window: TimeWindow,
        policy: SubmissionPolicy,
    ) -> Self {
        Self {
            description: JobDescription {
                name,
                date_range,
                window,
                segments: segments.to_strings(),
                metrics: config.metrics().to_vec(),
                confidence_scores: config.confidence_scores().to_vec(),
                bin_size: config.bin_size(),
                travel_time_units: config.travel_time_units(),
            },
            policy,
        }
    }

    /// One historical day, named `YYYY-MM-DD`
    pub fn for_date(config: &DownloadConfig, segments: &SegmentSet, date: NaiveDate) -> Self {
        Self::build(
            config,
            segments,
            date.format("%Y-%m-%d").to_string(),
            DateRange::single(date),
            config.window(),
            SubmissionPolicy::CatchUp,
        )
    }

    /// A user-chosen range under an already sanitized label
    pub fn single_shot(
        config: &DownloadConfig,
        segments: &SegmentSet,
        range: DateRange,
        label: &str,
    ) -> Self {
        Self::build(
            config,
            segments,
            label.to_string(),
            range,
            config.window(),
            SubmissionPolicy::SingleShot,
        )
    }

    /// Part of today, named `YYYY-MM-DD-HHMM` after the window end
    pub fn refresh(
        config: &DownloadConfig,
        segments: &SegmentSet,
        today: NaiveDate,
        window: TimeWindow,
    ) -> Self {
        let name = format!(
            "{}-{}",
            today.format("%Y-%m-%d"),
            window.end().format("%H%M")
        );
        Self::build(
            config,
            segments,
            name,
            DateRange::single(today),
            window,
            SubmissionPolicy::IntradayRefresh,
        )
    }
}

/// A submitted job
///
/// Created by the submitter, moved through its states by the poller and
/// consumed once by the retriever. Never persisted.
#[derive(Debug, Clone)]
pub struct Job {
    description: JobDescription,
    handle: JobHandle,
    status: JobStatus,
}

impl Job {
    /// A freshly submitted job
    pub fn new(description: JobDescription, handle: JobHandle) -> Self {
        Self {
            description,
            handle,
            status: JobStatus::Submitted,
        }
    }

    /// Job label
    pub fn name(&self) -> &str {
        &self.description.name
    }

    /// Requested dates
    pub fn date_range(&self) -> DateRange {
        self.description.date_range
    }

    /// What was submitted
    pub fn description(&self) -> &JobDescription {
        &self.description
    }

    /// Portal handle
    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    /// Current state
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Record a state observed on the portal. Terminal states stick.
    pub(crate) fn observe(&mut self, status: JobStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }
}
