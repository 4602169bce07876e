//! Job submission

use super::clock::Clock;
use super::job::{Job, JobRequest, SubmissionPolicy};
use super::{DownloadError, SubmissionCause};
use crate::metrics;
use crate::portal::{PortalClient, Session};
use std::sync::Arc;
use tracing::{info, warn};

/// Validates job requests and hands them to the portal
///
/// Submission is attempted exactly once; a failed submission is reported,
/// never retried here.
pub struct JobSubmitter {
    portal: Arc<dyn PortalClient>,
    clock: Arc<dyn Clock>,
}

impl JobSubmitter {
    /// Create a submitter
    pub fn new(portal: Arc<dyn PortalClient>, clock: Arc<dyn Clock>) -> Self {
        Self { portal, clock }
    }

    /// Check `request` against its policy and submit it
    pub async fn submit(&self, session: &Session, request: JobRequest) -> Result<Job, DownloadError> {
        let name = request.description.name.clone();
        if let Err(reason) = self.validate(&request) {
            warn!(job = %name, reason = %reason, "Refusing to submit malformed job");
            return Err(DownloadError::Submission {
                job: name,
                cause: SubmissionCause::Malformed(reason),
            });
        }

        let handle = self
            .portal
            .submit_job(session, &request.description)
            .await
            .map_err(|e| DownloadError::Submission {
                job: name.clone(),
                cause: SubmissionCause::Portal(e),
            })?;

        metrics::record_job_submitted();
        info!(
            job = %name,
            handle = %handle,
            range = %request.description.date_range,
            window = %request.description.window,
            "Job submitted"
        );
        Ok(Job::new(request.description, handle))
    }

    fn validate(&self, request: &JobRequest) -> Result<(), String> {
        let description = &request.description;
        if description.segments.is_empty() {
            return Err("segment set is empty".to_string());
        }
        if description.name.trim().is_empty() {
            return Err("job name is empty".to_string());
        }

        let range = description.date_range;
        match request.policy {
            SubmissionPolicy::CatchUp => {
                let yesterday = self.clock.yesterday();
                if range.end() > yesterday {
                    return Err(format!(
                        "catch-up range {range} extends past yesterday ({yesterday})"
                    ));
                }
            }
            SubmissionPolicy::IntradayRefresh => {
                let today = self.clock.today();
                if range.start() != today || range.end() != today {
                    return Err(format!("intraday refresh must cover only today ({today}), got {range}"));
                }
            }
            SubmissionPolicy::SingleShot => {}
        }
        Ok(())
    }
}
