//! Job status polling
//!
//! State machine: `Submitted -> Running -> {Succeeded, Failed}`, plus a
//! synthetic timeout when the poll budget runs out. Each poll is preceded by
//! a backoff delay from the [`PollPolicy`]; the poller gives up before a
//! delay that would take the total wait past the budget, so it never sleeps
//! longer than the budget allows.

use super::config::PollPolicy;
use super::job::{Job, JobStatus};
use super::DownloadError;
use crate::metrics;
use crate::portal::{PortalClient, PortalError, RemoteStatus, Session};
use crate::shutdown::{SharedShutdown, SleepOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Waits for a submitted job to reach a terminal state
pub struct JobPoller {
    portal: Arc<dyn PortalClient>,
    policy: PollPolicy,
    shutdown: Option<SharedShutdown>,
}

impl JobPoller {
    /// Create a poller
    pub fn new(portal: Arc<dyn PortalClient>, policy: PollPolicy) -> Self {
        Self {
            portal,
            policy,
            shutdown: None,
        }
    }

    /// Let an abort request interrupt the backoff sleep
    pub fn with_shutdown(mut self, shutdown: Option<SharedShutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Poll until `job` succeeds
    ///
    /// # Errors
    ///
    /// - [`DownloadError::JobFailed`] if the portal reports failure
    /// - [`DownloadError::PollTimeout`] when the budget is exhausted
    /// - [`DownloadError::Auth`] if the session is rejected while polling
    /// - [`DownloadError::Shutdown`] on abort
    ///
    /// Other portal errors are logged and retried at the next delay.
    pub async fn wait(&self, session: &Session, job: &mut Job) -> Result<(), DownloadError> {
        let mut waited = Duration::ZERO;
        let mut attempt: u32 = 0;

        loop {
            let delay = self.policy.delay_for(attempt);
            if waited + delay > self.policy.budget() {
                metrics::record_poll_timeout();
                warn!(
                    job = %job.name(),
                    waited_secs = waited.as_secs(),
                    polls = attempt,
                    status = %job.status(),
                    "Poll budget exhausted"
                );
                return Err(DownloadError::PollTimeout {
                    job: job.name().to_string(),
                    waited,
                });
            }

            debug!(job = %job.name(), delay_secs = delay.as_secs(), "Waiting before next poll");
            if self.sleep(delay).await == SleepOutcome::Interrupted {
                warn!(job = %job.name(), "Abort requested, abandoning in-flight job");
                return Err(DownloadError::Shutdown {
                    job: job.name().to_string(),
                });
            }
            waited += delay;
            attempt += 1;

            match self.portal.poll_status(session, job.handle()).await {
                Ok(status) => {
                    let previous = job.status();
                    job.observe(JobStatus::from(&status));
                    metrics::record_poll(&job.status().to_string());
                    if job.status() != previous {
                        info!(
                            job = %job.name(),
                            from = %previous,
                            to = %job.status(),
                            waited_secs = waited.as_secs(),
                            "Job status changed"
                        );
                    }

                    match status {
                        RemoteStatus::Ready => return Ok(()),
                        RemoteStatus::Failed(reason) => {
                            return Err(DownloadError::JobFailed {
                                job: job.name().to_string(),
                                reason,
                            })
                        }
                        RemoteStatus::Pending | RemoteStatus::Processing => {}
                    }
                }
                Err(PortalError::Auth(message)) => {
                    return Err(DownloadError::Auth(message));
                }
                Err(e) => {
                    metrics::record_poll("error");
                    warn!(
                        job = %job.name(),
                        error = %e,
                        transient = e.is_transient(),
                        attempt = attempt,
                        "Status poll failed, will retry"
                    );
                }
            }
        }
    }

    async fn sleep(&self, delay: Duration) -> SleepOutcome {
        match &self.shutdown {
            Some(shutdown) => shutdown.sleep_unless_abort(delay).await,
            None => {
                tokio::time::sleep(delay).await;
                SleepOutcome::Elapsed
            }
        }
    }
}
