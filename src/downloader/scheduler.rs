//! Run modes
//!
//! Every mode is built from one primitive, processing a single job
//! (`submit -> poll -> retrieve`), which never touches the checkpoint:
//!
//! - **single-shot**: one job for an explicit range, stored under a label
//! - **daily catch-up**: every date after the checkpoint through yesterday,
//!   in order, advancing the checkpoint after each stored date and stopping
//!   at the first failure
//! - **continuous**: a catch-up pass, then repeated refreshes of today's
//!   partial data until the end of activity. Today is never
//!   checkpointed; the next catch-up fetches it in full once it is yesterday.

use super::clock::{Clock, SystemClock};
use super::config::{ConfigError, DownloadConfig};
use super::job::JobRequest;
use super::poller::JobPoller;
use super::progress::CatchUpProgress;
use super::retriever::Retriever;
use super::submitter::JobSubmitter;
use super::{DownloadError, RunResult};
use crate::metrics::{self, JobMetrics};
use crate::output::{ResultKey, ResultWriter, StoredResult};
use crate::portal::{PortalClient, PortalError, Session};
use crate::resume::CheckpointStore;
use crate::segments::SegmentSet;
use crate::shutdown::{self, SharedShutdown, SleepOutcome};
use crate::DateRange;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How a catch-up pass ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchUpOutcome {
    /// The checkpoint was already at or past yesterday; nothing was submitted
    UpToDate,
    /// Every pending date was stored
    Completed,
    /// Shutdown was requested; `next` is the first date not attempted
    Interrupted {
        /// First date left for the next run
        next: NaiveDate,
    },
}

/// Summary of a catch-up pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchUpReport {
    /// Dates stored and checkpointed by this pass, ascending
    pub processed: Vec<NaiveDate>,
    /// Checkpoint after the pass
    pub checkpoint: NaiveDate,
    /// How the pass ended
    pub outcome: CatchUpOutcome,
}

/// Summary of a continuous run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuousReport {
    /// The initial catch-up pass
    pub catch_up: CatchUpReport,
    /// Refreshes stored
    pub refreshes: u32,
    /// Refreshes that failed and were retried at the next interval
    pub failed_refreshes: u32,
    /// Iterations where the refresh window was still empty
    pub skipped_refreshes: u32,
    /// Whether the run ended on a shutdown request rather than the end time
    pub interrupted: bool,
}

/// Drives the run modes
pub struct Scheduler {
    config: DownloadConfig,
    segments: SegmentSet,
    portal: Arc<dyn PortalClient>,
    writer: Arc<dyn ResultWriter>,
    clock: Arc<dyn Clock>,
    shutdown: Option<SharedShutdown>,
}

impl Scheduler {
    /// Create a scheduler on the system clock, using the global shutdown
    /// handle if one is registered
    pub fn new(
        config: DownloadConfig,
        segments: SegmentSet,
        portal: Arc<dyn PortalClient>,
        writer: Arc<dyn ResultWriter>,
    ) -> Self {
        Self {
            config,
            segments,
            portal,
            writer,
            clock: Arc::new(SystemClock),
            shutdown: shutdown::get_global_shutdown(),
        }
    }

    /// Use another clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach a shutdown handle
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run configuration
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Checkpoint store for this configuration
    ///
    /// Without a configured history start, a missing checkpoint means only
    /// yesterday is fetched.
    pub fn checkpoint_store(&self) -> CheckpointStore {
        let history_start = self
            .config
            .history_start()
            .unwrap_or_else(|| self.clock.yesterday());
        CheckpointStore::for_history_start(self.config.checkpoint_path(), history_start)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
    }

    async fn authenticate(&self) -> Result<Session, DownloadError> {
        self.portal.authenticate().await.map_err(|e| {
            error!(error = %e, "Authentication failed");
            match e {
                PortalError::Auth(message) => DownloadError::Auth(message),
                other => DownloadError::Auth(other.to_string()),
            }
        })
    }

    /// Submit, poll and retrieve one job, storing it under `key`
    async fn run_job(&self, session: &Session, request: JobRequest, key: ResultKey) -> RunResult {
        let name = request.description.name.clone();
        let span = info_span!("job", job = %name);

        async move {
            let job_metrics = JobMetrics::start(&name);
            let result = self.execute_job(session, request, &key).await;

            match &result {
                Ok(stored) => job_metrics.record_success(stored.rows),
                Err(e) => job_metrics.record_failure(e.kind()),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn execute_job(&self, session: &Session, request: JobRequest, key: &ResultKey) -> RunResult {
        let submitter = JobSubmitter::new(self.portal.clone(), self.clock.clone());
        let poller = JobPoller::new(self.portal.clone(), self.config.poll_policy())
            .with_shutdown(self.shutdown.clone());
        let retriever = Retriever::new(self.portal.clone(), self.writer.clone());

        let mut job = submitter.submit(session, request).await?;
        poller.wait(session, &mut job).await?;
        retriever.retrieve(session, &job, key).await
    }

    /// Fetch and store exactly one historical date
    ///
    /// Never reads or writes the checkpoint.
    pub async fn process_one_date(&self, session: &Session, date: NaiveDate) -> RunResult {
        let request = JobRequest::for_date(&self.config, &self.segments, date);
        self.run_job(session, request, ResultKey::Date(date)).await
    }

    /// One job spanning `range`, stored under the sanitized `label`
    ///
    /// Does not read or write the checkpoint.
    pub async fn single_shot(&self, range: DateRange, label: &str) -> RunResult {
        let key = ResultKey::label(label).map_err(|e| ConfigError::invalid("name", e))?;
        info!(range = %range, label = %key, "Starting single-shot download");

        let session = self.authenticate().await?;
        let request = JobRequest::single_shot(&self.config, &self.segments, range, &key.file_stem());
        let result = self.run_job(&session, request, key).await;

        match &result {
            Ok(stored) => info!(
                range = %range,
                path = %stored.path.display(),
                rows = stored.rows,
                "Single-shot download complete"
            ),
            Err(e) => error!(range = %range, kind = %e.kind(), error = %e, "Single-shot download failed"),
        }
        result
    }

    /// Fetch every date after the checkpoint through yesterday
    ///
    /// Stops at the first failure with the checkpoint left at the last stored
    /// date, so the next run starts with the failed date.
    pub async fn daily_catch_up(&self) -> Result<CatchUpReport, DownloadError> {
        let store = self.checkpoint_store();
        let checkpoint = store.load()?;
        let yesterday = self.clock.yesterday();
        metrics::record_checkpoint_lag((yesterday - checkpoint).num_days());

        let Some(range) = DateRange::after_checkpoint(checkpoint, yesterday) else {
            info!(
                checkpoint = %checkpoint,
                "Data is already up to date through yesterday"
            );
            return Ok(CatchUpReport {
                processed: Vec::new(),
                checkpoint,
                outcome: CatchUpOutcome::UpToDate,
            });
        };

        info!(
            checkpoint = %checkpoint,
            from = %range.start(),
            through = %range.end(),
            dates = range.num_days(),
            "Starting catch-up"
        );

        let session = self.authenticate().await?;
        let mut progress = CatchUpProgress::new(range.num_days());
        let mut processed = Vec::new();
        let mut current = checkpoint;

        for date in range.days() {
            if self.shutdown_requested() {
                info!(
                    next = %date,
                    checkpoint = %current,
                    "Shutdown requested, stopping before next date"
                );
                return Ok(CatchUpReport {
                    processed,
                    checkpoint: current,
                    outcome: CatchUpOutcome::Interrupted { next: date },
                });
            }

            info!(date = %date, "Processing date");
            let outcome = match self.process_one_date(&session, date).await {
                Ok(stored) => store.advance(date).map(|_| stored).map_err(DownloadError::from),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(stored) => {
                    current = date;
                    processed.push(date);
                    metrics::record_date_completed();
                    metrics::record_checkpoint_lag((yesterday - current).num_days());
                    progress.record(date);
                    info!(
                        date = %date,
                        rows = stored.rows,
                        path = %stored.path.display(),
                        "Date stored"
                    );
                    info!("{}", progress.format_progress());
                }
                Err(e) => {
                    error!(
                        date = %date,
                        checkpoint = %current,
                        kind = %e.kind(),
                        error = %e,
                        "Catch-up stopped; checkpoint left at last stored date"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            dates = processed.len(),
            checkpoint = %current,
            "Catch-up complete"
        );
        Ok(CatchUpReport {
            processed,
            checkpoint: current,
            outcome: CatchUpOutcome::Completed,
        })
    }

    /// Refresh today's data from the start of the window up to now
    ///
    /// The window ends at the current time rounded down to the bin size,
    /// capped at whichever of the end of day and the end of activity comes
    /// first. Returns `Ok(None)` without submitting anything when that
    /// window is empty.
    pub async fn refresh_today(&self, session: &Session) -> Result<Option<StoredResult>, DownloadError> {
        let now = self.clock.now();
        let today = now.date();
        let bin_end = self
            .config
            .bin_size()
            .floor(now.time())
            .min(self.config.activity_end());

        let Some(window) = self.config.window().truncate_to(bin_end) else {
            debug!(
                now = %now.time(),
                start_of_day = %self.config.start_of_day(),
                "Refresh window is empty, skipping"
            );
            return Ok(None);
        };

        let request = JobRequest::refresh(&self.config, &self.segments, today, window);
        self.run_job(session, request, ResultKey::Date(today))
            .await
            .map(Some)
    }

    /// Catch up, then refresh today at every interval until the end of activity
    ///
    /// The last sleep is shortened so that a final refresh happens at the
    /// end of activity, after which the run returns. A failed catch-up ends
    /// the run with its error. Failed refreshes are logged and retried at
    /// the next interval, except authentication failures and aborts which
    /// end the run.
    pub async fn continuous(&self) -> Result<ContinuousReport, DownloadError> {
        let catch_up = self.daily_catch_up().await?;
        let mut report = ContinuousReport {
            catch_up,
            refreshes: 0,
            failed_refreshes: 0,
            skipped_refreshes: 0,
            interrupted: false,
        };
        if matches!(report.catch_up.outcome, CatchUpOutcome::Interrupted { .. }) {
            report.interrupted = true;
            return Ok(report);
        }

        let today = self.clock.today();
        let end_time = self.config.activity_end();
        let interval = self.config.refresh_interval();
        info!(
            today = %today,
            until = %end_time,
            interval_mins = interval.as_secs() / 60,
            "Entering continuous refresh"
        );

        let mut session: Option<Session> = None;
        let mut last_pass = false;
        loop {
            if self.shutdown_requested() {
                info!("Shutdown requested, leaving continuous refresh");
                report.interrupted = true;
                break;
            }

            let now = self.clock.now();
            if now.date() != today || (!last_pass && now.time() > end_time) {
                info!(now = %now, until = %end_time, "End of activity reached");
                break;
            }

            let active = match session.take() {
                Some(s) => s,
                None => self.authenticate().await?,
            };

            match self.refresh_today(&active).await {
                Ok(Some(stored)) => {
                    report.refreshes += 1;
                    info!(
                        rows = stored.rows,
                        path = %stored.path.display(),
                        "Today's data refreshed"
                    );
                }
                Ok(None) => report.skipped_refreshes += 1,
                Err(e) if e.is_auth_failure() => {
                    error!(error = %e, "Authentication lost, ending continuous refresh");
                    return Err(e);
                }
                Err(e @ DownloadError::Shutdown { .. }) => return Err(e),
                Err(e) => {
                    report.failed_refreshes += 1;
                    warn!(
                        kind = %e.kind(),
                        error = %e,
                        "Refresh failed, retrying at next interval"
                    );
                }
            }
            session = Some(active);

            let now = self.clock.now();
            let remaining = if now.date() == today && !last_pass {
                (end_time - now.time())
                    .to_std()
                    .ok()
                    .filter(|left| !left.is_zero())
            } else {
                None
            };
            let Some(remaining) = remaining else {
                info!(now = %now, until = %end_time, "End of activity reached");
                break;
            };
            let pause = if remaining <= interval {
                last_pass = true;
                debug!(
                    pause_secs = remaining.as_secs(),
                    "Shortened sleep before the final refresh"
                );
                remaining
            } else {
                interval
            };

            let slept = match &self.shutdown {
                Some(shutdown) => shutdown.sleep_unless_shutdown(pause).await,
                None => {
                    tokio::time::sleep(pause).await;
                    SleepOutcome::Elapsed
                }
            };
            if slept == SleepOutcome::Interrupted {
                info!("Shutdown requested during refresh interval");
                report.interrupted = true;
                break;
            }
        }

        info!(
            refreshes = report.refreshes,
            failed = report.failed_refreshes,
            skipped = report.skipped_refreshes,
            "Continuous refresh finished"
        );
        Ok(report)
    }
}
