//! Operational metrics for scheduled extraction runs
//!
//! Uses the `metrics` facade so recording is a no-op until an exporter is
//! installed. [`init_metrics`] installs a Prometheus scrape endpoint.

use crate::downloader::FailureKind;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, info};

static METRICS_INITIALIZED: OnceCell<SocketAddr> = OnceCell::new();

/// Install the Prometheus exporter on `addr`
///
/// Must be called from inside a tokio runtime. Later calls are ignored.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    if let Some(existing) = METRICS_INITIALIZED.get() {
        debug!(addr = %existing, "Metrics already initialized, skipping");
        return Ok(());
    }

    info!(addr = %addr, "Initializing metrics exporter");
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();

    let _ = METRICS_INITIALIZED.set(addr);
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "jobs_submitted_total",
        Unit::Count,
        "Extraction jobs accepted by the portal"
    );
    describe_counter!(
        "job_polls_total",
        Unit::Count,
        "Job status queries, labelled by observed status"
    );
    describe_counter!(
        "job_poll_timeouts_total",
        Unit::Count,
        "Jobs abandoned because the poll budget ran out"
    );
    describe_counter!(
        "dates_completed_total",
        Unit::Count,
        "Historical dates stored and checkpointed"
    );
    describe_counter!(
        "runs_failed_total",
        Unit::Count,
        "Failed jobs, labelled by failure kind"
    );
    describe_histogram!(
        "job_duration_seconds",
        Unit::Seconds,
        "Time from submission to stored result"
    );
    describe_gauge!(
        "checkpoint_days_behind",
        Unit::Count,
        "Days between the checkpoint and yesterday"
    );
}

/// A job was accepted
pub fn record_job_submitted() {
    counter!("jobs_submitted_total").increment(1);
}

/// A status query returned `status`
pub fn record_poll(status: &str) {
    counter!("job_polls_total", "status" => status.to_string()).increment(1);
}

/// A job exhausted its poll budget
pub fn record_poll_timeout() {
    counter!("job_poll_timeouts_total").increment(1);
}

/// A historical date was stored and checkpointed
pub fn record_date_completed() {
    counter!("dates_completed_total").increment(1);
}

/// Distance between checkpoint and yesterday
pub fn record_checkpoint_lag(days: i64) {
    gauge!("checkpoint_days_behind").set(days.max(0) as f64);
}

/// Timing for one job from submission to stored result
pub struct JobMetrics {
    job: String,
    start_time: Instant,
}

impl JobMetrics {
    /// Start timing `job`
    pub fn start(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            start_time: Instant::now(),
        }
    }

    /// The job's result was stored
    pub fn record_success(&self, rows: u64) {
        let duration = self.start_time.elapsed();
        histogram!("job_duration_seconds").record(duration.as_secs_f64());
        debug!(
            job = %self.job,
            rows = rows,
            duration_secs = duration.as_secs(),
            "Job metrics recorded"
        );
    }

    /// The job failed
    pub fn record_failure(&self, kind: FailureKind) {
        counter!("runs_failed_total", "kind" => kind.as_str()).increment(1);
        debug!(
            job = %self.job,
            kind = %kind,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Job failure recorded"
        );
    }
}
