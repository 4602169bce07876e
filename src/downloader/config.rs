//! Download configuration and polling policy

use crate::segments::SegmentError;
use crate::{BinSize, ConfidenceScore, Metric, TimeWindow, TravelTimeUnits};
use chrono::{NaiveDate, NaiveTime};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default output directory for stored results
pub const DEFAULT_OUTPUT_DIR: &str = "Data";

/// Default checkpoint file
pub const DEFAULT_CHECKPOINT_PATH: &str = "last_run.txt";

/// Default continuous-mode refresh interval in minutes
pub const DEFAULT_REFRESH_INTERVAL_MINUTES: u64 = 60;

/// First poll delay.
/// The portal rarely finishes a one-day export in under half a minute.
pub const INITIAL_POLL_DELAY_MS: u64 = 30_000;

/// Poll delay cap (5 minutes)
pub const MAX_POLL_DELAY_MS: u64 = 300_000;

/// Total time a single job may be polled before giving up (2 hours)
pub const POLL_BUDGET_MS: u64 = 7_200_000;

/// Bounded exponential backoff used while a job is processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    base: Duration,
    cap: Duration,
    budget: Duration,
}

impl PollPolicy {
    /// Create a policy
    ///
    /// # Errors
    ///
    /// Rejects a zero base delay, a cap below the base, or a zero budget.
    pub fn new(base: Duration, cap: Duration, budget: Duration) -> Result<Self, ConfigError> {
        if base.is_zero() {
            return Err(ConfigError::invalid("poll_base", "must be greater than zero"));
        }
        if cap < base {
            return Err(ConfigError::invalid(
                "poll_cap",
                format!("cap ({cap:?}) must not be below the base delay ({base:?})"),
            ));
        }
        if budget.is_zero() {
            return Err(ConfigError::invalid("poll_budget", "must be greater than zero"));
        }
        Ok(Self { base, cap, budget })
    }

    /// First delay
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Largest single delay
    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Total waiting allowed for one job
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Delay before poll number `attempt` (zero-based): doubles from the
    /// base up to the cap
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Every delay the poller may sleep, in order, before the budget runs out
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut waited = Duration::ZERO;
        (0u32..).map_while(move |attempt| {
            let delay = self.delay_for(attempt);
            if waited + delay > self.budget {
                return None;
            }
            waited += delay;
            Some(delay)
        })
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(INITIAL_POLL_DELAY_MS),
            cap: Duration::from_millis(MAX_POLL_DELAY_MS),
            budget: Duration::from_millis(POLL_BUDGET_MS),
        }
    }
}

/// Validated, immutable run configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    output_dir: PathBuf,
    window: TimeWindow,
    activity_end: Option<NaiveTime>,
    bin_size: BinSize,
    travel_time_units: TravelTimeUnits,
    metrics: Vec<Metric>,
    confidence_scores: Vec<ConfidenceScore>,
    checkpoint_path: PathBuf,
    refresh_interval: Duration,
    history_start: Option<NaiveDate>,
    poll_policy: PollPolicy,
}

impl DownloadConfig {
    /// Start building a configuration from raw values
    pub fn builder() -> DownloadConfigBuilder {
        DownloadConfigBuilder::default()
    }

    /// Directory results are written to
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Daily active-time window
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Start of the active window
    pub fn start_of_day(&self) -> NaiveTime {
        self.window.start()
    }

    /// End of the active window
    pub fn end_of_day(&self) -> NaiveTime {
        self.window.end()
    }

    /// Time after which continuous mode stops refreshing
    ///
    /// Falls back to [`end_of_day`](Self::end_of_day). Only the continuous
    /// loop reads this; catch-up and single-shot jobs always request the
    /// full [`window`](Self::window).
    pub fn activity_end(&self) -> NaiveTime {
        self.activity_end.unwrap_or(self.window.end())
    }

    /// Temporal bin size
    pub fn bin_size(&self) -> BinSize {
        self.bin_size
    }

    /// Travel time units
    pub fn travel_time_units(&self) -> TravelTimeUnits {
        self.travel_time_units
    }

    /// Requested metric columns
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Confidence tiers to include, highest first
    pub fn confidence_scores(&self) -> &[ConfidenceScore] {
        &self.confidence_scores
    }

    /// Checkpoint file
    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    /// Continuous-mode refresh interval
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// First date fetched when no checkpoint exists
    pub fn history_start(&self) -> Option<NaiveDate> {
        self.history_start
    }

    /// Polling policy
    pub fn poll_policy(&self) -> PollPolicy {
        self.poll_policy
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            window: TimeWindow::default(),
            activity_end: None,
            bin_size: BinSize::FifteenMinutes,
            travel_time_units: TravelTimeUnits::default(),
            metrics: Metric::ALL.to_vec(),
            confidence_scores: vec![
                ConfidenceScore::Thirty,
                ConfidenceScore::Twenty,
                ConfidenceScore::Ten,
            ],
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_MINUTES * 60),
            history_start: None,
            poll_policy: PollPolicy::default(),
        }
    }
}

/// Builder taking unvalidated values; [`DownloadConfigBuilder::build`]
/// checks everything at once
#[derive(Debug, Clone, Default)]
pub struct DownloadConfigBuilder {
    output_dir: Option<PathBuf>,
    start_of_day: Option<NaiveTime>,
    end_of_day: Option<NaiveTime>,
    activity_end: Option<NaiveTime>,
    bin_size: Option<u32>,
    travel_time_units: Option<String>,
    metrics: Option<Vec<String>>,
    confidence_scores: Option<Vec<u32>>,
    checkpoint_path: Option<PathBuf>,
    refresh_interval_minutes: Option<u64>,
    history_start: Option<NaiveDate>,
    poll_policy: Option<PollPolicy>,
}

impl DownloadConfigBuilder {
    /// Output directory
    pub fn output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Start of the daily active window
    pub fn start_of_day(mut self, time: NaiveTime) -> Self {
        self.start_of_day = Some(time);
        self
    }

    /// End of the daily active window
    pub fn end_of_day(mut self, time: NaiveTime) -> Self {
        self.end_of_day = Some(time);
        self
    }

    /// Stop continuous refreshing after this time of day
    pub fn activity_end(mut self, time: NaiveTime) -> Self {
        self.activity_end = Some(time);
        self
    }

    /// Bin size in minutes
    pub fn bin_size(mut self, minutes: u32) -> Self {
        self.bin_size = Some(minutes);
        self
    }

    /// Travel time units (`seconds` or `minutes`)
    pub fn travel_time_units<S: Into<String>>(mut self, units: S) -> Self {
        self.travel_time_units = Some(units.into());
        self
    }

    /// Metric column names
    pub fn metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.metrics = Some(metrics.into_iter().map(|m| m.as_ref().to_string()).collect());
        self
    }

    /// Confidence score tiers
    pub fn confidence_scores<I: IntoIterator<Item = u32>>(mut self, scores: I) -> Self {
        self.confidence_scores = Some(scores.into_iter().collect());
        self
    }

    /// Checkpoint file location
    pub fn checkpoint_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Continuous-mode refresh interval in minutes
    pub fn refresh_interval_minutes(mut self, minutes: u64) -> Self {
        self.refresh_interval_minutes = Some(minutes);
        self
    }

    /// First date to fetch when no checkpoint exists
    pub fn history_start(mut self, date: NaiveDate) -> Self {
        self.history_start = Some(date);
        self
    }

    /// Polling policy
    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = Some(policy);
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidOption`] naming the first offending field.
    pub fn build(self) -> Result<DownloadConfig, ConfigError> {
        let defaults = DownloadConfig::default();

        let bin_size = match self.bin_size {
            Some(minutes) => {
                BinSize::try_from(minutes).map_err(|e| ConfigError::invalid("bin_size", e))?
            }
            None => defaults.bin_size,
        };

        let travel_time_units = match self.travel_time_units {
            Some(units) => units
                .parse()
                .map_err(|e: String| ConfigError::invalid("travel_time_units", e))?,
            None => defaults.travel_time_units,
        };

        let metrics = match self.metrics {
            Some(names) => {
                let mut metrics: Vec<Metric> = Vec::with_capacity(names.len());
                for name in &names {
                    let metric = name
                        .parse()
                        .map_err(|e: String| ConfigError::invalid("metrics", e))?;
                    if !metrics.contains(&metric) {
                        metrics.push(metric);
                    }
                }
                if metrics.is_empty() {
                    return Err(ConfigError::invalid(
                        "metrics",
                        "at least one metric column is required",
                    ));
                }
                metrics
            }
            None => defaults.metrics,
        };

        let confidence_scores = match self.confidence_scores {
            Some(values) => {
                let mut scores = values
                    .into_iter()
                    .map(ConfidenceScore::try_from)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ConfigError::invalid("confidence_scores", e))?;
                if scores.is_empty() {
                    return Err(ConfigError::invalid(
                        "confidence_scores",
                        "at least one confidence score is required",
                    ));
                }
                scores.sort_unstable_by(|a, b| b.cmp(a));
                scores.dedup();
                scores
            }
            None => defaults.confidence_scores,
        };

        let window = TimeWindow::new(
            self.start_of_day.unwrap_or(defaults.window.start()),
            self.end_of_day.unwrap_or(defaults.window.end()),
        )
        .map_err(|e| ConfigError::invalid("time_window", e))?;

        if let Some(end) = self.activity_end {
            if end <= window.start() {
                return Err(ConfigError::invalid(
                    "activity_end",
                    format!(
                        "end of activity ({end}) must be after the start of day ({})",
                        window.start()
                    ),
                ));
            }
        }

        let refresh_interval = match self.refresh_interval_minutes {
            Some(minutes) => {
                if minutes < u64::from(bin_size.minutes()) {
                    return Err(ConfigError::invalid(
                        "refresh_interval",
                        format!(
                            "refresh interval ({minutes} min) cannot be shorter than the bin size ({bin_size})"
                        ),
                    ));
                }
                Duration::from_secs(minutes * 60)
            }
            None => defaults.refresh_interval,
        };

        Ok(DownloadConfig {
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            window,
            activity_end: self.activity_end,
            bin_size,
            travel_time_units,
            metrics,
            confidence_scores,
            checkpoint_path: self.checkpoint_path.unwrap_or(defaults.checkpoint_path),
            refresh_interval,
            history_start: self.history_start,
            poll_policy: self.poll_policy.unwrap_or(defaults.poll_policy),
        })
    }
}

/// Configuration errors, all raised before any network interaction
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value outside its allowed set or range
    #[error("invalid {field}: {message}")]
    InvalidOption {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// Segment list missing, unreadable or empty
    #[error("segment list: {0}")]
    Segments(#[from] SegmentError),

    /// Checkpoint file holds something other than a date
    #[error("{0}")]
    CorruptCheckpoint(String),

    /// Portal credentials not supplied
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::InvalidOption`]
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::InvalidOption {
            field,
            message: message.into(),
        }
    }
}
