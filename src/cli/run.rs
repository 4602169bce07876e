//! Command line surface and run-mode commands

use super::validate::ValidateCommand;
use super::CliError;
use crate::downloader::{
    CatchUpOutcome, ConfigError, DownloadConfig, PollPolicy, Scheduler,
};
use crate::output::csv::CsvResultWriter;
use crate::portal::ritis::{RitisClient, RitisCredentials, DEFAULT_BASE_URL};
use crate::segments::SegmentSet;
use crate::shutdown::SharedShutdown;
use crate::{DateRange, Metric};
use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Parse `HH:MM:SS` or `HH:MM`
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, String> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("Invalid time of day: {s}. Expected HH:MM:SS"))
}

/// Parse `YYYY-MM-DD`
pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("Invalid date '{s}': {e}. Expected YYYY-MM-DD"))
}

/// Segment data downloader CLI
#[derive(Parser, Debug)]
#[command(name = "segment-data-downloader")]
#[command(
    about = "Download INRIX XD segment data from the RITIS Massive Data Downloader",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Segment list file (one XD id per line; commas also accepted)
    #[arg(long, global = true, default_value = "XD_segments.txt")]
    pub segments: PathBuf,

    /// Directory results are written to
    #[arg(long, global = true, default_value = "Data")]
    pub output_dir: PathBuf,

    /// Start of the daily time window (HH:MM:SS)
    #[arg(long, global = true, default_value = "00:00:00", value_parser = parse_time_of_day)]
    pub start_of_day: NaiveTime,

    /// End of the daily time window, also when continuous mode stops (HH:MM:SS)
    #[arg(long, global = true, default_value = "23:59:00", value_parser = parse_time_of_day)]
    pub end_of_day: NaiveTime,

    /// Bin size in minutes (5, 10, 15 or 60)
    #[arg(long, global = true, default_value_t = 15)]
    pub bin_size: u32,

    /// Travel time units (seconds or minutes)
    #[arg(long, global = true, default_value = "seconds")]
    pub units: String,

    /// Metric columns, comma separated
    #[arg(
        long,
        global = true,
        value_delimiter = ',',
        default_values_t = Metric::ALL.map(|m| m.as_str().to_string())
    )]
    pub metrics: Vec<String>,

    /// Confidence score tiers to include, comma separated (10, 20, 30)
    #[arg(long, global = true, value_delimiter = ',', default_values_t = [30u32, 20, 10])]
    pub confidence: Vec<u32>,

    /// Checkpoint file holding the last completed date
    #[arg(long, global = true, default_value = "last_run.txt")]
    pub checkpoint: PathBuf,

    /// First date to fetch when no checkpoint exists (defaults to yesterday)
    #[arg(long, global = true, value_parser = parse_date)]
    pub history_start: Option<NaiveDate>,

    /// First poll delay in seconds
    #[arg(long, global = true, default_value_t = 30)]
    pub poll_base_secs: u64,

    /// Longest poll delay in seconds
    #[arg(long, global = true, default_value_t = 300)]
    pub poll_cap_secs: u64,

    /// Give up on a job after this many minutes
    #[arg(long, global = true, default_value_t = 120)]
    pub poll_budget_mins: u64,

    /// RITIS account e-mail
    #[arg(long, global = true, env = "RITIS_EMAIL")]
    pub email: Option<String>,

    /// RITIS account password
    #[arg(long, global = true, env = "RITIS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Portal origin
    #[arg(long, global = true, default_value = DEFAULT_BASE_URL)]
    pub portal_url: String,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// One job for an explicit date range
    Single(SingleArgs),
    /// Fetch every day after the checkpoint through yesterday
    Daily,
    /// Catch up, then refresh today's data at a fixed interval until the end of day
    Continuous(ContinuousArgs),
    /// Check configuration, segment list and checkpoint without contacting the portal
    Validate(ValidateCommand),
}

/// Arguments for `single`
#[derive(Args, Debug)]
pub struct SingleArgs {
    /// First date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub start_date: NaiveDate,

    /// Last date, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub end_date: NaiveDate,

    /// Job label, also the output file name
    #[arg(long)]
    pub name: String,
}

/// Arguments for `continuous`
#[derive(Args, Debug)]
pub struct ContinuousArgs {
    /// Stop refreshing after this time of day (defaults to --end-of-day;
    /// catch-up days still cover the full window)
    #[arg(long, value_parser = parse_time_of_day)]
    pub until: Option<NaiveTime>,

    /// Minutes between refreshes (not less than the bin size)
    #[arg(long)]
    pub interval_minutes: Option<u64>,
}

impl Cli {
    /// Subcommand name, for log and error context
    pub fn command_name(&self) -> &'static str {
        match self.command {
            Commands::Single(_) => "single",
            Commands::Daily => "daily",
            Commands::Continuous(_) => "continuous",
            Commands::Validate(_) => "validate",
        }
    }

    /// Build the validated run configuration
    pub fn download_config(&self) -> Result<DownloadConfig, ConfigError> {
        let policy = PollPolicy::new(
            Duration::from_secs(self.poll_base_secs),
            Duration::from_secs(self.poll_cap_secs),
            Duration::from_secs(self.poll_budget_mins * 60),
        )?;

        let mut builder = DownloadConfig::builder()
            .output_dir(&self.output_dir)
            .start_of_day(self.start_of_day)
            .end_of_day(self.end_of_day)
            .bin_size(self.bin_size)
            .travel_time_units(self.units.as_str())
            .metrics(&self.metrics)
            .confidence_scores(self.confidence.iter().copied())
            .checkpoint_path(&self.checkpoint)
            .poll_policy(policy);
        if let Commands::Continuous(args) = &self.command {
            if let Some(until) = args.until {
                builder = builder.activity_end(until);
            }
            if let Some(minutes) = args.interval_minutes {
                builder = builder.refresh_interval_minutes(minutes);
            }
        }
        if let Some(date) = self.history_start {
            builder = builder.history_start(date);
        }
        builder.build()
    }

    /// Portal credentials from flags or the environment
    pub fn credentials(&self) -> Result<RitisCredentials, ConfigError> {
        match (&self.email, &self.password) {
            (Some(email), Some(password)) if !email.is_empty() && !password.is_empty() => {
                Ok(RitisCredentials::new(email.as_str(), password.as_str()))
            }
            _ => RitisCredentials::from_env(),
        }
    }

    /// Everything checked before the first network call
    fn prepare(&self) -> Result<(DownloadConfig, SegmentSet), CliError> {
        let config = self.download_config()?;
        let segments = SegmentSet::load(&self.segments)?;
        Ok((config, segments))
    }

    fn scheduler(
        &self,
        config: DownloadConfig,
        segments: SegmentSet,
        shutdown: SharedShutdown,
    ) -> Result<Scheduler, CliError> {
        let portal = RitisClient::with_base_url(self.credentials()?, self.portal_url.as_str())?;
        let writer = CsvResultWriter::new(config.output_dir());
        Ok(Scheduler::new(config, segments, Arc::new(portal), Arc::new(writer)).with_shutdown(shutdown))
    }

    /// Run the selected command
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<(), CliError> {
        if let Commands::Validate(cmd) = &self.command {
            return cmd.execute(self);
        }

        let (config, segments) = self.prepare()?;
        let scheduler = self.scheduler(config, segments, shutdown)?;

        match &self.command {
            Commands::Single(args) => {
                let range = DateRange::new(args.start_date, args.end_date)
                    .map_err(CliError::InvalidArgument)?;
                let stored = scheduler.single_shot(range, &args.name).await?;
                info!(path = %stored.path.display(), rows = stored.rows, "Done");
            }
            Commands::Daily => {
                let report = scheduler.daily_catch_up().await?;
                log_catch_up(report.processed.len(), report.checkpoint, report.outcome);
            }
            Commands::Continuous(_) => {
                let report = scheduler.continuous().await?;
                log_catch_up(
                    report.catch_up.processed.len(),
                    report.catch_up.checkpoint,
                    report.catch_up.outcome,
                );
                info!(
                    refreshes = report.refreshes,
                    failed_refreshes = report.failed_refreshes,
                    interrupted = report.interrupted,
                    "Continuous run finished"
                );
            }
            Commands::Validate(_) => {}
        }
        Ok(())
    }
}

fn log_catch_up(processed: usize, checkpoint: NaiveDate, outcome: CatchUpOutcome) {
    match outcome {
        CatchUpOutcome::UpToDate => info!(checkpoint = %checkpoint, "Nothing to do"),
        CatchUpOutcome::Completed => info!(
            dates = processed,
            checkpoint = %checkpoint,
            "Catch-up finished"
        ),
        CatchUpOutcome::Interrupted { next } => info!(
            dates = processed,
            checkpoint = %checkpoint,
            next = %next,
            "Catch-up interrupted, the next run resumes from the checkpoint"
        ),
    }
}
