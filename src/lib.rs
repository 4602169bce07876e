//! # Segment Data Downloader Library
//!
//! Automates recurring extraction of time-series roadway-segment data (INRIX XD
//! segments) from a data-provider portal that only offers an authenticated
//! job-submission workflow.
//!
//! ## Features
//!
//! - **Checkpointed catch-up**: every historical day is fetched exactly once, in
//!   order, with progress persisted atomically after each stored day
//! - **Three run modes**: single-shot ranges, daily catch-up, and continuous
//!   intraday refresh
//! - **Bounded polling**: exponential backoff with a hard time budget while the
//!   portal processes a job
//! - **Graceful shutdown**: in-flight jobs are allowed to finish before exit
//!
//! ## Output format
//!
//! Each day is stored as `Data/YYYY-MM-DD.csv`, rows sorted by segment id then
//! timestamp, columns kept exactly as the portal exported them. Earlier
//! tooling for this workflow wrote one Parquet file per day
//! (`Data/YYYY-MM-DD.parquet`, float32 values indexed by `XD` and
//! `TimeStamp`); readers of those files need to switch to the CSV layout.
//! Single-shot ranges are stored under their sanitized label instead of a
//! date. A legacy `YYYY-MM-DD HH:MM:SS` checkpoint left by that tooling is
//! read as "resume from this date".
//!
//! ## Quick Start
//!
//! ```no_run
//! use segment_data_downloader::downloader::{DownloadConfig, Scheduler};
//! use segment_data_downloader::output::csv::CsvResultWriter;
//! use segment_data_downloader::portal::ritis::{RitisClient, RitisCredentials};
//! use segment_data_downloader::segments::SegmentSet;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DownloadConfig::builder()
//!     .output_dir("Data")
//!     .bin_size(15)
//!     .confidence_scores([30, 20, 10])
//!     .build()?;
//! let segments = SegmentSet::load("XD_segments.txt")?;
//! let portal = RitisClient::new(RitisCredentials::from_env()?)?;
//! let writer = CsvResultWriter::new(config.output_dir());
//!
//! let scheduler = Scheduler::new(config, segments, Arc::new(portal), Arc::new(writer));
//! let report = scheduler.daily_catch_up().await?;
//! println!("checkpoint now at {}", report.checkpoint);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`resume`] - Checkpoint store (last completed date, atomic advance)
//! - [`downloader`] - Job submission, polling, retrieval and the scheduler
//! - [`portal`] - Portal client capability and the RITIS implementation
//! - [`output`] - Result writers producing one table file per day
//! - [`segments`] - Segment list loading
//! - [`shutdown`] - Two-stage shutdown coordination

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Job orchestration: submitter, poller, retriever and scheduler
pub mod downloader;

/// Metrics collection
pub mod metrics;

/// Result writers
pub mod output;

/// Portal client capability and implementations
pub mod portal;

/// Checkpoint persistence
pub mod resume;

/// Segment list loading
pub mod segments;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

pub use segments::{SegmentId, SegmentSet};

/// Temporal aggregation granularity of returned values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BinSize {
    /// 5 minutes
    FiveMinutes,
    /// 10 minutes
    TenMinutes,
    /// 15 minutes
    FifteenMinutes,
    /// 60 minutes
    SixtyMinutes,
}

impl BinSize {
    /// All bin sizes the portal accepts
    pub const ALL: [BinSize; 4] = [
        BinSize::FiveMinutes,
        BinSize::TenMinutes,
        BinSize::FifteenMinutes,
        BinSize::SixtyMinutes,
    ];

    /// Bin width in minutes
    pub fn minutes(&self) -> u32 {
        match self {
            BinSize::FiveMinutes => 5,
            BinSize::TenMinutes => 10,
            BinSize::FifteenMinutes => 15,
            BinSize::SixtyMinutes => 60,
        }
    }

    /// Round a time of day down to the start of its bin
    pub fn floor(&self, time: NaiveTime) -> NaiveTime {
        use chrono::Timelike;
        let minutes = time.hour() * 60 + time.minute();
        let floored = minutes - minutes % self.minutes();
        NaiveTime::from_hms_opt(floored / 60, floored % 60, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl TryFrom<u32> for BinSize {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(BinSize::FiveMinutes),
            10 => Ok(BinSize::TenMinutes),
            15 => Ok(BinSize::FifteenMinutes),
            60 => Ok(BinSize::SixtyMinutes),
            _ => Err(format!(
                "Invalid bin size: {value}. Valid options: 5, 10, 15, 60"
            )),
        }
    }
}

impl From<BinSize> for u32 {
    fn from(bin: BinSize) -> Self {
        bin.minutes()
    }
}

impl std::fmt::Display for BinSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.minutes())
    }
}

impl FromStr for BinSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| format!("Invalid bin size: {s}. Valid options: 5, 10, 15, 60"))?;
        BinSize::try_from(value)
    }
}

/// Unit used for travel-time values in the export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TravelTimeUnits {
    /// Seconds
    #[default]
    Seconds,
    /// Minutes
    Minutes,
}

impl std::fmt::Display for TravelTimeUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TravelTimeUnits::Seconds => "seconds",
            TravelTimeUnits::Minutes => "minutes",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TravelTimeUnits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "seconds" => Ok(TravelTimeUnits::Seconds),
            "minutes" => Ok(TravelTimeUnits::Minutes),
            _ => Err(format!(
                "Invalid units: {s}. Valid options: seconds, minutes"
            )),
        }
    }
}

/// Metric column requested from the portal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Current speed
    Speed,
    /// Historical average speed
    AverageSpeed,
    /// Free-flow reference speed
    ReferenceSpeed,
    /// Travel time across the segment
    TravelTimeMinutes,
    /// Provider confidence score
    ConfidenceScore,
    /// Provider confidence value (0-100)
    Cvalue,
}

impl Metric {
    /// Every metric column, in the portal's canonical order
    pub const ALL: [Metric; 6] = [
        Metric::Speed,
        Metric::AverageSpeed,
        Metric::ReferenceSpeed,
        Metric::TravelTimeMinutes,
        Metric::ConfidenceScore,
        Metric::Cvalue,
    ];

    /// Column name used by the portal
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Speed => "speed",
            Metric::AverageSpeed => "average_speed",
            Metric::ReferenceSpeed => "reference_speed",
            Metric::TravelTimeMinutes => "travel_time_minutes",
            Metric::ConfidenceScore => "confidence_score",
            Metric::Cvalue => "cvalue",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "Invalid metric: {s}. Valid options: speed, average_speed, reference_speed, travel_time_minutes, confidence_score, cvalue"
                )
            })
    }
}

/// Provider data-quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ConfidenceScore {
    /// Historical data only
    Ten,
    /// Mix of historical and real-time data
    Twenty,
    /// Real-time data (best)
    Thirty,
}

impl ConfidenceScore {
    /// Numeric threshold sent to the portal
    pub fn value(&self) -> u32 {
        match self {
            ConfidenceScore::Ten => 10,
            ConfidenceScore::Twenty => 20,
            ConfidenceScore::Thirty => 30,
        }
    }
}

impl TryFrom<u32> for ConfidenceScore {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(ConfidenceScore::Ten),
            20 => Ok(ConfidenceScore::Twenty),
            30 => Ok(ConfidenceScore::Thirty),
            _ => Err(format!(
                "Invalid confidence score: {value}. Valid options: 10, 20, 30"
            )),
        }
    }
}

impl From<ConfidenceScore> for u32 {
    fn from(score: ConfidenceScore) -> Self {
        score.value()
    }
}

impl std::fmt::Display for ConfidenceScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl FromStr for ConfidenceScore {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| format!("Invalid confidence score: {s}. Valid options: 10, 20, 30"))?;
        ConfidenceScore::try_from(value)
    }
}

/// Inclusive range of calendar dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Create a range, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, String> {
        if start > end {
            return Err(format!(
                "Start date ({start}) must not be after end date ({end})"
            ));
        }
        Ok(Self { start, end })
    }

    /// Range covering exactly one day
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// First date (inclusive)
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Last date (inclusive)
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days covered
    pub fn num_days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    /// Iterate the covered dates in ascending order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start
            .iter_days()
            .take_while(move |d| *d <= end)
    }

    /// Dates strictly after `checkpoint` up to and including `until`.
    ///
    /// Returns `None` when there is nothing left to fetch.
    pub fn after_checkpoint(checkpoint: NaiveDate, until: NaiveDate) -> Option<Self> {
        let start = checkpoint.succ_opt()?;
        DateRange::new(start, until).ok()
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..={}", self.start, self.end)
        }
    }
}

/// Daily active-time window restricting which hours of data are requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl TimeWindow {
    /// Create a window, rejecting `start >= end`
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, String> {
        if start >= end {
            return Err(format!(
                "Window start ({start}) must be before window end ({end})"
            ));
        }
        Ok(Self { start, end })
    }

    /// Start of the window
    pub fn start(&self) -> NaiveTime {
        self.start
    }

    /// End of the window
    pub fn end(&self) -> NaiveTime {
        self.end
    }

    /// Narrow the window to end no later than `end`.
    ///
    /// Returns `None` if the narrowed window would be empty.
    pub fn truncate_to(&self, end: NaiveTime) -> Option<Self> {
        TimeWindow::new(self.start, self.end.min(end)).ok()
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M:%S"),
            self.end.format("%H:%M:%S")
        )
    }
}
