//! Catch-up progress reporting.
//!
//! A catch-up pass can span weeks of history with each day taking minutes of
//! portal processing, so after every stored day the scheduler logs how far
//! along the pass is and a rough ETA based on the average day so far.

use chrono::NaiveDate;
use std::time::{Duration, Instant};

/// Progress through the dates of one catch-up pass.
#[derive(Debug, Clone)]
pub struct CatchUpProgress {
    /// Dates stored so far in this pass.
    pub dates_completed: u64,
    /// Dates the pass set out to fetch.
    pub total_dates: u64,
    /// When the pass started.
    pub start_time: Instant,
    /// Most recently stored date.
    pub last_date: Option<NaiveDate>,
}

impl CatchUpProgress {
    /// Start tracking a pass over `total_dates` dates.
    pub fn new(total_dates: u64) -> Self {
        Self {
            dates_completed: 0,
            total_dates,
            start_time: Instant::now(),
            last_date: None,
        }
    }

    /// Record that `date` was stored.
    pub fn record(&mut self, date: NaiveDate) {
        self.dates_completed = self.dates_completed.saturating_add(1);
        self.last_date = Some(date);
    }

    /// Completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_dates == 0 {
            return 100.0;
        }
        (self.dates_completed as f64 / self.total_dates as f64) * 100.0
    }

    /// Dates still to go.
    pub fn remaining(&self) -> u64 {
        self.total_dates.saturating_sub(self.dates_completed)
    }

    /// Estimate the time left from the average time per date so far.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        self.estimate_remaining_with(self.start_time.elapsed())
    }

    fn estimate_remaining_with(&self, elapsed: Duration) -> Option<Duration> {
        if self.dates_completed == 0 || self.remaining() == 0 {
            return None;
        }
        let per_date = elapsed.as_secs_f64() / self.dates_completed as f64;
        Some(Duration::from_secs_f64(per_date * self.remaining() as f64))
    }

    /// Human-readable progress line.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {}/{} dates - {:.1}% complete",
            self.dates_completed,
            self.total_dates,
            self.percentage()
        )];

        if let Some(date) = self.last_date {
            parts.push(format!("(through {date})"));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
