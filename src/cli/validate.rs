//! Validation subcommand

use super::{Cli, CliError};
use crate::downloader::{Clock, DownloadError, SystemClock};
use crate::resume::CheckpointStore;
use crate::segments::SegmentSet;
use crate::DateRange;
use clap::Args;

/// Check configuration, segment list and checkpoint without contacting the portal
#[derive(Args, Debug)]
pub struct ValidateCommand {
    /// Also require portal credentials to be present
    #[arg(long)]
    pub require_credentials: bool,
}

impl ValidateCommand {
    /// Execute the validation command
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        self.execute_with_clock(cli, &SystemClock)
    }

    fn execute_with_clock(&self, cli: &Cli, clock: &dyn Clock) -> Result<(), CliError> {
        let config = cli.download_config()?;
        println!("Configuration OK");
        println!("  Window: {}", config.window());
        if config.activity_end() != config.end_of_day() {
            println!("  Refreshing until: {}", config.activity_end());
        }
        println!("  Bin size: {} minutes", config.bin_size().minutes());
        println!("  Units: {}", config.travel_time_units());
        println!(
            "  Confidence: {}",
            config
                .confidence_scores()
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!(
            "  Refresh every {} minutes",
            config.refresh_interval().as_secs() / 60
        );

        let segments = SegmentSet::load(&cli.segments)?;
        println!(
            "Segment list {}: {} segments",
            cli.segments.display(),
            segments.len()
        );

        let yesterday = clock.yesterday();
        let store = CheckpointStore::for_history_start(
            config.checkpoint_path(),
            config.history_start().unwrap_or(yesterday),
        );
        let checkpoint = store.load().map_err(DownloadError::from)?;
        match DateRange::after_checkpoint(checkpoint, yesterday) {
            Some(pending) => println!(
                "Checkpoint {}: {} ({} pending: {})",
                store.path().display(),
                checkpoint,
                pending.num_days(),
                pending
            ),
            None => println!(
                "Checkpoint {}: {} (up to date)",
                store.path().display(),
                checkpoint
            ),
        }

        if self.require_credentials {
            let credentials = cli.credentials()?;
            println!("Credentials found for {}", credentials.email());
        }

        Ok(())
    }
}
