//! CLI error types and conversions

use crate::downloader::{ConfigError, DownloadError};
use crate::portal::PortalError;
use crate::segments::SegmentError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Run failure
    #[error("download error: {0}")]
    DownloadError(#[from] DownloadError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),

    /// Portal client could not be created
    #[error("portal error: {0}")]
    PortalError(#[from] PortalError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<SegmentError> for CliError {
    fn from(err: SegmentError) -> Self {
        CliError::ConfigurationError(ConfigError::Segments(err))
    }
}
