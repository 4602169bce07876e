//! CLI command implementations

pub mod error;
pub mod run;
pub mod validate;

pub use error::CliError;
pub use run::{Cli, Commands, ContinuousArgs, SingleArgs};
pub use validate::ValidateCommand;
