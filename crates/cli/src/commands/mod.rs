//! CLI subcommands.

pub mod api;
pub mod session;
pub mod watch;

use gatehouse::{ApiError, ConfigError};
use thiserror::Error;

/// Errors that end a CLI command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// No `--email` and nothing remembered from an earlier login.
    #[error("No email given and none remembered; pass --email")]
    MissingEmail,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
}
