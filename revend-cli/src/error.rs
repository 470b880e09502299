//! Error types for the CLI.

use crate::config::ConfigError;
use revend_core::RevendError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Migration(#[from] RevendError),
    #[error("Failed to init subscriber: {0}")]
    Telemetry(String),
}
