//! CLI error types.

use figdl_config::ConfigError;
use figdl_export::{ExportError, SourceError};

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Source(#[from] SourceError),

    #[error("{0}")]
    Export(#[from] ExportError),

    #[error("{0}")]
    Validation(String),
}
