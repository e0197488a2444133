use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Setup-time failures of the harness.
///
/// Anything that goes wrong inside a single solver invocation is recorded in
/// that run's [`RunStatus`](crate::outcome::RunStatus) instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("failed to create output layout at {path}: {source}")]
    LayoutCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse config file {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl HarnessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        HarnessError::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
