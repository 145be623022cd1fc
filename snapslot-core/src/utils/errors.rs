//! Error types for snapslot.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unmet precondition detected before any remote state is touched.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A remote command exited non-zero.
    #[error("Remote command `{command}` failed with status {status}: {stderr}")]
    Remote {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    /// Local read failure while producing an archive stream.
    #[error("Failed to archive {path}: {source}")]
    Traversal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Source command failed: {0}")]
    SourceCommand(String),

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<::config::ConfigError> for SnapError {
    fn from(err: ::config::ConfigError) -> Self {
        SnapError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SnapError>;
