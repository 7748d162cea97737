/// Error types for the hostbatch command line

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid batch in {file}: {source}")]
    Batch {
        file: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Host error: {0}")]
    Host(#[from] hostbatch_host::HostError),

    #[error("Session error: {0}")]
    Session(#[from] hostbatch_core::Error),

    #[error("Host task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Formatting error: {0}")]
    Format(#[from] serde_json::Error),
}
