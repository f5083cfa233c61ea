use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    /// No platform profile matched the install layout. The shell keeps
    /// running without a backing server.
    #[error("TerminusDB server binary not found under {}", .0.display())]
    BinaryNotFound(PathBuf),

    #[error("failed to create data directory {}: {source}", path.display())]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to terminate process {pid}: {reason}")]
    Reap { pid: u32, reason: String },

    #[error("process table scan failed: {0}")]
    ProcessScan(String),
}

pub type Result<T> = std::result::Result<T, ShellError>;
