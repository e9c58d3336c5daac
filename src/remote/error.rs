//! Error types shared by the connection, the command facade and the reconciler.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of a single primitive transport operation.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("ssh: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("authentication rejected for user {0}")]
    AuthRejected(String),

    /// Remote paths are handled as UTF-8; the lossy form is kept for messages.
    #[error("remote name is not valid UTF-8: {0}")]
    NonUtf8Name(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced to callers of `connect`, `sync`, `run` and `force_remove`.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("source cannot be an empty string")]
    EmptySource,

    #[error("destination cannot be an empty string")]
    EmptyDestination,

    #[error("failed to connect to {addr} after {attempts} attempts: {source}")]
    Connect {
        addr: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("error while stat remote path {path}: {source}")]
    RemoteStat {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("error while stat {}: {source}", path.display())]
    LocalStat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error walking {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("error transferring {path}: {source}")]
    Transfer {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("command `{command}` exited with status {status}: {}", output.trim())]
    Command {
        command: String,
        status: i32,
        output: String,
    },

    #[error("{} is not valid UTF-8 and cannot be mirrored", .0.display())]
    NonUtf8Path(PathBuf),

    #[error("refusing to remove {0:?}")]
    UnsafeRemove(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RemoteError {
    pub(crate) fn transfer(path: impl Into<String>, source: impl Into<TransportError>) -> Self {
        Self::Transfer {
            path: path.into(),
            source: source.into(),
        }
    }
}
