//! Transport abstraction below [`Connection`](super::Connection).
//!
//! Provides a trait-based seam over the primitive remote operations so the
//! reconciler can run against:
//! - a real SSH/SFTP session in production ([`SshTransport`](super::SshTransport))
//! - a local directory standing in for the remote host in unit tests

use std::io::{Read, Write};

use super::error::TransportResult;

/// Kind of a remote entry as reported by stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// Sockets, devices and anything else that is neither.
    Other,
}

/// Metadata of a remote path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub kind: EntryKind,
    pub size: u64,
}

impl RemoteStat {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// One child of a listed remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Final path segment, never `.` or `..`.
    pub name: String,
    pub stat: RemoteStat,
}

/// Output of a remote command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// stdout and stderr, merged in arrival order.
    pub output: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Primitive operations over one remote session.
///
/// Remote paths are POSIX strings. Implementations are not required to be
/// safe for concurrent use.
pub trait Transport {
    /// Stat a remote path, following symlinks. `Ok(None)` when it does not exist.
    fn stat(&self, path: &str) -> TransportResult<Option<RemoteStat>>;

    /// List the children of a remote directory.
    fn read_dir(&self, path: &str) -> TransportResult<Vec<RemoteEntry>>;

    /// Create a directory and all missing ancestors. Existing directories are fine.
    fn mkdir_all(&self, path: &str) -> TransportResult<()>;

    /// Open a remote file for reading.
    fn open(&self, path: &str) -> TransportResult<Box<dyn Read + '_>>;

    /// Create or truncate a remote file for writing.
    fn create(&self, path: &str) -> TransportResult<Box<dyn Write + '_>>;

    /// Run a command to completion on the remote host.
    fn exec(&self, command: &str) -> TransportResult<CommandOutput>;

    /// Close the underlying session.
    fn disconnect(&self) -> TransportResult<()>;
}

/// Join a relative `/`-separated path onto a remote base directory.
pub fn remote_join(base: &str, rel: &str) -> String {
    if rel.is_empty() {
        return base.to_string();
    }
    if base.is_empty() {
        return rel.to_string();
    }
    if base.ends_with('/') {
        format!("{base}{rel}")
    } else {
        format!("{base}/{rel}")
    }
}
