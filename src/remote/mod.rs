//! Remote hosting access for owh.
//!
//! This module mirrors a local site directory onto a web hosting account that
//! is reachable only over SSH. One [`Connection`] carries both remote command
//! execution and SFTP file transfer over the same session.
//!
//! # Architecture
//!
//! - **transport**: the [`Transport`] trait, primitive remote operations
//! - **ssh**: [`SshTransport`], the ssh2/SFTP implementation
//! - **connection**: [`Connection`] with retrying connect, `run` and `force_remove`
//! - **filter**: [`should_skip`], which local paths take part in a sync
//! - **digest**: streaming SHA256 content comparison
//! - **sync**: the two-phase (prune, populate) reconciler behind [`Connection::sync`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use owh::remote::{Connection, ConnectionParams, RetryPolicy};
//!
//! let params = ConnectionParams::new("ssh.cluster0.example", 22, "blog", password);
//! let conn = Connection::connect(params, &RetryPolicy::default())?;
//!
//! let report = conn.sync("public", "www")?;
//! println!("{} uploaded, {} removed", report.files_uploaded, report.entries_removed);
//!
//! println!("{}", conn.run("du -sh www")?);
//! conn.close()?;
//! ```

pub mod connection;
pub mod digest;
pub mod error;
pub mod filter;
pub mod ssh;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{Connection, ConnectionParams, RetryPolicy, check_removable};
pub use error::{RemoteError, TransportError};
pub use filter::should_skip;
pub use ssh::SshTransport;
pub use sync::{SyncReport, validate_roots};
pub use transport::{CommandOutput, EntryKind, RemoteEntry, RemoteStat, Transport};
