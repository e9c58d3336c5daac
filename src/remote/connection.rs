//! Authenticated connection to one host: retrying connect, command facade.

use std::fmt;
use std::time::Duration;

use super::error::{RemoteError, TransportResult};
use super::ssh::SshTransport;
use super::transport::Transport;

/// Parameters needed to open a [`Connection`].
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl ConnectionParams {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
        }
    }

    /// `host:port`, for messages.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How hard [`Connection::connect`] tries before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Treated as at least 1.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub interval: Duration,
    /// Bound on TCP connect plus handshake for a single attempt.
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Set the number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the pause between attempts.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the per-attempt connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Run `attempt` until it succeeds or the attempts are used up.
    ///
    /// Returns the last error together with the number of attempts made.
    pub fn run<T, E: fmt::Display>(
        &self,
        mut attempt: impl FnMut(u32) -> Result<T, E>,
    ) -> Result<T, (E, u32)> {
        let max = self.max_attempts.max(1);
        let mut n = 1;
        loop {
            match attempt(n) {
                Ok(value) => return Ok(value),
                Err(e) if n >= max => return Err((e, n)),
                Err(e) => {
                    tracing::warn!(attempt = n, max_attempts = max, error = %e, "connection attempt failed");
                    std::thread::sleep(self.interval);
                    n += 1;
                }
            }
        }
    }
}

/// One authenticated session to a single host.
///
/// The session is the only conduit for both command execution and file
/// transfer. It is not safe to share between concurrent syncs; open one
/// connection per concurrent sync instead. There is no automatic reconnect.
pub struct Connection<T: Transport = SshTransport> {
    pub(crate) transport: T,
    host: String,
    port: u16,
    user: String,
}

impl Connection<SshTransport> {
    /// Open an SSH session, retrying according to `policy`.
    pub fn connect(params: ConnectionParams, policy: &RetryPolicy) -> Result<Self, RemoteError> {
        let addr = params.addr();
        tracing::debug!(addr = %addr, user = %params.user, "connecting");

        let transport = policy
            .run(|_| {
                SshTransport::open(
                    &params.host,
                    params.port,
                    &params.user,
                    &params.password,
                    policy.connect_timeout,
                )
            })
            .map_err(|(source, attempts)| RemoteError::Connect {
                addr: addr.clone(),
                attempts,
                source,
            })?;

        Ok(Self::with_transport(transport, &params))
    }
}

impl<T: Transport> Connection<T> {
    /// Wrap an already established transport.
    pub fn with_transport(transport: T, params: &ConnectionParams) -> Self {
        Self {
            transport,
            host: params.host.clone(),
            port: params.port,
            user: params.user.clone(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Run a command remotely and return its combined stdout/stderr.
    ///
    /// A non-zero exit status is an error carrying the captured output.
    pub fn run(&self, command: &str) -> Result<String, RemoteError> {
        tracing::debug!(host = %self.host, command = %command, "running remote command");
        let out = self.transport.exec(command)?;
        if !out.success() {
            return Err(RemoteError::Command {
                command: command.to_string(),
                status: out.exit_status,
                output: out.output,
            });
        }
        Ok(out.output)
    }

    /// `rm -rf` a remote path. A missing path is not an error.
    ///
    /// Callers must only pass paths rooted under their sync destination.
    pub fn force_remove(&self, path: &str) -> Result<(), RemoteError> {
        check_removable(path)?;
        self.run(&force_remove_command(path)).map(|_| ())
    }

    /// Close the session.
    pub fn close(self) -> TransportResult<()> {
        self.transport.disconnect()
    }
}

/// Reject paths `force_remove` must never touch: empty, blank or `/`.
pub fn check_removable(path: &str) -> Result<(), RemoteError> {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.trim_end_matches('/').is_empty() {
        return Err(RemoteError::UnsafeRemove(path.to_string()));
    }
    Ok(())
}

/// Shell command removing `path` recursively, tolerating absence.
pub fn force_remove_command(path: &str) -> String {
    format!("rm -rf -- {}", shell_words::quote(path))
}
