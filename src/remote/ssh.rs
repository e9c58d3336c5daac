//! [`Transport`] over one ssh2 session and its SFTP channel.
//!
//! # Security
//!
//! Authentication is password based and the server host key is **not**
//! verified. Hosting accounts rotate their SSH endpoints and hand out
//! passwords only, so there is no known_hosts entry to check against.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::{ErrorCode, ExtendedData, Session, Sftp};

use super::error::{TransportError, TransportResult};
use super::transport::{CommandOutput, EntryKind, RemoteEntry, RemoteStat, Transport};

// libssh2 SFTP status codes meaning the path is absent.
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

/// Live SSH session with an SFTP sub-client on the same connection.
pub struct SshTransport {
    session: Session,
    sftp: Sftp,
}

impl SshTransport {
    /// Dial, handshake and authenticate once.
    ///
    /// `timeout` bounds the TCP connect and the handshake. It is lifted once
    /// the session is authenticated: file operations have no deadline.
    pub fn open(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> TransportResult<Self> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TransportError::Resolve(format!("{host}:{port}")))?;

        let tcp = TcpStream::connect_timeout(&addr, timeout)?;

        let mut session = Session::new()?;
        session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_password(user, password)?;
        if !session.authenticated() {
            return Err(TransportError::AuthRejected(user.to_string()));
        }
        session.set_timeout(0);

        let sftp = session.sftp()?;

        tracing::debug!(host = %host, port, user = %user, "ssh session established");
        Ok(Self { session, sftp })
    }
}

fn is_missing(err: &ssh2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH)
    )
}

/// Drain command output. Output may name files that are not UTF-8.
fn read_output(mut reader: impl Read) -> std::io::Result<String> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn to_remote_stat(stat: &ssh2::FileStat) -> RemoteStat {
    let kind = if stat.is_dir() {
        EntryKind::Dir
    } else if stat.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };
    RemoteStat {
        kind,
        size: stat.size.unwrap_or(0),
    }
}

impl Transport for SshTransport {
    fn stat(&self, path: &str) -> TransportResult<Option<RemoteStat>> {
        match self.sftp.stat(Path::new(path)) {
            Ok(stat) => Ok(Some(to_remote_stat(&stat))),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_dir(&self, path: &str) -> TransportResult<Vec<RemoteEntry>> {
        let mut out = Vec::new();
        for (child, stat) in self.sftp.readdir(Path::new(path))? {
            let Some(name) = child.file_name() else {
                continue;
            };
            let name = name
                .to_str()
                .ok_or_else(|| TransportError::NonUtf8Name(child.display().to_string()))?;
            if name == "." || name == ".." {
                continue;
            }
            out.push(RemoteEntry {
                name: name.to_string(),
                stat: to_remote_stat(&stat),
            });
        }
        Ok(out)
    }

    fn mkdir_all(&self, path: &str) -> TransportResult<()> {
        let mut prefix = String::with_capacity(path.len());
        if path.starts_with('/') {
            prefix.push('/');
        }

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() && !prefix.ends_with('/') {
                prefix.push('/');
            }
            prefix.push_str(segment);

            match self.stat(&prefix)? {
                Some(stat) if stat.is_dir() => continue,
                Some(_) => {
                    return Err(TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        format!("{prefix} exists and is not a directory"),
                    )));
                }
                None => {}
            }

            if let Err(e) = self.sftp.mkdir(Path::new(&prefix), 0o755) {
                // Lost a race with another writer; fine as long as it is a directory now.
                if !matches!(self.stat(&prefix)?, Some(stat) if stat.is_dir()) {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn open(&self, path: &str) -> TransportResult<Box<dyn Read + '_>> {
        Ok(Box::new(self.sftp.open(Path::new(path))?))
    }

    fn create(&self, path: &str) -> TransportResult<Box<dyn Write + '_>> {
        Ok(Box::new(self.sftp.create(Path::new(path))?))
    }

    fn exec(&self, command: &str) -> TransportResult<CommandOutput> {
        let mut channel = self.session.channel_session()?;
        channel.handle_extended_data(ExtendedData::Merge)?;
        channel.exec(command)?;

        let output = read_output(&mut channel)?;
        channel.wait_close()?;

        Ok(CommandOutput {
            output,
            exit_status: channel.exit_status()?,
        })
    }

    fn disconnect(&self) -> TransportResult<()> {
        self.session.disconnect(None, "closing", None)?;
        Ok(())
    }
}
