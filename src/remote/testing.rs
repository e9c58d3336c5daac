//! Local-directory stand-in for a remote host, for unit tests.

use std::cell::{Cell, RefCell};
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use tempfile::TempDir;

use super::error::{TransportError, TransportResult};
use super::transport::{CommandOutput, EntryKind, RemoteEntry, RemoteStat, Transport};

/// Maps remote paths onto a temporary directory and records every call.
pub struct LocalTransport {
    root: TempDir,
    calls: Cell<usize>,
    created: RefCell<Vec<String>>,
    commands: RefCell<Vec<String>>,
    fail_create: RefCell<Option<String>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            calls: Cell::new(0),
            created: RefCell::new(Vec::new()),
            commands: RefCell::new(Vec::new()),
            fail_create: RefCell::new(None),
        }
    }

    fn host_path(&self, path: &str) -> PathBuf {
        let mut out = self.root.path().to_path_buf();
        for segment in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
            out.push(segment);
        }
        out
    }

    fn tick(&self) {
        self.calls.set(self.calls.get() + 1);
    }

    /// Seed a remote file, creating parents.
    pub fn put(&self, path: &str, content: &[u8]) {
        let target = self.host_path(path);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, content).unwrap();
    }

    pub fn read(&self, path: &str) -> Vec<u8> {
        fs::read(self.host_path(path)).unwrap()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.host_path(path).exists()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.host_path(path).is_dir()
    }

    /// Sorted `/`-separated paths of every entry under `path`.
    pub fn tree(&self, path: &str) -> Vec<String> {
        let base = self.host_path(path);
        let mut out: Vec<String> = walkdir::WalkDir::new(&base)
            .min_depth(1)
            .into_iter()
            .map(|e| {
                let e = e.unwrap();
                e.path()
                    .strip_prefix(&base)
                    .unwrap()
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .collect();
        out.sort();
        out
    }

    /// Seed a remote file whose name is raw bytes, under an existing `dir`.
    #[cfg(target_os = "linux")]
    pub fn put_raw(&self, dir: &str, name: &[u8], content: &[u8]) {
        use std::os::unix::ffi::OsStrExt;
        let target = self.host_path(dir).join(std::ffi::OsStr::from_bytes(name));
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(target, content).unwrap();
    }

    /// Total number of transport calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// Remote paths opened for writing, in order.
    pub fn created(&self) -> Vec<String> {
        self.created.borrow().clone()
    }

    /// Commands executed, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    pub fn reset_log(&self) {
        self.calls.set(0);
        self.created.borrow_mut().clear();
        self.commands.borrow_mut().clear();
    }

    /// Make `create` fail for this exact remote path.
    pub fn fail_create_on(&self, path: &str) {
        *self.fail_create.borrow_mut() = Some(path.to_string());
    }

    fn stat_host(path: &std::path::Path) -> std::io::Result<RemoteStat> {
        let meta = fs::metadata(path)?;
        let kind = if meta.is_dir() {
            EntryKind::Dir
        } else if meta.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };
        Ok(RemoteStat {
            kind,
            size: meta.len(),
        })
    }

    fn rm_rf(&self, path: &str) {
        let target = self.host_path(path);
        if target.is_dir() {
            let _ = fs::remove_dir_all(target);
        } else {
            let _ = fs::remove_file(target);
        }
    }
}

impl Transport for LocalTransport {
    fn stat(&self, path: &str) -> TransportResult<Option<RemoteStat>> {
        self.tick();
        match Self::stat_host(&self.host_path(path)) {
            Ok(stat) => Ok(Some(stat)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn read_dir(&self, path: &str) -> TransportResult<Vec<RemoteEntry>> {
        self.tick();
        let mut out = Vec::new();
        for entry in fs::read_dir(self.host_path(path))? {
            let entry = entry?;
            let name = entry.file_name().into_string().map_err(|raw| {
                TransportError::NonUtf8Name(raw.to_string_lossy().into_owned())
            })?;
            out.push(RemoteEntry {
                name,
                stat: Self::stat_host(&entry.path())?,
            });
        }
        Ok(out)
    }

    fn mkdir_all(&self, path: &str) -> TransportResult<()> {
        self.tick();
        fs::create_dir_all(self.host_path(path))?;
        Ok(())
    }

    fn open(&self, path: &str) -> TransportResult<Box<dyn Read + '_>> {
        self.tick();
        Ok(Box::new(fs::File::open(self.host_path(path))?))
    }

    fn create(&self, path: &str) -> TransportResult<Box<dyn Write + '_>> {
        self.tick();
        if self.fail_create.borrow().as_deref() == Some(path) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "permission denied",
            )));
        }
        self.created.borrow_mut().push(path.to_string());
        Ok(Box::new(fs::File::create(self.host_path(path))?))
    }

    fn exec(&self, command: &str) -> TransportResult<CommandOutput> {
        self.tick();
        self.commands.borrow_mut().push(command.to_string());

        let argv = shell_words::split(command)
            .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))?;
        let args: Vec<&str> = argv.iter().map(String::as_str).collect();

        let output = match args.as_slice() {
            ["echo", rest @ ..] => CommandOutput {
                output: format!("{}\n", rest.join(" ")),
                exit_status: 0,
            },
            ["rm", "-rf", "--", paths @ ..] => {
                for path in paths {
                    self.rm_rf(path);
                }
                CommandOutput::default()
            }
            [program, ..] => CommandOutput {
                output: format!("sh: 1: {program}: not found\n"),
                exit_status: 127,
            },
            [] => CommandOutput::default(),
        };
        Ok(output)
    }

    fn disconnect(&self) -> TransportResult<()> {
        Ok(())
    }
}
