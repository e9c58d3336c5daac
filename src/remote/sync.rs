//! One-way mirror of a local directory onto a remote host.
//!
//! A sync is a fresh, full comparison of both trees; nothing is persisted
//! between runs. It runs in two phases over a single [`Connection`]:
//!
//! 1. **Prune**: walk the remote tree under the destination and `rm -rf`
//!    every entry that is filtered out, missing locally, of a different kind,
//!    or of different content. Identical files are left alone.
//! 2. **Populate**: walk the local tree, create missing remote directories and
//!    upload every file that did not survive the prune phase.
//!
//! Re-running a sync without local changes transfers nothing.
//!
//! # Safety
//!
//! **IMPORTANT**: the prune phase deletes remote data. Everything under the
//! destination that has no counterpart in the source is removed, so a wrong
//! destination wipes unrelated files. Only paths under the destination are
//! ever passed to [`Connection::force_remove`].
//!
//! # Example
//!
//! ```rust,ignore
//! use owh::remote::{Connection, ConnectionParams, RetryPolicy};
//!
//! let params = ConnectionParams::new("ssh.cluster0.example", 22, "blog", password);
//! let conn = Connection::connect(params, &RetryPolicy::default())?;
//! let report = conn.sync("public", "www")?;
//! println!("uploaded {} files", report.files_uploaded);
//! conn.close()?;
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use walkdir::{DirEntry, WalkDir};

use super::connection::Connection;
use super::digest::{digest_buffer, is_identical};
use super::error::RemoteError;
use super::filter::should_skip;
use super::transport::{Transport, remote_join};

/// What one sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files written to the remote.
    pub files_uploaded: u64,
    /// Bytes written to the remote.
    pub bytes_uploaded: u64,
    /// Remote files confirmed identical and left untouched.
    pub files_unchanged: u64,
    /// Remote entries removed (a directory counts once).
    pub entries_removed: u64,
    /// Remote directories ensured during the populate phase.
    pub directories_ensured: u64,
    /// Local paths left out by the path filter.
    pub paths_skipped: u64,
    /// Wall time of the whole sync.
    pub duration_ms: u64,
}

impl SyncReport {
    /// Whether the remote was already up to date.
    pub fn is_noop(&self) -> bool {
        self.files_uploaded == 0 && self.entries_removed == 0
    }
}

/// Check the sync roots before anything touches the network.
pub fn validate_roots(source: &str, destination: &str) -> Result<(), RemoteError> {
    if source.is_empty() {
        return Err(RemoteError::EmptySource);
    }
    if destination.is_empty() {
        return Err(RemoteError::EmptyDestination);
    }
    Ok(())
}

/// `/`-separated path of `path` relative to `root`.
///
/// `None` when `path` is not under `root` or is not valid UTF-8.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let segments = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(segments.join("/"))
}

/// Local entries that take part in a sync, top-down, root excluded.
///
/// Filtered paths are reported to `on_skip` and never descended into.
/// Symlinks are followed. A name that is not valid UTF-8 yields
/// [`RemoteError::NonUtf8Path`].
pub fn local_entries<'s>(
    source: &'s Path,
    mut on_skip: impl FnMut(&str) + 's,
) -> impl Iterator<Item = Result<(String, DirEntry), RemoteError>> + 's {
    WalkDir::new(source)
        .min_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_entry(move |entry| match relative_path(source, entry.path()) {
            Some(rel) if should_skip(&rel) => {
                on_skip(&rel);
                false
            }
            _ => true,
        })
        .map(move |entry| match entry {
            Ok(entry) => match relative_path(source, entry.path()) {
                Some(rel) => Ok((rel, entry)),
                None => Err(RemoteError::NonUtf8Path(entry.path().to_path_buf())),
            },
            Err(err) => Err(RemoteError::Walk {
                root: source.to_path_buf(),
                source: err,
            }),
        })
}

impl<T: Transport> Connection<T> {
    /// Make `destination` on the remote mirror the local `source` directory.
    ///
    /// Stops at the first error; entries already removed or uploaded stay as
    /// they are. Safe to re-run.
    pub fn sync(&self, source: &str, destination: &str) -> Result<SyncReport, RemoteError> {
        validate_roots(source, destination)?;
        Reconciler::new(self, Path::new(source), destination).run()
    }
}

/// Whether the prune walk should list a directory's children.
#[derive(Debug, PartialEq, Eq)]
enum Visit {
    Descend,
    Done,
}

struct Reconciler<'a, T: Transport> {
    conn: &'a Connection<T>,
    source: &'a Path,
    destination: &'a str,
    // Allocated on first content comparison.
    buffer: Vec<u8>,
    report: SyncReport,
}

impl<'a, T: Transport> Reconciler<'a, T> {
    fn new(conn: &'a Connection<T>, source: &'a Path, destination: &'a str) -> Self {
        Self {
            conn,
            source,
            destination,
            buffer: Vec::new(),
            report: SyncReport::default(),
        }
    }

    fn transport(&self) -> &'a T {
        &self.conn.transport
    }

    fn run(mut self) -> Result<SyncReport, RemoteError> {
        let start = Instant::now();

        self.transport()
            .mkdir_all(self.destination)
            .map_err(|e| RemoteError::transfer(self.destination, e))?;

        self.prune()?;
        self.populate()?;

        self.report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            host = %self.conn.host(),
            source = %self.source.display(),
            destination = %self.destination,
            uploaded = self.report.files_uploaded,
            bytes = self.report.bytes_uploaded,
            unchanged = self.report.files_unchanged,
            removed = self.report.entries_removed,
            duration_ms = self.report.duration_ms,
            "sync completed"
        );
        Ok(self.report)
    }

    fn local_path(&self, rel: &str) -> PathBuf {
        let mut path = self.source.to_path_buf();
        path.extend(rel.split('/'));
        path
    }

    fn remove(&mut self, remote_path: &str, reason: &str) -> Result<(), RemoteError> {
        tracing::debug!(path = %remote_path, reason, "removing remote entry");
        self.conn.force_remove(remote_path)?;
        self.report.entries_removed += 1;
        Ok(())
    }

    // Phase 1

    fn prune(&mut self) -> Result<(), RemoteError> {
        let mut pending = vec![String::new()];

        while let Some(rel_dir) = pending.pop() {
            let remote_dir = remote_join(self.destination, &rel_dir);
            let entries =
                self.transport()
                    .read_dir(&remote_dir)
                    .map_err(|source| RemoteError::RemoteStat {
                        path: remote_dir.clone(),
                        source,
                    })?;

            for entry in entries {
                let rel = remote_join(&rel_dir, &entry.name);
                if self.prune_entry(&rel)? == Visit::Descend {
                    pending.push(rel);
                }
            }
        }
        Ok(())
    }

    fn prune_entry(&mut self, rel: &str) -> Result<Visit, RemoteError> {
        let remote_path = remote_join(self.destination, rel);

        let remote = self
            .transport()
            .stat(&remote_path)
            .map_err(|source| RemoteError::RemoteStat {
                path: remote_path.clone(),
                source,
            })?;
        let Some(remote) = remote else {
            tracing::debug!(path = %remote_path, "remote entry vanished");
            return Ok(Visit::Done);
        };

        if should_skip(rel) {
            self.remove(&remote_path, "filtered")?;
            return Ok(Visit::Done);
        }

        let local_path = self.local_path(rel);
        let local = match fs::metadata(&local_path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.remove(&remote_path, "missing locally")?;
                return Ok(Visit::Done);
            }
            Err(source) => {
                return Err(RemoteError::LocalStat {
                    path: local_path,
                    source,
                });
            }
        };

        if local.is_dir() && remote.is_dir() {
            return Ok(Visit::Descend);
        }

        if local.is_file()
            && remote.is_file()
            && local.len() == remote.size
            && self.identical(&local_path, &remote_path)?
        {
            self.report.files_unchanged += 1;
            return Ok(Visit::Done);
        }

        self.remove(&remote_path, "changed")?;
        Ok(Visit::Done)
    }

    fn identical(&mut self, local_path: &Path, remote_path: &str) -> Result<bool, RemoteError> {
        if self.buffer.is_empty() {
            self.buffer = digest_buffer();
        }

        let local = File::open(local_path)
            .map_err(|e| RemoteError::transfer(local_path.display().to_string(), e))?;
        let remote = self
            .transport()
            .open(remote_path)
            .map_err(|e| RemoteError::transfer(remote_path, e))?;

        is_identical(local, remote, &mut self.buffer)
            .map_err(|e| RemoteError::transfer(remote_path, e))
    }

    // Phase 2

    fn populate(&mut self) -> Result<(), RemoteError> {
        let mut skipped = 0u64;

        let entries = local_entries(self.source, |rel| {
            tracing::debug!(path = %rel, "path skipped");
            skipped += 1;
        });

        for item in entries {
            let (rel, entry) = item?;
            let remote_path = remote_join(self.destination, &rel);

            if entry.file_type().is_dir() {
                self.transport()
                    .mkdir_all(&remote_path)
                    .map_err(|e| RemoteError::transfer(remote_path.as_str(), e))?;
                self.report.directories_ensured += 1;
            } else if entry.file_type().is_file() {
                let len = entry
                    .metadata()
                    .map_err(|source| RemoteError::Walk {
                        root: self.source.to_path_buf(),
                        source,
                    })?
                    .len();
                self.upload(entry.path(), &remote_path, len)?;
            } else {
                tracing::debug!(path = %rel, "not a regular file, ignored");
            }
        }

        self.report.paths_skipped = skipped;
        Ok(())
    }

    fn upload(&mut self, local_path: &Path, remote_path: &str, len: u64) -> Result<(), RemoteError> {
        // Anything still here after the prune phase was hashed and found identical.
        let existing = self
            .transport()
            .stat(remote_path)
            .map_err(|source| RemoteError::RemoteStat {
                path: remote_path.to_string(),
                source,
            })?;
        if existing.is_some_and(|stat| stat.is_file() && stat.size == len) {
            tracing::debug!(path = %remote_path, "already up to date");
            return Ok(());
        }

        let mut local = File::open(local_path)
            .map_err(|e| RemoteError::transfer(local_path.display().to_string(), e))?;
        let mut remote = self
            .transport()
            .create(remote_path)
            .map_err(|e| RemoteError::transfer(remote_path, e))?;

        let bytes = std::io::copy(&mut local, &mut remote)
            .map_err(|e| RemoteError::transfer(remote_path, e))?;
        remote
            .flush()
            .map_err(|e| RemoteError::transfer(remote_path, e))?;

        tracing::debug!(path = %remote_path, bytes, "uploaded");
        self.report.files_uploaded += 1;
        self.report.bytes_uploaded += bytes;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::connection::ConnectionParams;
    use crate::remote::testing::LocalTransport;
    use tempfile::TempDir;

    fn connection() -> Connection<LocalTransport> {
        let params = ConnectionParams::new("localhost", 22, "deploy", "secret");
        Connection::with_transport(LocalTransport::new(), &params)
    }

    fn local_tree(files: &[(&str, &str)]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for (path, content) in files {
            let target = tmp.path().join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, content.as_bytes()).unwrap();
        }
        tmp
    }

    fn src(tmp: &TempDir) -> &str {
        tmp.path().to_str().unwrap()
    }

    #[test]
    fn test_empty_source_rejected_without_network() {
        let conn = connection();
        let err = conn.sync("", "dest").unwrap_err();
        assert!(matches!(err, RemoteError::EmptySource));
        assert_eq!(conn.transport.calls(), 0);
    }

    #[test]
    fn test_empty_destination_rejected_without_network() {
        let conn = connection();
        let err = conn.sync("src", "").unwrap_err();
        assert!(matches!(err, RemoteError::EmptyDestination));
        assert_eq!(conn.transport.calls(), 0);
    }

    #[test]
    fn test_prunes_stale_and_keeps_identical() {
        let local = local_tree(&[
            ("index.html", "0123456789"),
            ("sub/page.html", "abcdefghijklmnopqrst"),
        ]);
        let conn = connection();
        conn.transport.put("www/stale.html", b"stale");
        conn.transport.put("www/sub/page.html", b"abcdefghijklmnopqrst");

        let report = conn.sync(src(&local), "www").unwrap();

        assert_eq!(
            conn.transport.tree("www"),
            vec!["index.html", "sub", "sub/page.html"]
        );
        assert_eq!(conn.transport.created(), vec!["www/index.html"]);
        assert_eq!(conn.transport.read("www/index.html"), b"0123456789");
        assert_eq!(report.files_uploaded, 1);
        assert_eq!(report.bytes_uploaded, 10);
        assert_eq!(report.files_unchanged, 1);
        assert_eq!(report.entries_removed, 1);
        assert_eq!(conn.transport.commands(), vec!["rm -rf -- www/stale.html"]);
    }

    #[test]
    fn test_second_sync_transfers_nothing() {
        let local = local_tree(&[
            ("index.html", "<h1>hi</h1>"),
            ("css/site.css", "body{}"),
            ("img/logo.svg", "<svg/>"),
        ]);
        let conn = connection();

        let first = conn.sync(src(&local), "www").unwrap();
        assert_eq!(first.files_uploaded, 3);

        conn.transport.reset_log();
        let second = conn.sync(src(&local), "www").unwrap();

        assert!(second.is_noop());
        assert_eq!(second.files_unchanged, 3);
        assert!(conn.transport.created().is_empty());
        assert!(conn.transport.commands().is_empty());
    }

    #[test]
    fn test_size_change_replaces_remote_file() {
        let local = local_tree(&[]);
        fs::write(local.path().join("a.txt"), [b'x'; 100]).unwrap();
        let conn = connection();
        conn.sync(src(&local), "www").unwrap();
        assert_eq!(conn.transport.read("www/a.txt").len(), 100);

        fs::write(local.path().join("a.txt"), [b'y'; 50]).unwrap();
        let report = conn.sync(src(&local), "www").unwrap();

        assert_eq!(conn.transport.read("www/a.txt"), vec![b'y'; 50]);
        assert_eq!(report.entries_removed, 1);
        assert_eq!(report.files_uploaded, 1);
    }

    #[test]
    fn test_same_size_different_content_replaced() {
        let local = local_tree(&[("a.txt", "new!")]);
        let conn = connection();
        conn.transport.put("www/a.txt", b"old!");

        let report = conn.sync(src(&local), "www").unwrap();

        assert_eq!(conn.transport.read("www/a.txt"), b"new!");
        assert_eq!(report.files_unchanged, 0);
        assert_eq!(report.entries_removed, 1);
    }

    #[test]
    fn test_kind_mismatch_replaced() {
        let local = local_tree(&[("docs/readme.txt", "read me"), ("page", "page")]);
        let conn = connection();
        conn.transport.put("www/docs", b"a file where a dir belongs");
        conn.transport.put("www/page/nested.txt", b"a dir where a file belongs");

        conn.sync(src(&local), "www").unwrap();

        assert!(conn.transport.is_dir("www/docs"));
        assert_eq!(conn.transport.read("www/docs/readme.txt"), b"read me");
        assert_eq!(conn.transport.read("www/page"), b"page");
    }

    #[test]
    fn test_filtered_paths_not_uploaded() {
        let local = local_tree(&[
            ("index.html", "home"),
            (".htaccess", "RewriteEngine On"),
            (".well-known/acme-challenge/token", "abc"),
            (".git/config", "[core]"),
            ("node_modules/pkg/index.js", "module.exports = 1"),
        ]);
        let conn = connection();

        let report = conn.sync(src(&local), "www").unwrap();

        assert_eq!(
            conn.transport.tree("www"),
            vec![
                ".htaccess",
                ".well-known",
                ".well-known/acme-challenge",
                ".well-known/acme-challenge/token",
                "index.html",
            ]
        );
        assert_eq!(report.paths_skipped, 2);
    }

    #[test]
    fn test_filtered_remote_entries_pruned() {
        let local = local_tree(&[("index.html", "home"), (".git/HEAD", "ref")]);
        let conn = connection();
        conn.transport.put("www/.git/HEAD", b"ref");
        conn.transport.put("www/index.html", b"home");

        conn.sync(src(&local), "www").unwrap();

        assert_eq!(conn.transport.tree("www"), vec!["index.html"]);
    }

    #[test]
    fn test_destination_created_with_ancestors() {
        let local = local_tree(&[("index.html", "home")]);
        let conn = connection();

        conn.sync(src(&local), "sites/blog/www").unwrap();

        assert_eq!(conn.transport.read("sites/blog/www/index.html"), b"home");
    }

    #[test]
    fn test_empty_local_directory_mirrored() {
        let local = local_tree(&[("index.html", "home")]);
        fs::create_dir_all(local.path().join("uploads")).unwrap();
        let conn = connection();

        let report = conn.sync(src(&local), "www").unwrap();

        assert!(conn.transport.is_dir("www/uploads"));
        assert_eq!(report.directories_ensured, 1);
    }

    #[test]
    fn test_removed_local_directory_pruned_once() {
        let local = local_tree(&[("index.html", "home")]);
        let conn = connection();
        conn.transport.put("www/old/a.txt", b"a");
        conn.transport.put("www/old/deep/b.txt", b"b");

        let report = conn.sync(src(&local), "www").unwrap();

        assert!(!conn.transport.exists("www/old"));
        assert_eq!(report.entries_removed, 1);
    }

    #[test]
    fn test_transfer_error_aborts_sync() {
        let local = local_tree(&[("a.txt", "a")]);
        let conn = connection();
        conn.transport.fail_create_on("www/a.txt");

        let err = conn.sync(src(&local), "www").unwrap_err();

        match err {
            RemoteError::Transfer { path, .. } => assert_eq!(path, "www/a.txt"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_remote_name_fails_sync() {
        use crate::remote::error::TransportError;

        let local = local_tree(&[("index.html", "home")]);
        let conn = connection();
        conn.transport.put("www/index.html", b"home");
        conn.transport.put_raw("www", b"stale\xff.html", b"stale");

        let err = conn.sync(src(&local), "www").unwrap_err();

        match err {
            RemoteError::RemoteStat { path, source } => {
                assert_eq!(path, "www");
                assert!(matches!(source, TransportError::NonUtf8Name(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(conn.transport.created().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_local_name_fails_sync() {
        use std::os::unix::ffi::OsStrExt;

        let local = local_tree(&[("index.html", "home")]);
        let raw = local.path().join(std::ffi::OsStr::from_bytes(b"page\xff.html"));
        fs::write(&raw, "page").unwrap();
        let conn = connection();

        let err = conn.sync(src(&local), "www").unwrap_err();

        match err {
            RemoteError::NonUtf8Path(path) => assert_eq!(path, raw),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!conn.transport.tree("www").iter().any(|p| p.starts_with("page")));
    }

    #[test]
    fn test_local_entries_skips_filtered_subtrees() {
        let local = local_tree(&[
            ("index.html", "home"),
            ("blog/post.html", "post"),
            (".git/objects/ab/cdef", "blob"),
            ("node_modules/pkg/index.js", "js"),
        ]);
        let mut skipped = Vec::new();
        let mut paths: Vec<String> = local_entries(local.path(), |rel| skipped.push(rel.to_string()))
            .map(|item| item.unwrap().0)
            .collect();
        paths.sort();
        skipped.sort();

        assert_eq!(paths, vec!["blog", "blog/post.html", "index.html"]);
        assert_eq!(skipped, vec![".git", "node_modules"]);
    }

    #[test]
    fn test_relative_path() {
        let root = Path::new("/srv/site");
        assert_eq!(
            relative_path(root, Path::new("/srv/site/sub/page.html")).as_deref(),
            Some("sub/page.html")
        );
        assert_eq!(relative_path(root, Path::new("/srv/site")).as_deref(), Some(""));
        assert_eq!(relative_path(root, Path::new("/elsewhere")), None);
    }

    #[test]
    fn test_validate_roots() {
        assert!(validate_roots("public", "www").is_ok());
        assert!(matches!(
            validate_roots("", "www"),
            Err(RemoteError::EmptySource)
        ));
        assert!(matches!(
            validate_roots("public", ""),
            Err(RemoteError::EmptyDestination)
        ));
    }

    #[test]
    fn test_report_is_noop() {
        assert!(SyncReport::default().is_noop());
        let report = SyncReport {
            files_uploaded: 1,
            ..Default::default()
        };
        assert!(!report.is_noop());
    }
}
