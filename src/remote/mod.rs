//! Remote filesystem capability used by the mirror engine.
//!
//! The engine only ever talks to the remote tree through [`RemoteFs`], a small
//! blocking interface shaped after SFTP:
//!
//! - **path**: normalized [`RemotePath`] values
//! - **sftp**: [`SftpRemote`], the real transport over an `ssh2` session
//! - **memory**: [`MemoryRemote`], an in-process tree with fault injection
//!
//! # Error tiers
//!
//! Every failure is a [`RemoteError`]. Only [`RemoteError::ConnectionLost`]
//! is fatal to a mirror run; everything else concerns a single entry and is
//! reported as a warning by the caller.

pub mod memory;
pub mod path;
pub mod sftp;

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use memory::{MemoryRemote, RemoteOp};
pub use path::RemotePath;
pub use sftp::{Auth, ConnectError, ConnectionConfig, SftpRemote};

/// POSIX file type mask.
pub const S_IFMT: u32 = 0o170_000;
/// POSIX directory type bits.
pub const S_IFDIR: u32 = 0o040_000;
/// POSIX regular file type bits.
pub const S_IFREG: u32 = 0o100_000;

/// Errors returned by a single remote filesystem call.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("No such file or directory: {0}")]
    NotFound(RemotePath),

    #[error("Permission denied: {0}")]
    PermissionDenied(RemotePath),

    #[error("{path}: {message}")]
    Failure { path: RemotePath, message: String },

    #[error("Failed to read local file {}: {source}", path.display())]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote connection lost: {0}")]
    ConnectionLost(String),
}

impl RemoteError {
    pub fn failure(path: &RemotePath, message: impl Into<String>) -> Self {
        Self::Failure {
            path: path.clone(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the session itself is gone, which aborts the whole run.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

/// Suffix of the sibling file an upload streams into before it is renamed
/// over the target.
pub const STAGING_SUFFIX: &str = ".rmirror-part";

const COPY_BUF_SIZE: usize = 32 * 1024;

/// Sibling path an upload to `remote` is staged at: `dir/.name.rmirror-part`.
pub fn staging_path(remote: &RemotePath) -> RemotePath {
    let name = remote.file_name().unwrap_or("upload");
    let parent = remote.parent().unwrap_or_else(RemotePath::root);
    parent.join(&format!(".{name}{STAGING_SUFFIX}"))
}

/// Stream `reader` into `writer`, keeping the two failure sources apart:
/// read errors belong to the local file, write errors to the remote entry.
pub fn copy_to_remote<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    local: &Path,
    remote: &RemotePath,
) -> Result<u64, RemoteError> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut written = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(RemoteError::Local {
                    path: local.to_path_buf(),
                    source,
                });
            }
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| classify_write(remote, e))?;
        written += n as u64;
    }
    writer.flush().map_err(|e| classify_write(remote, e))?;
    Ok(written)
}

/// Remote writes surface as `io::Error`; only transport-level kinds are
/// treated as a lost connection.
pub fn classify_write(path: &RemotePath, err: io::Error) -> RemoteError {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::TimedOut
        | io::ErrorKind::UnexpectedEof => RemoteError::ConnectionLost(err.to_string()),
        _ => RemoteError::failure(path, err.to_string()),
    }
}

/// Kind of a remote entry, derived from its mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Base name (no slashes).
    pub name: String,
    /// Platform mode bits, when the listing carried them.
    pub mode: Option<u32>,
}

/// Attributes returned by `stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteStat {
    pub mode: Option<u32>,
    pub size: Option<u64>,
}

/// Blocking remote filesystem operations.
///
/// Each call returns before the next one is issued; implementations never see
/// overlapping requests.
pub trait RemoteFs {
    fn stat(&self, path: &RemotePath) -> Result<RemoteStat, RemoteError>;

    /// Create a single directory. The parent must exist.
    fn mkdir(&self, path: &RemotePath) -> Result<(), RemoteError>;

    /// Remove an empty directory. Fails if the directory has entries.
    fn rmdir(&self, path: &RemotePath) -> Result<(), RemoteError>;

    /// Remove a non-directory entry.
    fn remove(&self, path: &RemotePath) -> Result<(), RemoteError>;

    /// Immediate children of a directory, without `.` and `..`.
    fn list_entries(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Copy a local file to `remote`, replacing it if present. Returns bytes
    /// written. On failure `remote` keeps whatever it held before the call.
    fn upload(&self, local: &Path, remote: &RemotePath) -> Result<u64, RemoteError>;

    /// Classify mode bits. Anything that is not a directory is treated as a file.
    fn kind_of(&self, mode: u32) -> EntryKind {
        if mode & S_IFMT == S_IFDIR {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_of_default_predicate() {
        let fs = MemoryRemote::new();
        assert_eq!(fs.kind_of(S_IFDIR | 0o755), EntryKind::Directory);
        assert_eq!(fs.kind_of(S_IFREG | 0o644), EntryKind::File);
        // symlinks are removed like files, never descended into
        assert_eq!(fs.kind_of(0o120_777), EntryKind::File);
    }

    #[test]
    fn test_remote_error_tiers() {
        let path = RemotePath::new("/srv/a");
        assert!(RemoteError::NotFound(path.clone()).is_not_found());
        assert!(!RemoteError::PermissionDenied(path.clone()).is_connection_lost());
        assert!(RemoteError::ConnectionLost("eof".into()).is_connection_lost());
        assert_eq!(
            RemoteError::failure(&path, "directory not empty").to_string(),
            "/srv/a: directory not empty"
        );
    }

    #[test]
    fn test_staging_path_is_hidden_sibling() {
        assert_eq!(
            staging_path(&RemotePath::new("/www/img/logo.svg")).as_str(),
            "/www/img/.logo.svg.rmirror-part"
        );
        assert_eq!(
            staging_path(&RemotePath::new("index.html")).as_str(),
            ".index.html.rmirror-part"
        );
    }

    #[test]
    fn test_classify_write_errors() {
        let path = RemotePath::new("/srv/site/index.html");
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(classify_write(&path, reset).is_connection_lost());
        let other = io::Error::other("quota exceeded");
        assert!(!classify_write(&path, other).is_connection_lost());
    }

    struct FailingReader(io::ErrorKind);

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(self.0, "nfs server not responding"))
        }
    }

    struct FailingWriter(io::ErrorKind);

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(self.0, "channel closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_copy_local_read_timeout_is_not_connection_loss() {
        let remote = RemotePath::new("/www/index.html");
        let err = copy_to_remote(
            &mut FailingReader(io::ErrorKind::TimedOut),
            &mut Vec::new(),
            Path::new("/mnt/nfs/index.html"),
            &remote,
        )
        .unwrap_err();
        assert!(!err.is_connection_lost());
        assert!(matches!(
            err,
            RemoteError::Local { ref path, .. } if path.as_path() == Path::new("/mnt/nfs/index.html")
        ));
    }

    #[test]
    fn test_copy_remote_write_errors_are_classified() {
        let remote = RemotePath::new("/www/index.html");
        let mut reader: &[u8] = b"<html>";

        let err = copy_to_remote(
            &mut reader,
            &mut FailingWriter(io::ErrorKind::ConnectionReset),
            Path::new("index.html"),
            &remote,
        )
        .unwrap_err();
        assert!(err.is_connection_lost());

        let mut reader: &[u8] = b"<html>";
        let err = copy_to_remote(
            &mut reader,
            &mut FailingWriter(io::ErrorKind::Other),
            Path::new("index.html"),
            &remote,
        )
        .unwrap_err();
        assert!(matches!(err, RemoteError::Failure { ref path, .. } if *path == remote));
    }

    #[test]
    fn test_copy_counts_bytes() {
        let mut reader: &[u8] = b"<svg/>";
        let mut out = Vec::new();
        let written = copy_to_remote(
            &mut reader,
            &mut out,
            Path::new("logo.svg"),
            &RemotePath::new("/www/logo.svg"),
        )
        .unwrap();
        assert_eq!(written, 6);
        assert_eq!(out, b"<svg/>");
    }
}
