//! Mirror engine: make a remote tree equal a filtered view of a local tree.
//!
//! The run is a fixed pipeline over one remote connection:
//!
//! 1. **ensure**: create the remote root and any missing ancestors
//! 2. **clear**: delete everything beneath the remote root
//! 3. **upload**: walk the local tree, recreate its directories, upload files
//!    that pass the [`FilterConfig`]
//! 4. **prune**: remove remote directories left empty by the upload
//!
//! # Failure tiers
//!
//! A bad local root or a dropped connection aborts the run with a
//! [`MirrorError`]. Every other failure concerns one entry: it is logged,
//! recorded in [`MirrorReport::warnings`], and the run carries on with the
//! entry's siblings. Nothing is retried.
//!
//! # Example
//!
//! ```rust,ignore
//! use remote_mirror::mirror::{mirror, FilterConfig, MirrorOptions};
//! use remote_mirror::remote::{RemotePath, SftpRemote};
//!
//! let remote = SftpRemote::connect(&connection)?;
//! let filter = FilterConfig::new(Some(["html", "css"]), Some([".git"]));
//! let report = mirror(&remote, "./dist".as_ref(), &RemotePath::new("/var/www/site"), &filter, MirrorOptions::default())?;
//! println!("{} files uploaded, {} warnings", report.files_uploaded, report.warnings.len());
//! ```

mod clear;
mod ensure;
pub mod filter;
mod prune;
mod upload;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::local;
use crate::remote::{EntryKind, RemoteEntry, RemoteError, RemoteFs, RemotePath};

pub use filter::FilterConfig;

/// Failures that abort the whole run.
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Local path is not a directory: {}", .0.display())]
    LocalRootNotDirectory(PathBuf),

    #[error(transparent)]
    ConnectionLost(RemoteError),
}

/// Which optional phases to run. Ensure and upload always run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MirrorOptions {
    /// Delete remote contents before uploading. Without it stale remote
    /// files that no longer exist locally survive the run.
    pub clear: bool,
    /// Remove remote directories that end up empty.
    pub prune: bool,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            clear: true,
            prune: true,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorReport {
    /// Remote directories created by ensure.
    pub dirs_created: u64,
    /// Files uploaded successfully.
    pub files_uploaded: u64,
    /// Bytes written by successful uploads.
    pub bytes_uploaded: u64,
    /// Local files left out by the extension allowlist.
    pub files_skipped: u64,
    /// Remote files and directories deleted while clearing.
    pub entries_removed: u64,
    /// Empty remote directories removed by pruning.
    pub dirs_pruned: u64,
    /// Every non-fatal failure, in the order it happened.
    pub warnings: Vec<String>,
    /// Wall time of the run.
    pub duration_ms: u64,
}

impl MirrorReport {
    /// Completed without a single warning.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Runs the mirror components against one remote connection.
///
/// The engine caches directories it has seen to exist so the upload walk does
/// not re-stat every ancestor of every directory; any directory it removes is
/// forgotten again.
pub struct MirrorEngine<'a, F: RemoteFs + ?Sized> {
    fs: &'a F,
    report: MirrorReport,
    known_dirs: HashSet<RemotePath>,
}

impl<'a, F: RemoteFs + ?Sized> MirrorEngine<'a, F> {
    pub fn new(fs: &'a F) -> Self {
        Self {
            fs,
            report: MirrorReport::default(),
            known_dirs: HashSet::new(),
        }
    }

    /// Report accumulated so far.
    pub fn report(&self) -> &MirrorReport {
        &self.report
    }

    /// Consume the engine and hand back its report.
    pub fn into_report(self) -> MirrorReport {
        self.report
    }

    fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        self.report.warnings.push(message);
    }

    fn forget_dir(&mut self, path: &RemotePath) {
        self.known_dirs.remove(path);
    }

    /// Kind of a listed entry, falling back to `stat` when the listing has no
    /// mode. `None` (with a warning) when neither yields one.
    fn entry_kind(
        &mut self,
        path: &RemotePath,
        entry: &RemoteEntry,
    ) -> Result<Option<EntryKind>, MirrorError> {
        let mode = match entry.mode {
            Some(mode) => Some(mode),
            None => match self.fs.stat(path) {
                Ok(stat) => stat.mode,
                Err(e) => {
                    let e = triage(e)?;
                    self.warn(format!("could not stat remote entry {path}: {e}"));
                    return Ok(None);
                }
            },
        };

        match mode {
            Some(mode) => Ok(Some(self.fs.kind_of(mode))),
            None => {
                self.warn(format!("remote entry {path} has no mode bits"));
                Ok(None)
            }
        }
    }
}

/// Split a failed remote call into the fatal tier (`Err`) and the per-entry
/// tier (`Ok`, to be reported by the caller).
fn triage(err: RemoteError) -> Result<RemoteError, MirrorError> {
    if err.is_connection_lost() {
        Err(MirrorError::ConnectionLost(err))
    } else {
        Ok(err)
    }
}

/// Mirror `local_root` onto `remote_root`.
///
/// The local root is validated before the remote is touched, so a mistyped
/// local path never clears the remote tree.
pub fn mirror<F: RemoteFs + ?Sized>(
    fs: &F,
    local_root: &Path,
    remote_root: &RemotePath,
    filter: &FilterConfig,
    options: MirrorOptions,
) -> Result<MirrorReport, MirrorError> {
    local::check_root(local_root)?;

    let start = Instant::now();
    let mut engine = MirrorEngine::new(fs);

    tracing::info!(
        local = %local_root.display(),
        remote = %remote_root,
        clear = options.clear,
        prune = options.prune,
        "starting mirror"
    );

    engine.ensure_dir(remote_root)?;

    if options.clear {
        engine.clear_dir(remote_root)?;
    } else {
        tracing::info!(remote = %remote_root, "skipping clear; existing remote files are kept");
    }

    engine.upload_tree(local_root, remote_root, filter)?;

    if options.prune {
        engine.prune_empty(remote_root)?;
    }

    let mut report = engine.into_report();
    report.duration_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        dirs_created = report.dirs_created,
        files_uploaded = report.files_uploaded,
        bytes_uploaded = report.bytes_uploaded,
        files_skipped = report.files_skipped,
        entries_removed = report.entries_removed,
        dirs_pruned = report.dirs_pruned,
        warnings = report.warnings.len(),
        duration_ms = report.duration_ms,
        "mirror completed"
    );

    Ok(report)
}
