//! Local tree enumeration for the uploader.
//!
//! The walk is pre-order and sorted by name, so every directory is listed
//! before anything beneath it. Skip-listed directories are cut from descent
//! before their contents are read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::mirror::{FilterConfig, MirrorError};

/// One visited local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDir {
    /// Absolute or caller-relative path on disk.
    pub path: PathBuf,
    /// Path segments relative to the walk root; empty for the root.
    pub rel: Vec<String>,
    /// Indices into [`LocalTree::dirs`] of the child directories that will be
    /// visited (skip-listed ones removed), sorted by name.
    pub subdirs: Vec<usize>,
    /// Regular files directly inside, before extension filtering.
    pub files: Vec<String>,
}

impl LocalDir {
    /// Last path segment; empty for the walk root.
    pub fn name(&self) -> &str {
        self.rel.last().map_or("", String::as_str)
    }
}

/// Result of walking a local root.
#[derive(Debug, Default)]
pub struct LocalTree {
    /// Directories in pre-order; the root comes first.
    pub dirs: Vec<LocalDir>,
    /// Entries that could not be read or represented.
    pub warnings: Vec<String>,
}

impl LocalTree {
    pub fn root(&self) -> Option<&LocalDir> {
        self.dirs.first()
    }

    /// Child directories of `dir`, in walk order.
    pub fn subdirs<'a>(&'a self, dir: &'a LocalDir) -> impl Iterator<Item = &'a LocalDir> + 'a {
        dir.subdirs.iter().filter_map(|&i| self.dirs.get(i))
    }

    pub fn file_count(&self) -> usize {
        self.dirs.iter().map(|d| d.files.len()).sum()
    }
}

/// Fail unless `root` exists and is a directory (symlinks followed).
pub fn check_root(root: &Path) -> Result<(), MirrorError> {
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(()),
        _ => Err(MirrorError::LocalRootNotDirectory(root.to_path_buf())),
    }
}

/// Walk `root`, honouring the filter's skip-listed directory names.
pub fn scan_tree(root: &Path, filter: &FilterConfig) -> Result<LocalTree, MirrorError> {
    check_root(root)?;

    let mut tree = LocalTree::default();
    let mut index: HashMap<PathBuf, usize> = HashMap::new();

    let mut walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry, filter));

    while let Some(next) = walker.next() {
        let entry = match next {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                warn(&mut tree, format!("could not read local entry {path}: {err}"));
                continue;
            }
        };

        if entry.depth() == 0 {
            index.insert(entry.path().to_path_buf(), tree.dirs.len());
            tree.dirs.push(LocalDir {
                path: entry.path().to_path_buf(),
                rel: Vec::new(),
                subdirs: Vec::new(),
                files: Vec::new(),
            });
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn(
                &mut tree,
                format!("skipping non-UTF-8 local name {}", entry.path().display()),
            );
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        };

        let Some(&parent) = entry.path().parent().and_then(|p| index.get(p)) else {
            continue;
        };

        match local_kind(&entry) {
            Ok(LocalKind::Dir) => {
                let mut rel = tree.dirs[parent].rel.clone();
                rel.push(name);
                let child = tree.dirs.len();
                tree.dirs[parent].subdirs.push(child);
                index.insert(entry.path().to_path_buf(), child);
                tree.dirs.push(LocalDir {
                    path: entry.path().to_path_buf(),
                    rel,
                    subdirs: Vec::new(),
                    files: Vec::new(),
                });
            }
            Ok(LocalKind::File) => tree.dirs[parent].files.push(name),
            Ok(LocalKind::Other) => {
                tracing::debug!(path = %entry.path().display(), "not a regular file or directory, skipping");
            }
            Err(err) => warn(
                &mut tree,
                format!("could not stat local entry {}: {err}", entry.path().display()),
            ),
        }
    }

    tracing::debug!(
        root = %root.display(),
        dirs = tree.dirs.len(),
        files = tree.file_count(),
        "scanned local tree"
    );

    Ok(tree)
}

enum LocalKind {
    Dir,
    File,
    Other,
}

/// Directories are only real directories; symlinks count as files when they
/// resolve to one and are otherwise left alone.
fn local_kind(entry: &DirEntry) -> std::io::Result<LocalKind> {
    let file_type = entry.file_type();
    if file_type.is_dir() {
        return Ok(LocalKind::Dir);
    }
    if file_type.is_file() {
        return Ok(LocalKind::File);
    }
    if file_type.is_symlink() {
        let target = std::fs::metadata(entry.path())?;
        return Ok(if target.is_file() {
            LocalKind::File
        } else {
            LocalKind::Other
        });
    }
    Ok(LocalKind::Other)
}

fn is_skipped_dir(entry: &DirEntry, filter: &FilterConfig) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| filter.skips_dir(name))
}

fn warn(tree: &mut LocalTree, message: String) {
    tracing::warn!("{message}");
    tree.warnings.push(message);
}
