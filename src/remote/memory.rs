//! In-process remote tree.
//!
//! [`MemoryRemote`] honours the same remote-side contracts as an SFTP server
//! (mkdir needs a parent, rmdir refuses non-empty directories, uploads need an
//! existing parent directory) and lets tests inject per-entry failures or a
//! dropped connection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Write};
use std::path::Path;

use parking_lot::{Mutex, MutexGuard};

use super::{
    RemoteEntry, RemoteError, RemoteFs, RemotePath, RemoteStat, S_IFDIR, S_IFREG, copy_to_remote,
    staging_path,
};

/// Operation selector for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Stat,
    Mkdir,
    Rmdir,
    Remove,
    List,
    Upload,
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<RemotePath, Node>,
    faults: HashSet<(RemoteOp, RemotePath)>,
    /// Entries whose mode is omitted from their parent's listing.
    modeless: HashSet<RemotePath>,
    /// Uploads that stop accepting bytes after the given count.
    write_limits: HashMap<RemotePath, usize>,
    /// Remaining calls before the connection drops.
    calls_until_drop: Option<usize>,
    disconnected: bool,
}

/// Remote tree held in memory.
#[derive(Debug)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Empty tree containing only `/` and the working directory `.`.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(RemotePath::root(), Node::Dir);
        nodes.insert(RemotePath::new("."), Node::Dir);
        Self {
            state: Mutex::new(State {
                nodes,
                ..Default::default()
            }),
        }
    }

    /// Create a directory and its ancestors.
    pub fn with_dir(self, path: &str) -> Self {
        {
            let mut state = self.state.lock();
            for prefix in RemotePath::new(path).prefixes() {
                state.nodes.entry(prefix).or_insert(Node::Dir);
            }
        }
        self
    }

    /// Create a file, creating its ancestors.
    pub fn with_file(self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        let path = RemotePath::new(path);
        let this = match path.parent() {
            Some(parent) => self.with_dir(parent.as_str()),
            None => self,
        };
        this.state
            .lock()
            .nodes
            .insert(path, Node::File(contents.into()));
        this
    }

    /// Make every `op` on `path` fail with a permission error.
    pub fn fail(&self, op: RemoteOp, path: &str) {
        self.state
            .lock()
            .faults
            .insert((op, RemotePath::new(path)));
    }

    /// Let uploads to `path` accept `bytes` bytes and then fail mid-write.
    pub fn fail_upload_after(&self, path: &str, bytes: usize) {
        self.state
            .lock()
            .write_limits
            .insert(RemotePath::new(path), bytes);
    }

    /// List `path` without mode bits, forcing callers to stat it.
    pub fn omit_mode(&self, path: &str) {
        self.state.lock().modeless.insert(RemotePath::new(path));
    }

    /// Drop the connection after `calls` more successful calls.
    pub fn drop_connection_after(&self, calls: usize) {
        self.state.lock().calls_until_drop = Some(calls);
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(&RemotePath::new(path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        matches!(
            self.state.lock().nodes.get(&RemotePath::new(path)),
            Some(Node::Dir)
        )
    }

    /// Contents of a file, if `path` is one.
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.lock().nodes.get(&RemotePath::new(path)) {
            Some(Node::File(contents)) => Some(contents.clone()),
            _ => None,
        }
    }

    /// Sorted child names of a directory.
    pub fn children(&self, path: &str) -> Vec<String> {
        let state = self.state.lock();
        child_paths(&state, &RemotePath::new(path))
            .into_iter()
            .filter_map(|child| child.file_name().map(str::to_string))
            .collect()
    }

    /// Every file path in the tree, sorted.
    pub fn files(&self) -> Vec<String> {
        self.state
            .lock()
            .nodes
            .iter()
            .filter(|(_, node)| matches!(node, Node::File(_)))
            .map(|(path, _)| path.to_string())
            .collect()
    }

    /// Connection and fault checks shared by every call.
    fn begin(&self, op: RemoteOp, path: &RemotePath) -> Result<MutexGuard<'_, State>, RemoteError> {
        let mut state = self.state.lock();
        if state.disconnected {
            return Err(RemoteError::ConnectionLost("session closed".into()));
        }
        if let Some(remaining) = state.calls_until_drop {
            if remaining == 0 {
                state.disconnected = true;
                return Err(RemoteError::ConnectionLost("connection reset by peer".into()));
            }
            state.calls_until_drop = Some(remaining - 1);
        }
        if state.faults.contains(&(op, path.clone())) {
            return Err(RemoteError::PermissionDenied(path.clone()));
        }
        Ok(state)
    }
}

fn child_paths(state: &State, dir: &RemotePath) -> Vec<RemotePath> {
    state
        .nodes
        .keys()
        .filter(|candidate| !candidate.is_root() && candidate.parent().as_ref() == Some(dir))
        .cloned()
        .collect()
}

fn mode_of(node: &Node) -> u32 {
    match node {
        Node::Dir => S_IFDIR | 0o755,
        Node::File(_) => S_IFREG | 0o644,
    }
}

/// Remote file handle that refuses writes past `limit`.
struct StagedWrite {
    contents: Vec<u8>,
    limit: Option<usize>,
}

impl Write for StagedWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = match self.limit {
            Some(limit) => limit.saturating_sub(self.contents.len()),
            None => buf.len(),
        };
        if room == 0 && !buf.is_empty() {
            return Err(io::Error::other("write failed: no space left on device"));
        }
        let n = room.min(buf.len());
        self.contents.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn require_parent_dir(state: &State, path: &RemotePath) -> Result<(), RemoteError> {
    let parent = path.parent().unwrap_or_else(RemotePath::root);
    match state.nodes.get(&parent) {
        Some(Node::Dir) => Ok(()),
        Some(Node::File(_)) => Err(RemoteError::failure(&parent, "not a directory")),
        None => Err(RemoteError::NotFound(parent)),
    }
}

impl RemoteFs for MemoryRemote {
    fn stat(&self, path: &RemotePath) -> Result<RemoteStat, RemoteError> {
        let state = self.begin(RemoteOp::Stat, path)?;
        match state.nodes.get(path) {
            Some(node) => Ok(RemoteStat {
                mode: Some(mode_of(node)),
                size: match node {
                    Node::Dir => None,
                    Node::File(contents) => Some(contents.len() as u64),
                },
            }),
            None => Err(RemoteError::NotFound(path.clone())),
        }
    }

    fn mkdir(&self, path: &RemotePath) -> Result<(), RemoteError> {
        let mut state = self.begin(RemoteOp::Mkdir, path)?;
        if state.nodes.contains_key(path) {
            return Err(RemoteError::failure(path, "file exists"));
        }
        require_parent_dir(&state, path)?;
        state.nodes.insert(path.clone(), Node::Dir);
        Ok(())
    }

    fn rmdir(&self, path: &RemotePath) -> Result<(), RemoteError> {
        let mut state = self.begin(RemoteOp::Rmdir, path)?;
        match state.nodes.get(path) {
            None => return Err(RemoteError::NotFound(path.clone())),
            Some(Node::File(_)) => return Err(RemoteError::failure(path, "not a directory")),
            Some(Node::Dir) => {}
        }
        if path.is_root() {
            return Err(RemoteError::PermissionDenied(path.clone()));
        }
        if !child_paths(&state, path).is_empty() {
            return Err(RemoteError::failure(path, "directory not empty"));
        }
        state.nodes.remove(path);
        Ok(())
    }

    fn remove(&self, path: &RemotePath) -> Result<(), RemoteError> {
        let mut state = self.begin(RemoteOp::Remove, path)?;
        match state.nodes.get(path) {
            None => Err(RemoteError::NotFound(path.clone())),
            Some(Node::Dir) => Err(RemoteError::failure(path, "is a directory")),
            Some(Node::File(_)) => {
                state.nodes.remove(path);
                Ok(())
            }
        }
    }

    fn list_entries(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteError> {
        let state = self.begin(RemoteOp::List, path)?;
        match state.nodes.get(path) {
            None => return Err(RemoteError::NotFound(path.clone())),
            Some(Node::File(_)) => return Err(RemoteError::failure(path, "not a directory")),
            Some(Node::Dir) => {}
        }
        Ok(child_paths(&state, path)
            .into_iter()
            .filter_map(|child| {
                let node = state.nodes.get(&child)?;
                Some(RemoteEntry {
                    name: child.file_name()?.to_string(),
                    mode: (!state.modeless.contains(&child)).then(|| mode_of(node)),
                })
            })
            .collect())
    }

    fn upload(&self, local: &Path, remote: &RemotePath) -> Result<u64, RemoteError> {
        let mut state = self.begin(RemoteOp::Upload, remote)?;
        require_parent_dir(&state, remote)?;
        if let Some(Node::Dir) = state.nodes.get(remote) {
            return Err(RemoteError::failure(remote, "is a directory"));
        }
        let mut source = std::fs::File::open(local).map_err(|source| RemoteError::Local {
            path: local.to_path_buf(),
            source,
        })?;

        let staging = staging_path(remote);
        let mut target = StagedWrite {
            contents: Vec::new(),
            limit: state.write_limits.get(remote).copied(),
        };
        let copied = copy_to_remote(&mut source, &mut target, local, remote);
        state
            .nodes
            .insert(staging.clone(), Node::File(target.contents));

        match copied {
            Ok(written) => {
                if let Some(node) = state.nodes.remove(&staging) {
                    state.nodes.insert(remote.clone(), node);
                }
                Ok(written)
            }
            Err(e) => {
                state.nodes.remove(&staging);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkdir_requires_parent() {
        let fs = MemoryRemote::new();
        let err = fs.mkdir(&RemotePath::new("/a/b")).unwrap_err();
        assert!(err.is_not_found());
        fs.mkdir(&RemotePath::new("/a")).unwrap();
        fs.mkdir(&RemotePath::new("/a/b")).unwrap();
        assert!(fs.is_dir("/a/b"));
    }

    #[test]
    fn test_rmdir_refuses_non_empty() {
        let fs = MemoryRemote::new().with_file("/a/b.txt", "x");
        let err = fs.rmdir(&RemotePath::new("/a")).unwrap_err();
        assert!(matches!(err, RemoteError::Failure { .. }));
        fs.remove(&RemotePath::new("/a/b.txt")).unwrap();
        fs.rmdir(&RemotePath::new("/a")).unwrap();
        assert!(!fs.exists("/a"));
    }

    #[test]
    fn test_list_entries_reports_modes() {
        let fs = MemoryRemote::new().with_dir("/a/sub").with_file("/a/f.txt", "x");
        fs.omit_mode("/a/f.txt");
        let entries = fs.list_entries(&RemotePath::new("/a")).unwrap();
        assert_eq!(entries.len(), 2);
        let file = entries.iter().find(|e| e.name == "f.txt").unwrap();
        assert_eq!(file.mode, None);
        let dir = entries.iter().find(|e| e.name == "sub").unwrap();
        assert_eq!(dir.mode, Some(S_IFDIR | 0o755));
    }

    #[test]
    fn test_fault_injection() {
        let fs = MemoryRemote::new().with_file("/a.txt", "x");
        fs.fail(RemoteOp::Remove, "/a.txt");
        let err = fs.remove(&RemotePath::new("/a.txt")).unwrap_err();
        assert!(matches!(err, RemoteError::PermissionDenied(_)));
        assert!(fs.exists("/a.txt"));
    }

    #[test]
    fn test_connection_drop_is_sticky() {
        let fs = MemoryRemote::new();
        fs.drop_connection_after(1);
        fs.stat(&RemotePath::root()).unwrap();
        assert!(fs.stat(&RemotePath::root()).unwrap_err().is_connection_lost());
        assert!(fs.stat(&RemotePath::root()).unwrap_err().is_connection_lost());
    }

    #[test]
    fn test_upload_needs_parent_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("index.html");
        std::fs::write(&local, "<html>").unwrap();

        let fs = MemoryRemote::new();
        let err = fs.upload(&local, &RemotePath::new("/site/index.html")).unwrap_err();
        assert!(err.is_not_found());

        fs.mkdir(&RemotePath::new("/site")).unwrap();
        let written = fs.upload(&local, &RemotePath::new("/site/index.html")).unwrap();
        assert_eq!(written, 6);
        assert_eq!(fs.read("/site/index.html").unwrap(), b"<html>");
    }

    #[test]
    fn test_interrupted_upload_keeps_previous_contents() {
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("index.html");
        std::fs::write(&local, "<html><body>new</body></html>").unwrap();

        let fs = MemoryRemote::new().with_file("/site/index.html", "old");
        fs.fail_upload_after("/site/index.html", 8);

        let err = fs.upload(&local, &RemotePath::new("/site/index.html")).unwrap_err();
        assert!(!err.is_connection_lost());
        assert!(matches!(err, RemoteError::Failure { .. }));
        assert_eq!(fs.read("/site/index.html").unwrap(), b"old");
        assert_eq!(fs.children("/site"), vec!["index.html"]);
    }

    #[test]
    fn test_interrupted_upload_of_new_file_leaves_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("logo.svg");
        std::fs::write(&local, "<svg></svg>").unwrap();

        let fs = MemoryRemote::new().with_dir("/site");
        fs.fail_upload_after("/site/logo.svg", 0);

        fs.upload(&local, &RemotePath::new("/site/logo.svg")).unwrap_err();
        assert!(fs.children("/site").is_empty());
    }

    #[test]
    fn test_upload_replaces_existing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("index.html");
        std::fs::write(&local, "new").unwrap();

        let fs = MemoryRemote::new().with_file("/site/index.html", "old contents");
        fs.upload(&local, &RemotePath::new("/site/index.html")).unwrap();
        assert_eq!(fs.read("/site/index.html").unwrap(), b"new");
        assert_eq!(fs.files(), vec!["/site/index.html"]);
    }
}
