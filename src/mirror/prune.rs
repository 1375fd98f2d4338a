//! Empty-subtree pruner.

use crate::remote::{EntryKind, RemoteFs, RemotePath};

use super::{MirrorEngine, MirrorError, triage};

impl<F: RemoteFs + ?Sized> MirrorEngine<'_, F> {
    /// Remove every descendant directory of `dir` that is empty once its own
    /// empty children are gone. Returns whether `dir` is empty afterwards.
    ///
    /// Children are pruned before their parent is judged, so a chain of
    /// directories holding nothing but each other collapses completely.
    /// `dir` itself is never removed. A `dir` that does not exist counts as
    /// empty.
    pub fn prune_empty(&mut self, dir: &RemotePath) -> Result<bool, MirrorError> {
        let entries = match self.fs.list_entries(dir) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(true),
            Err(e) => {
                let e = triage(e)?;
                self.warn(format!("could not list remote dir {dir}: {e}"));
                return Ok(false);
            }
        };

        let mut is_empty = true;
        for entry in entries {
            let path = dir.join(&entry.name);
            let kind = self.entry_kind(&path, &entry)?;

            if kind != Some(EntryKind::Directory) {
                is_empty = false;
                continue;
            }

            if !self.prune_empty(&path)? {
                is_empty = false;
                continue;
            }

            match self.fs.rmdir(&path) {
                Ok(()) => {
                    tracing::info!(remote = %path, "removed empty remote dir");
                    self.forget_dir(&path);
                    self.report.dirs_pruned += 1;
                }
                Err(e) => {
                    let e = triage(e)?;
                    self.warn(format!("could not remove remote dir {path}: {e}"));
                    is_empty = false;
                }
            }
        }
        Ok(is_empty)
    }
}
