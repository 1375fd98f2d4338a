//! Subtree clearer: delete everything beneath a remote directory.

use crate::remote::{EntryKind, RemoteFs, RemotePath};

use super::{MirrorEngine, MirrorError, triage};

impl<F: RemoteFs + ?Sized> MirrorEngine<'_, F> {
    /// Recursively delete every descendant of `dir`. `dir` itself stays.
    ///
    /// A missing `dir` means there is nothing to clear. Entries that cannot be
    /// classified or removed are left in place with a warning; their siblings
    /// are still processed.
    pub fn clear_dir(&mut self, dir: &RemotePath) -> Result<(), MirrorError> {
        let entries = match self.fs.list_entries(dir) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => {
                tracing::debug!(remote = %dir, "nothing to clear");
                return Ok(());
            }
            Err(e) => {
                let e = triage(e)?;
                self.warn(format!("could not list remote dir {dir}: {e}"));
                return Ok(());
            }
        };

        for entry in entries {
            let path = dir.join(&entry.name);
            let Some(kind) = self.entry_kind(&path, &entry)? else {
                continue;
            };

            match kind {
                EntryKind::Directory => {
                    self.clear_dir(&path)?;
                    match self.fs.rmdir(&path) {
                        Ok(()) => {
                            tracing::debug!(remote = %path, "removed remote dir");
                            self.forget_dir(&path);
                            self.report.entries_removed += 1;
                        }
                        Err(e) => {
                            let e = triage(e)?;
                            self.warn(format!("could not remove remote dir {path}: {e}"));
                        }
                    }
                }
                EntryKind::File => match self.fs.remove(&path) {
                    Ok(()) => {
                        tracing::debug!(remote = %path, "removed remote file");
                        self.report.entries_removed += 1;
                    }
                    Err(e) => {
                        let e = triage(e)?;
                        self.warn(format!("could not remove remote file {path}: {e}"));
                    }
                },
            }
        }
        Ok(())
    }
}
