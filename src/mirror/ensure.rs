//! Directory ensurer: create a remote directory and its missing ancestors.

use crate::remote::{RemoteFs, RemotePath};

use super::{MirrorEngine, MirrorError, triage};

impl<F: RemoteFs + ?Sized> MirrorEngine<'_, F> {
    /// Make sure `dir` exists, creating each missing prefix from the top down.
    ///
    /// Best-effort: a prefix that cannot be created is reported as a warning
    /// and the remaining prefixes are still attempted, so the failure surfaces
    /// again at the first upload beneath it. Calling this twice is a no-op the
    /// second time.
    pub fn ensure_dir(&mut self, dir: &RemotePath) -> Result<(), MirrorError> {
        for prefix in dir.prefixes() {
            if self.known_dirs.contains(&prefix) {
                continue;
            }

            match self.fs.stat(&prefix) {
                Ok(_) => {
                    self.known_dirs.insert(prefix);
                    continue;
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    let e = triage(e)?;
                    self.warn(format!("could not stat remote dir {prefix}: {e}"));
                    continue;
                }
            }

            match self.fs.mkdir(&prefix) {
                Ok(()) => {
                    tracing::debug!(remote = %prefix, "created remote dir");
                    self.report.dirs_created += 1;
                    self.known_dirs.insert(prefix);
                }
                Err(e) => {
                    let e = triage(e)?;
                    self.warn(format!("could not create remote dir {prefix}: {e}"));
                }
            }
        }
        Ok(())
    }
}
