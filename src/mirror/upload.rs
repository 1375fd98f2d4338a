//! Filtered tree uploader.

use std::path::Path;

use crate::local::{self, LocalDir, LocalTree};
use crate::remote::{RemoteFs, RemotePath};

use super::{FilterConfig, MirrorEngine, MirrorError, triage};

impl<F: RemoteFs + ?Sized> MirrorEngine<'_, F> {
    /// Recreate the local directory skeleton under `remote_root` and upload
    /// every file that passes `filter`.
    ///
    /// Every visited directory is ensured before any file beneath it is
    /// uploaded, including directories that end up with no uploadable files.
    /// Fails only if `local_root` is not a directory or the connection drops;
    /// individual upload failures become warnings.
    pub fn upload_tree(
        &mut self,
        local_root: &Path,
        remote_root: &RemotePath,
        filter: &FilterConfig,
    ) -> Result<(), MirrorError> {
        let tree = local::scan_tree(local_root, filter)?;
        self.report.warnings.extend(tree.warnings.iter().cloned());

        if let Some(root) = tree.root() {
            self.upload_dir(&tree, root, remote_root.clone(), filter)?;
        }
        Ok(())
    }

    /// Ensure `remote_dir`, upload the files of `dir`, then recurse into its
    /// subdirectories in name order.
    fn upload_dir(
        &mut self,
        tree: &LocalTree,
        dir: &LocalDir,
        remote_dir: RemotePath,
        filter: &FilterConfig,
    ) -> Result<(), MirrorError> {
        self.ensure_dir(&remote_dir)?;

        for name in &dir.files {
            if !filter.allows_file(name) {
                tracing::trace!(file = %name, "extension not in allowlist");
                self.report.files_skipped += 1;
                continue;
            }

            let local_file = dir.path.join(name);
            let remote_file = remote_dir.join(name);
            tracing::info!(
                local = %local_file.display(),
                remote = %remote_file,
                "uploading"
            );

            match self.fs.upload(&local_file, &remote_file) {
                Ok(bytes) => {
                    self.report.files_uploaded += 1;
                    self.report.bytes_uploaded += bytes;
                }
                Err(e) => {
                    let e = triage(e)?;
                    self.warn(format!(
                        "error uploading {}: {e}",
                        local_file.display()
                    ));
                }
            }
        }

        for child in tree.subdirs(dir) {
            self.upload_dir(tree, child, remote_dir.join(child.name()), filter)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::TempDir;

    use crate::mirror::{FilterConfig, MirrorEngine, MirrorError};
    use crate::remote::{MemoryRemote, RemoteOp, RemotePath};

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn site() -> TempDir {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "index.html", "<html>");
        write(tmp.path(), "img/logo.svg", "<svg/>");
        write(tmp.path(), "notes.txt", "todo");
        tmp
    }

    #[test]
    fn test_uploads_filtered_files() {
        let tmp = site();
        let fs = MemoryRemote::new();
        let filter = FilterConfig::new(Some(["html", "svg"]), None::<Vec<String>>);
        let mut engine = MirrorEngine::new(&fs);

        engine
            .upload_tree(tmp.path(), &RemotePath::new("/www"), &filter)
            .unwrap();

        assert_eq!(fs.read("/www/index.html").unwrap(), b"<html>");
        assert_eq!(fs.read("/www/img/logo.svg").unwrap(), b"<svg/>");
        assert!(!fs.exists("/www/notes.txt"));

        let report = engine.report();
        assert_eq!(report.files_uploaded, 2);
        assert_eq!(report.bytes_uploaded, 12);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.dirs_created, 2);
        assert!(report.is_clean());
    }

    #[test]
    fn test_empty_local_dirs_are_created() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b/c")).unwrap();
        let fs = MemoryRemote::new().with_dir("/www");
        let mut engine = MirrorEngine::new(&fs);

        engine
            .upload_tree(tmp.path(), &RemotePath::new("/www"), &FilterConfig::allow_all())
            .unwrap();

        assert!(fs.is_dir("/www/a/b/c"));
        assert_eq!(engine.report().dirs_created, 3);
    }

    #[test]
    fn test_skip_dirs_contribute_nothing() {
        let tmp = site();
        write(tmp.path(), ".git/hooks/pre.html", "x");
        write(tmp.path(), "tools/build.html", "x");
        let fs = MemoryRemote::new();
        let filter = FilterConfig::new(Some(["html"]), Some([".git", "TOOLS"]));
        let mut engine = MirrorEngine::new(&fs);

        engine
            .upload_tree(tmp.path(), &RemotePath::new("/www"), &filter)
            .unwrap();

        assert!(!fs.exists("/www/.git"));
        assert!(!fs.exists("/www/tools"));
        assert_eq!(fs.files(), vec!["/www/index.html"]);
    }

    #[test]
    fn test_upload_failure_is_warning() {
        let tmp = site();
        let fs = MemoryRemote::new();
        fs.fail(RemoteOp::Upload, "/www/index.html");
        let mut engine = MirrorEngine::new(&fs);

        engine
            .upload_tree(tmp.path(), &RemotePath::new("/www"), &FilterConfig::allow_all())
            .unwrap();

        assert!(!fs.exists("/www/index.html"));
        assert!(fs.exists("/www/notes.txt"));
        assert!(fs.exists("/www/img/logo.svg"));
        assert_eq!(engine.report().files_uploaded, 2);
        assert_eq!(engine.report().warnings.len(), 1);
        assert!(engine.report().warnings[0].starts_with("error uploading"));
    }

    #[test]
    fn test_missing_remote_dir_fails_uploads_beneath_it() {
        let tmp = site();
        let fs = MemoryRemote::new();
        fs.fail(RemoteOp::Mkdir, "/www/img");
        let mut engine = MirrorEngine::new(&fs);

        engine
            .upload_tree(tmp.path(), &RemotePath::new("/www"), &FilterConfig::allow_all())
            .unwrap();

        let warnings = &engine.report().warnings;
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("could not create remote dir /www/img"));
        assert!(warnings[1].contains("logo.svg"));
        assert_eq!(engine.report().files_uploaded, 2);
    }

    #[test]
    fn test_local_root_must_be_directory() {
        let tmp = site();
        let fs = MemoryRemote::new();
        let mut engine = MirrorEngine::new(&fs);

        let err = engine
            .upload_tree(
                &tmp.path().join("index.html"),
                &RemotePath::new("/www"),
                &FilterConfig::allow_all(),
            )
            .unwrap_err();
        assert!(matches!(err, MirrorError::LocalRootNotDirectory(_)));
        assert!(!fs.exists("/www"));
    }
}
