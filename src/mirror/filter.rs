//! Which local files get uploaded and which local directories get walked.

use std::collections::HashSet;

use serde::Serialize;

/// Upload filter applied during the local walk.
///
/// `None` for either set means "no restriction". Skipped directory names
/// only affect the local walk; remote clearing and pruning ignore them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterConfig {
    /// Lower-cased extensions with a leading `.` (e.g. `.html`).
    pub extension_allowlist: Option<HashSet<String>>,
    /// Lower-cased directory base names never descended into.
    pub skip_dir_names: Option<HashSet<String>>,
}

impl FilterConfig {
    /// Build a filter from raw lists.
    ///
    /// Extensions may be given with or without the leading dot and in any
    /// case. Blank entries are ignored; a list with nothing left in it means
    /// no restriction.
    pub fn new<E, S>(extensions: Option<E>, skip_dirs: Option<S>) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        S: IntoIterator,
        S::Item: AsRef<str>,
    {
        // An allowlist holding only blanks counts as no allowlist, so every
        // file is uploaded rather than none.
        let extension_allowlist = extensions.and_then(|list| {
            non_empty(
                list.into_iter()
                    .filter_map(|ext| normalize_extension(ext.as_ref()))
                    .collect(),
            )
        });
        let skip_dir_names = skip_dirs.and_then(|list| {
            non_empty(
                list.into_iter()
                    .map(|name| name.as_ref().trim().to_lowercase())
                    .filter(|name| !name.is_empty())
                    .collect(),
            )
        });

        Self {
            extension_allowlist,
            skip_dir_names,
        }
    }

    /// Upload everything, walk everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Whether a file with this base name passes the allowlist.
    pub fn allows_file(&self, name: &str) -> bool {
        match &self.extension_allowlist {
            None => true,
            Some(allowed) => allowed.contains(&file_extension(name)),
        }
    }

    /// Whether the walk must not descend into a directory with this base name.
    pub fn skips_dir(&self, name: &str) -> bool {
        self.skip_dir_names
            .as_ref()
            .is_some_and(|skip| skip.contains(&name.to_lowercase()))
    }
}

fn non_empty(set: HashSet<String>) -> Option<HashSet<String>> {
    (!set.is_empty()).then_some(set)
}

fn normalize_extension(raw: &str) -> Option<String> {
    let ext = raw.trim().to_lowercase();
    if ext.is_empty() {
        None
    } else if ext.starts_with('.') {
        Some(ext)
    } else {
        Some(format!(".{ext}"))
    }
}

/// Lower-cased extension of a base name including its leading `.`, or an
/// empty string when there is none.
///
/// Leading dots do not start an extension: `.bashrc` has none, while
/// `archive.tar.gz` has `.gz` and `notes.` has `.`.
pub fn file_extension(name: &str) -> String {
    let stem_start = name.len() - name.trim_start_matches('.').len();
    match name[stem_start..].rfind('.') {
        Some(dot) => name[stem_start + dot..].to_lowercase(),
        None => String::new(),
    }
}
