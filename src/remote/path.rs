//! Normalized slash-delimited paths on the remote side.
//!
//! Every [`RemotePath`] is stored in canonical form, so equality, hashing and
//! ordering never see two spellings of the same location:
//!
//! ```rust,ignore
//! use remote_mirror::remote::RemotePath;
//!
//! assert_eq!(RemotePath::new("/var//www/./site/"), RemotePath::new("/var/www/site"));
//! assert_eq!(RemotePath::new("/var/www").join("site").as_str(), "/var/www/site");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Working directory of the remote session (empty relative path).
const CURRENT_DIR: &str = ".";

/// A normalized remote location.
///
/// Absolute paths start with `/`; the absolute root is `/`. Relative paths
/// resolve against the remote session's working directory, which itself is
/// spelled `.`. No value ever contains an empty segment, a `.` segment, or a
/// trailing slash (except the root `/`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    /// Parse and normalize a raw remote path.
    ///
    /// `..` is resolved lexically. For absolute paths it never climbs above
    /// `/`; for relative paths leading `..` segments are kept.
    pub fn new(raw: &str) -> Self {
        let absolute = raw.starts_with('/');
        let mut segments: Vec<&str> = Vec::new();

        for segment in raw.split('/') {
            match segment {
                "" | "." => {}
                ".." => match segments.last() {
                    Some(&last) if last != ".." => {
                        segments.pop();
                    }
                    _ if absolute => {}
                    _ => segments.push(".."),
                },
                other => segments.push(other),
            }
        }

        Self::from_parts(absolute, &segments)
    }

    /// The absolute root `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    fn from_parts(absolute: bool, segments: &[&str]) -> Self {
        let joined = segments.join("/");
        if absolute {
            Self(format!("/{joined}"))
        } else if joined.is_empty() {
            Self(CURRENT_DIR.to_string())
        } else {
            Self(joined)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_absolute(&self) -> bool {
        self.0.starts_with('/')
    }

    /// True for `/` and for the session working directory `.`.
    pub fn is_root(&self) -> bool {
        self.0 == "/" || self.0 == CURRENT_DIR
    }

    /// Path segments from the top down. Empty for a root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != CURRENT_DIR)
    }

    /// Last segment, or `None` for a root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Append `name` (which may itself contain slashes) and normalize.
    pub fn join(&self, name: &str) -> Self {
        Self::new(&format!("{}/{}", self.0, name))
    }

    /// Parent location, or `None` for a root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let segments: Vec<&str> = self.segments().collect();
        Some(Self::from_parts(
            self.is_absolute(),
            &segments[..segments.len() - 1],
        ))
    }

    /// Cumulative prefixes from the top down, ending with `self`.
    ///
    /// The root itself is not included since it always exists.
    /// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
    pub fn prefixes(&self) -> Vec<Self> {
        let absolute = self.is_absolute();
        let segments: Vec<&str> = self.segments().collect();
        (1..=segments.len())
            .map(|end| Self::from_parts(absolute, &segments[..end]))
            .collect()
    }
}

impl Default for RemotePath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RemotePath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for RemotePath {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl AsRef<str> for RemotePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for RemotePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RemotePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(&raw))
    }
}
