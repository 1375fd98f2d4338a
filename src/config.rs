//! Run configuration.
//!
//! Settings come from three layers, highest priority first: command-line
//! flags, an optional TOML file, built-in defaults. The merged
//! [`MirrorConfig`] is built once at startup and passed by value into the
//! pipeline; nothing downstream reads global state.
//!
//! The config file lives at `~/.config/remote-mirror/config.toml` on Linux
//! (the platform config dir elsewhere) unless `--config` points somewhere
//! else:
//!
//! ```toml
//! host = "sftp.example.com"
//! port = 22
//! user = "alice"
//! key = "~/.ssh/id_ed25519"
//! local = "./dist"
//! remote = "/var/www/site"
//! extensions = ["html", "css", "js", "svg"]
//! skip_dirs = [".git", "tools"]
//! ```

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cli::Cli;
use crate::mirror::{FilterConfig, MirrorOptions};
use crate::remote::{Auth, ConnectionConfig, RemotePath};

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors loading or merging configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Missing required parameters: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Cannot determine current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("Password prompt failed: {0}")]
    Prompt(String),
}

/// Contents of the TOML config file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub key: Option<PathBuf>,
    pub key_passphrase: Option<String>,
    pub local: Option<PathBuf>,
    pub remote: Option<String>,
    pub allow_missing_host_key: Option<bool>,
    pub extensions: Option<Vec<String>>,
    pub skip_dirs: Option<Vec<String>>,
    pub connect_timeout_secs: Option<u64>,
    pub known_hosts: Option<PathBuf>,
    pub clear: Option<bool>,
    pub prune: Option<bool>,
}

impl FileConfig {
    /// Platform default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "remote-mirror")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Load an explicitly requested file (which must exist), or the default
    /// file if it happens to exist.
    pub fn discover(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path).map(Some);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "loading config file");
                Self::load(&path).map(Some)
            }
            _ => Ok(None),
        }
    }
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub connection: ConnectionConfig,
    pub local_root: PathBuf,
    pub remote_root: RemotePath,
    pub filter: FilterConfig,
    pub options: MirrorOptions,
}

impl MirrorConfig {
    /// Merge CLI flags over the file config over defaults.
    ///
    /// Reports every missing required value at once. When neither a key nor a
    /// password is configured the result authenticates with ssh-agent; see
    /// [`MirrorConfig::prompt_for_password`].
    pub fn resolve(cli: &Cli, file: Option<FileConfig>) -> Result<Self, ConfigError> {
        let file = file.unwrap_or_default();

        let host = cli.host.clone().or(file.host);
        let user = cli.user.clone().or(file.user);
        let remote = cli.remote.clone().or(file.remote);

        let mut missing = Vec::new();
        if host.as_deref().is_none_or(str::is_empty) {
            missing.push("--host");
        }
        if user.as_deref().is_none_or(str::is_empty) {
            missing.push("--user");
        }
        if remote.as_deref().is_none_or(str::is_empty) {
            missing.push("--remote");
        }
        let (Some(host), Some(user), Some(remote)) = (host, user, remote) else {
            return Err(ConfigError::Missing(missing));
        };
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let local_root = match cli.local.clone().or(file.local) {
            Some(path) => expand_tilde(&path),
            None => std::env::current_dir().map_err(ConfigError::CurrentDir)?,
        };

        let auth = match cli.key.clone().or(file.key) {
            Some(key) => Auth::KeyFile {
                path: expand_tilde(&key),
                passphrase: cli.key_passphrase.clone().or(file.key_passphrase),
            },
            None => match cli.password.clone().or(file.password) {
                Some(password) => Auth::Password(password),
                None => Auth::Agent,
            },
        };

        let extensions = if cli.all_files {
            None
        } else if !cli.extensions.is_empty() {
            Some(cli.extensions.clone())
        } else {
            file.extensions
        };
        let skip_dirs = if cli.skip_dirs.is_empty() {
            file.skip_dirs
        } else {
            Some(cli.skip_dirs.clone())
        };

        let timeout_secs = cli
            .connect_timeout
            .or(file.connect_timeout_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);

        Ok(Self {
            connection: ConnectionConfig {
                host,
                port: cli.port.or(file.port).unwrap_or(DEFAULT_PORT),
                user,
                auth,
                allow_missing_host_key: cli.allow_missing_host_key
                    || file.allow_missing_host_key.unwrap_or(false),
                connect_timeout: Duration::from_secs(timeout_secs),
                known_hosts: file.known_hosts.map(|path| expand_tilde(&path)),
            },
            local_root,
            remote_root: RemotePath::new(&remote),
            filter: FilterConfig::new(extensions, skip_dirs),
            options: MirrorOptions {
                clear: !cli.no_clear && file.clear.unwrap_or(true),
                prune: !cli.no_prune && file.prune.unwrap_or(true),
            },
        })
    }

    /// Ask for a password when nothing else was configured and stdin is a
    /// terminal. An empty answer keeps ssh-agent authentication.
    pub fn prompt_for_password(&mut self) -> Result<(), ConfigError> {
        if self.connection.auth != Auth::Agent || !std::io::stdin().is_terminal() {
            return Ok(());
        }

        let password = dialoguer::Password::new()
            .with_prompt(format!(
                "Password for {}@{} (empty for ssh-agent)",
                self.connection.user, self.connection.host
            ))
            .allow_empty_password(true)
            .interact()
            .map_err(|e| ConfigError::Prompt(e.to_string()))?;

        if !password.is_empty() {
            self.connection.auth = Auth::Password(password);
        }
        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}
