//! Command-line surface of `rmirror`.

use std::path::PathBuf;

use clap::Parser;

/// Mirror a local directory onto a remote directory over SFTP.
///
/// The remote directory is cleared first, then every local file that passes
/// the extension filter is uploaded, then remote directories left empty are
/// removed.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "rmirror", version, about, long_about = None)]
pub struct Cli {
    /// TOML config file (defaults to the user config dir)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// SFTP host
    #[arg(long)]
    pub host: Option<String>,

    /// SSH port (default 22)
    #[arg(long)]
    pub port: Option<u16>,

    /// SSH username
    #[arg(long)]
    pub user: Option<String>,

    /// Password (omit to use a key, the agent, or a prompt)
    #[arg(long, env = "RMIRROR_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Private key file for key-based auth
    #[arg(long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Passphrase for the private key
    #[arg(long, env = "RMIRROR_KEY_PASSPHRASE", hide_env_values = true)]
    pub key_passphrase: Option<String>,

    /// Local directory to upload (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub local: Option<PathBuf>,

    /// Remote target directory (posix style)
    #[arg(long, value_name = "DIR")]
    pub remote: Option<String>,

    /// Accept host keys that are not in known_hosts (less secure)
    #[arg(long)]
    pub allow_missing_host_key: bool,

    /// Only upload files with these extensions (repeatable or comma-separated)
    #[arg(long = "ext", value_name = "EXT", value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Directory names never descended into (repeatable or comma-separated)
    #[arg(long = "skip-dir", value_name = "NAME", value_delimiter = ',')]
    pub skip_dirs: Vec<String>,

    /// Upload every file, ignoring any configured extension allowlist
    #[arg(long, conflicts_with = "extensions")]
    pub all_files: bool,

    /// Keep existing remote files instead of clearing the target first
    #[arg(long)]
    pub no_clear: bool,

    /// Keep remote directories that end up empty
    #[arg(long)]
    pub no_prune: bool,

    /// Connection timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_comma_separated_lists() {
        let cli = Cli::try_parse_from([
            "rmirror",
            "--ext",
            "html,css",
            "--ext",
            "js",
            "--skip-dir",
            ".git,tools",
        ])
        .unwrap();
        assert_eq!(cli.extensions, vec!["html", "css", "js"]);
        assert_eq!(cli.skip_dirs, vec![".git", "tools"]);
    }

    #[test]
    fn test_all_files_conflicts_with_ext() {
        let err = Cli::try_parse_from(["rmirror", "--ext", "html", "--all-files"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
