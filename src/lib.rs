pub mod cli;
pub mod config;
pub mod local;
pub mod mirror;
pub mod remote;

use std::io::Write;

use anyhow::{Context, Result};
use colored::Colorize;

use crate::cli::Cli;
use crate::config::{ConfigError, FileConfig, MirrorConfig};
use crate::mirror::{MirrorError, MirrorReport};
use crate::remote::SftpRemote;

/// Mirror completed without warnings.
pub const EXIT_OK: u8 = 0;
/// Aborted: bad local root, connection failure, connection dropped.
pub const EXIT_FATAL: u8 = 1;
/// Configuration or usage error; nothing was touched.
pub const EXIT_CONFIG: u8 = 2;
/// Mirror completed, but some entries failed.
pub const EXIT_WARNINGS: u8 = 4;

/// Resolve configuration, connect, and run the mirror pipeline.
///
/// The SFTP session lives for exactly the duration of the pipeline and is
/// closed when it goes out of scope, whichever way the pipeline ends.
pub fn run(cli: &Cli) -> Result<MirrorReport> {
    let file = FileConfig::discover(cli.config.as_deref())?;
    let mut config = MirrorConfig::resolve(cli, file)?;

    // Fail before prompting or connecting if the local side is unusable.
    local::check_root(&config.local_root)?;
    config.prompt_for_password()?;

    let remote = SftpRemote::connect(&config.connection).with_context(|| {
        format!(
            "connecting to {}@{}:{}",
            config.connection.user, config.connection.host, config.connection.port
        )
    })?;

    let report = mirror::mirror(
        &remote,
        &config.local_root,
        &config.remote_root,
        &config.filter,
        config.options,
    )
    .with_context(|| format!("mirroring to {}", config.remote_root))?;

    Ok(report)
}

/// Process exit code for a finished run.
pub fn exit_code(result: &Result<MirrorReport>) -> u8 {
    match result {
        Ok(report) if report.is_clean() => EXIT_OK,
        Ok(_) => EXIT_WARNINGS,
        Err(e) if e.downcast_ref::<ConfigError>().is_some() => EXIT_CONFIG,
        Err(_) => EXIT_FATAL,
    }
}

/// Print the outcome of a run to `out` (errors go to stderr) and return the
/// process exit code. Failing to write the report is itself fatal.
pub fn emit_report(result: &Result<MirrorReport>, json: bool, out: &mut impl Write) -> u8 {
    let written = match result {
        Ok(report) if json => serde_json::to_writer_pretty(&mut *out, report)
            .map_err(anyhow::Error::from)
            .and_then(|()| writeln!(out).map_err(anyhow::Error::from)),
        Ok(report) => writeln!(out, "{}", render_summary(report)).map_err(anyhow::Error::from),
        Err(e) if is_mirror_abort(e) => {
            eprintln!("aborted: {e:#}");
            Ok(())
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            Ok(())
        }
    };

    match written.and_then(|()| out.flush().map_err(anyhow::Error::from)) {
        Ok(()) => exit_code(result),
        Err(e) => {
            eprintln!("error: failed to write report: {e}");
            EXIT_FATAL
        }
    }
}

/// Human-readable summary of a report.
pub fn render_summary(report: &MirrorReport) -> String {
    let mut lines = Vec::new();

    let headline = if report.is_clean() {
        "Mirror complete".green().bold()
    } else {
        "Mirror complete with warnings".yellow().bold()
    };
    lines.push(format!("{headline} ({} ms)", report.duration_ms));
    lines.push(format!(
        "  uploaded {} files ({} bytes), skipped {} by filter",
        report.files_uploaded, report.bytes_uploaded, report.files_skipped
    ));
    lines.push(format!(
        "  created {} dirs, removed {} entries, pruned {} empty dirs",
        report.dirs_created, report.entries_removed, report.dirs_pruned
    ));
    for warning in &report.warnings {
        lines.push(format!("  {} {warning}", "warning:".yellow()));
    }

    lines.join("\n")
}

/// Whether a fatal error came from the mirror pipeline rather than setup.
pub fn is_mirror_abort(err: &anyhow::Error) -> bool {
    err.downcast_ref::<MirrorError>().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteError;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&Ok(MirrorReport::default())), EXIT_OK);

        let warned = MirrorReport {
            warnings: vec!["could not remove remote file /a".into()],
            ..Default::default()
        };
        assert_eq!(exit_code(&Ok(warned)), EXIT_WARNINGS);

        let config: Result<MirrorReport> = Err(ConfigError::Missing(vec!["--host"]).into());
        assert_eq!(exit_code(&config), EXIT_CONFIG);

        let fatal: Result<MirrorReport> = Err(anyhow::Error::new(MirrorError::ConnectionLost(
            RemoteError::ConnectionLost("eof".into()),
        ))
        .context("mirroring to /www"));
        assert_eq!(exit_code(&fatal), EXIT_FATAL);
        assert!(is_mirror_abort(fatal.as_ref().unwrap_err()));
    }

    #[test]
    fn test_render_summary() {
        colored::control::set_override(false);
        let report = MirrorReport {
            files_uploaded: 2,
            bytes_uploaded: 12,
            files_skipped: 1,
            dirs_created: 1,
            warnings: vec!["error uploading a.html: denied".into()],
            ..Default::default()
        };
        let text = render_summary(&report);
        assert!(text.starts_with("Mirror complete with warnings"));
        assert!(text.contains("uploaded 2 files (12 bytes), skipped 1 by filter"));
        assert!(text.contains("warning: error uploading a.html: denied"));
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_emit_report_json() {
        let report = MirrorReport {
            files_uploaded: 3,
            ..Default::default()
        };
        let mut out = Vec::new();
        assert_eq!(emit_report(&Ok(report), true, &mut out), EXIT_OK);
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["files_uploaded"], 3);
    }

    #[test]
    fn test_emit_report_write_failure_is_fatal() {
        let warned = MirrorReport {
            warnings: vec!["could not remove remote file /a".into()],
            ..Default::default()
        };
        let result = Ok(warned);
        assert_eq!(emit_report(&result, true, &mut ClosedPipe), EXIT_FATAL);
        assert_eq!(emit_report(&result, false, &mut ClosedPipe), EXIT_FATAL);
    }
}
