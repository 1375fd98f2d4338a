use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

fn base_cmd(tmp: &TempDir) -> Command {
    let config = tmp.path().join("empty.toml");
    fs::write(&config, "").unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("rmirror"));
    cmd.current_dir(tmp.path())
        .env_remove("RMIRROR_PASSWORD")
        .env_remove("RMIRROR_KEY_PASSPHRASE")
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(&config);
    cmd
}

#[test]
fn help_lists_mirror_flags() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("rmirror"));
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(contains("--allow-missing-host-key"))
        .stdout(contains("--skip-dir"))
        .stdout(contains("--no-clear"));
}

#[test]
fn missing_required_params_exit_2() {
    let tmp = TempDir::new().unwrap();
    let mut cmd = base_cmd(&tmp);
    cmd.assert()
        .failure()
        .code(2)
        .stderr(contains("Missing required parameters: --host, --user, --remote"));
}

#[test]
fn invalid_config_file_exit_2() {
    let tmp = TempDir::new().unwrap();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "port = \"not a number\"").unwrap();

    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("rmirror"));
    cmd.current_dir(tmp.path()).arg("--config").arg(&bad);
    cmd.assert()
        .failure()
        .code(2)
        .stderr(contains("Invalid config file"));
}

#[test]
fn local_root_not_directory_is_fatal_before_connecting() {
    let tmp = TempDir::new().unwrap();
    let mut cmd = base_cmd(&tmp);
    cmd.args([
        "--host",
        "sftp.invalid",
        "--user",
        "alice",
        "--remote",
        "/var/www/site",
        "--local",
        "does-not-exist",
    ]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("aborted: Local path is not a directory"))
        .stderr(contains("TCP connection").not());
}

#[test]
fn refused_connection_is_fatal() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir(tmp.path().join("site")).unwrap();

    let mut cmd = base_cmd(&tmp);
    cmd.args([
        "--host",
        "127.0.0.1",
        "--port",
        "1",
        "--user",
        "alice",
        "--password",
        "secret",
        "--remote",
        "/var/www/site",
        "--local",
        "site",
        "--connect-timeout",
        "2",
    ]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("error: connecting to alice@127.0.0.1:1"));
}
