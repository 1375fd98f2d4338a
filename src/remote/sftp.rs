//! SFTP transport over an `ssh2` session.
//!
//! One TCP connection, one SSH session, one SFTP channel per mirror run. The
//! session is opened by [`SftpRemote::connect`] and closed when the value is
//! dropped, so release happens exactly once after every phase has finished
//! (or bailed out).

use std::fs::File;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, RenameFlags, Session, Sftp};
use thiserror::Error;

use super::{
    RemoteEntry, RemoteError, RemoteFs, RemotePath, RemoteStat, copy_to_remote, staging_path,
};

/// Mode for directories created on the remote.
const DIR_MODE: i32 = 0o755;

// SFTP status codes (draft-ietf-secsh-filexfer-02, section 7).
const FX_NO_SUCH_FILE: i32 = 2;
const FX_PERMISSION_DENIED: i32 = 3;
const FX_NO_CONNECTION: i32 = 6;
const FX_CONNECTION_LOST: i32 = 7;
const FX_NO_SUCH_PATH: i32 = 10;

// libssh2 session error codes that mean the transport is gone.
const SESSION_SOCKET_SEND: i32 = -7;
const SESSION_TIMEOUT: i32 = -9;
const SESSION_SOCKET_DISCONNECT: i32 = -13;
const SESSION_SOCKET_TIMEOUT: i32 = -30;
const SESSION_SOCKET_RECV: i32 = -43;

/// Errors establishing the session. All of them abort the run.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("TCP connection to {host}:{port} failed: {source}")]
    Tcp {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("SSH handshake failed: {0}")]
    Handshake(#[source] ssh2::Error),

    #[error("Host key for {0} is not in known_hosts (pass --allow-missing-host-key to accept it)")]
    UnknownHostKey(String),

    #[error("Host key for {0} does not match known_hosts")]
    HostKeyMismatch(String),

    #[error("Host key check failed: {0}")]
    HostKeyCheck(String),

    #[error("Authentication as {user} failed: {message}")]
    Auth { user: String, message: String },

    #[error("Failed to start SFTP subsystem: {0}")]
    Subsystem(#[source] ssh2::Error),
}

/// How to authenticate the SSH session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    Password(String),
    /// Private key file. libssh2 detects the key type from the file itself.
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    /// Keys offered by a running ssh-agent.
    Agent,
}

/// Everything needed to open the session.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: Auth,
    /// Accept (and warn about) host keys missing from known_hosts.
    pub allow_missing_host_key: bool,
    pub connect_timeout: Duration,
    /// Defaults to `~/.ssh/known_hosts`.
    pub known_hosts: Option<PathBuf>,
}

/// Remote filesystem reached through SFTP.
pub struct SftpRemote {
    session: Session,
    sftp: Sftp,
}

impl SftpRemote {
    /// Connect, verify the host key, authenticate and open the SFTP channel.
    pub fn connect(config: &ConnectionConfig) -> Result<Self, ConnectError> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .and_then(|mut addrs| {
                addrs.next().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, "no addresses for host")
                })
            })
            .map_err(|source| ConnectError::Resolve {
                host: config.host.clone(),
                port: config.port,
                source,
            })?;

        let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout).map_err(|source| {
            ConnectError::Tcp {
                host: config.host.clone(),
                port: config.port,
                source,
            }
        })?;

        let mut session = Session::new().map_err(ConnectError::Handshake)?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(config.connect_timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(ConnectError::Handshake)?;

        verify_host_key(&session, config)?;
        authenticate(&session, config)?;

        // Blocking calls wait as long as the transfer needs once connected.
        session.set_timeout(0);
        let sftp = session.sftp().map_err(ConnectError::Subsystem)?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            user = %config.user,
            "sftp session established"
        );

        Ok(Self { session, sftp })
    }
}

impl Drop for SftpRemote {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "mirror finished", None) {
            tracing::debug!(error = %e, "ssh disconnect failed");
        }
    }
}

fn verify_host_key(session: &Session, config: &ConnectionConfig) -> Result<(), ConnectError> {
    let (key, _key_type) = session
        .host_key()
        .ok_or_else(|| ConnectError::HostKeyCheck("server sent no host key".into()))?;

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| ConnectError::HostKeyCheck(e.to_string()))?;

    let file = config.known_hosts.clone().or_else(default_known_hosts);
    if let Some(file) = file.as_deref()
        && file.exists()
    {
        known_hosts
            .read_file(file, KnownHostFileKind::OpenSSH)
            .map_err(|e| ConnectError::HostKeyCheck(format!("{}: {}", file.display(), e)))?;
    }

    match known_hosts.check_port(&config.host, config.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound if config.allow_missing_host_key => {
            tracing::warn!(host = %config.host, "accepting host key not present in known_hosts");
            Ok(())
        }
        CheckResult::NotFound => Err(ConnectError::UnknownHostKey(config.host.clone())),
        CheckResult::Mismatch => Err(ConnectError::HostKeyMismatch(config.host.clone())),
        CheckResult::Failure => Err(ConnectError::HostKeyCheck(format!(
            "could not check host key for {}",
            config.host
        ))),
    }
}

fn default_known_hosts() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
}

fn authenticate(session: &Session, config: &ConnectionConfig) -> Result<(), ConnectError> {
    let user = config.user.as_str();
    let result = match &config.auth {
        Auth::Password(password) => session.userauth_password(user, password),
        Auth::KeyFile { path, passphrase } => {
            session.userauth_pubkey_file(user, None, path, passphrase.as_deref())
        }
        Auth::Agent => session.userauth_agent(user),
    };

    result.map_err(|e| ConnectError::Auth {
        user: user.to_string(),
        message: e.message().to_string(),
    })?;

    if session.authenticated() {
        Ok(())
    } else {
        Err(ConnectError::Auth {
            user: user.to_string(),
            message: "server did not accept the credentials".into(),
        })
    }
}

/// Map an `ssh2` error for `path` onto the remote error tiers.
fn classify(path: &RemotePath, err: ssh2::Error) -> RemoteError {
    match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE | FX_NO_SUCH_PATH) => RemoteError::NotFound(path.clone()),
        ErrorCode::SFTP(FX_PERMISSION_DENIED) => RemoteError::PermissionDenied(path.clone()),
        ErrorCode::SFTP(FX_NO_CONNECTION | FX_CONNECTION_LOST)
        | ErrorCode::Session(
            SESSION_SOCKET_SEND
            | SESSION_TIMEOUT
            | SESSION_SOCKET_DISCONNECT
            | SESSION_SOCKET_TIMEOUT
            | SESSION_SOCKET_RECV,
        ) => RemoteError::ConnectionLost(err.message().to_string()),
        _ => RemoteError::failure(path, err.message()),
    }
}

fn remote_path(path: &RemotePath) -> &Path {
    Path::new(path.as_str())
}

impl RemoteFs for SftpRemote {
    fn stat(&self, path: &RemotePath) -> Result<RemoteStat, RemoteError> {
        let stat = self
            .sftp
            .stat(remote_path(path))
            .map_err(|e| classify(path, e))?;
        Ok(RemoteStat {
            mode: stat.perm,
            size: stat.size,
        })
    }

    fn mkdir(&self, path: &RemotePath) -> Result<(), RemoteError> {
        self.sftp
            .mkdir(remote_path(path), DIR_MODE)
            .map_err(|e| classify(path, e))
    }

    fn rmdir(&self, path: &RemotePath) -> Result<(), RemoteError> {
        self.sftp
            .rmdir(remote_path(path))
            .map_err(|e| classify(path, e))
    }

    fn remove(&self, path: &RemotePath) -> Result<(), RemoteError> {
        self.sftp
            .unlink(remote_path(path))
            .map_err(|e| classify(path, e))
    }

    fn list_entries(&self, path: &RemotePath) -> Result<Vec<RemoteEntry>, RemoteError> {
        let listing = self
            .sftp
            .readdir(remote_path(path))
            .map_err(|e| classify(path, e))?;

        Ok(listing
            .into_iter()
            .filter_map(|(child, stat)| {
                let name = child.file_name()?.to_string_lossy().into_owned();
                (name != "." && name != "..").then_some(RemoteEntry {
                    name,
                    mode: stat.perm,
                })
            })
            .collect())
    }

    /// Streams into a hidden sibling and renames it over `remote` once every
    /// byte is written, so a failed transfer never truncates the target.
    fn upload(&self, local: &Path, remote: &RemotePath) -> Result<u64, RemoteError> {
        let mut source = File::open(local).map_err(|source| RemoteError::Local {
            path: local.to_path_buf(),
            source,
        })?;

        let staging = staging_path(remote);
        let mut target = self
            .sftp
            .create(remote_path(&staging))
            .map_err(|e| classify(&staging, e))?;
        let copied = copy_to_remote(&mut source, &mut target, local, remote);
        drop(target);

        let written = match copied {
            Ok(written) => written,
            Err(e) => {
                self.discard(&staging);
                return Err(e);
            }
        };

        if let Err(e) = self.replace(&staging, remote) {
            self.discard(&staging);
            return Err(e);
        }
        Ok(written)
    }
}

impl SftpRemote {
    /// Rename `staging` over `remote`.
    ///
    /// SFTP v3 servers ignore rename flags and refuse to overwrite, so an
    /// existing target is unlinked and the rename retried once.
    fn replace(&self, staging: &RemotePath, remote: &RemotePath) -> Result<(), RemoteError> {
        let flags = Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE);
        let first = self
            .sftp
            .rename(remote_path(staging), remote_path(remote), flags);
        let Err(e) = first else {
            return Ok(());
        };

        let err = classify(remote, e);
        if err.is_connection_lost() || self.sftp.stat(remote_path(remote)).is_err() {
            return Err(err);
        }

        self.sftp
            .unlink(remote_path(remote))
            .map_err(|e| classify(remote, e))?;
        self.sftp
            .rename(remote_path(staging), remote_path(remote), flags)
            .map_err(|e| classify(remote, e))
    }

    /// Best-effort removal of a staging file after a failed upload.
    fn discard(&self, staging: &RemotePath) {
        if let Err(e) = self.sftp.unlink(remote_path(staging)) {
            tracing::debug!(remote = %staging, error = %e, "could not remove staging file");
        }
    }
}
