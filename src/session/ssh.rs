//! SSH-backed host session (libssh2)
//!
//! One session per host per run, created fresh by the factory and torn
//! down by the executor on every exit path. File transfer rides the
//! session's SFTP channel; commands use exec channels with stdout and
//! stderr read separately.
//!
//! Host key verification is policy-driven: `strict` (default) checks
//! the OpenSSH known_hosts file, `accept-new` trusts the server's key
//! on first contact.

use crate::error::{FleetError, Result};
use crate::models::{Credential, HostDescriptor, HostKeyPolicy, RemoteJob};
use crate::session::{truncate_output, ExecOutput, HostSession, SessionFactory};
use ssh2::{CheckResult, KnownHostFileKind, Session};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

// libssh2 session-timeout error code
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

pub(crate) const EXISTS_SENTINEL: &str = "exists";

/// Idempotent remote directory creation
pub(crate) fn mkdir_command(dir: &str) -> String {
    format!("mkdir -p {dir}")
}

/// File-existence probe with a fixed sentinel pair; absent files answer
/// "no" instead of failing
pub(crate) fn probe_command(path: &str) -> String {
    format!("if [ -f {path} ]; then echo 'exists'; else echo 'no'; fi")
}

pub(crate) fn timeout_ms(timeout: Duration) -> u32 {
    timeout.as_millis().min(u32::MAX as u128) as u32
}

/// SSH session for one host
pub struct SshSession {
    host: HostDescriptor,
    connect_timeout: Duration,
    exec_timeout: Duration,
    host_key_policy: HostKeyPolicy,
    session: Option<Session>,
}

impl SshSession {
    pub fn new(host: HostDescriptor, job: &RemoteJob, host_key_policy: HostKeyPolicy) -> Self {
        Self {
            host,
            connect_timeout: Duration::from_secs(job.connect_timeout),
            exec_timeout: Duration::from_secs(job.exec_timeout),
            host_key_policy,
            session: None,
        }
    }

    fn connection_error(&self, message: String) -> FleetError {
        FleetError::Connection {
            host: self.host.address.clone(),
            message,
        }
    }

    fn transfer_error(&self, message: String) -> FleetError {
        FleetError::Transfer {
            host: self.host.address.clone(),
            message,
        }
    }

    fn active(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| self.connection_error("session not connected".to_string()))
    }

    fn verify_host_key(&self, session: &Session) -> Result<()> {
        if self.host_key_policy == HostKeyPolicy::AcceptNew {
            // Caller opted into first-contact trust.
            return Ok(());
        }

        let (key, _key_type) = session
            .host_key()
            .ok_or_else(|| self.connection_error("server offered no host key".to_string()))?;
        let mut known = session
            .known_hosts()
            .map_err(|e| self.connection_error(format!("cannot initialize known_hosts: {e}")))?;
        let path = known_hosts_path()
            .ok_or_else(|| self.connection_error("HOME not set; cannot locate known_hosts".to_string()))?;
        known
            .read_file(&path, KnownHostFileKind::OpenSSH)
            .map_err(|e| {
                self.connection_error(format!("cannot read {}: {e}", path.display()))
            })?;

        match known.check_port(&self.host.address, self.host.port, key) {
            CheckResult::Match => Ok(()),
            CheckResult::NotFound => Err(self.connection_error(
                "host key not found in known_hosts (set host_key_policy: accept-new to trust on first contact)"
                    .to_string(),
            )),
            CheckResult::Mismatch => Err(self.connection_error(
                "HOST KEY MISMATCH: the remote identity changed".to_string(),
            )),
            CheckResult::Failure => {
                Err(self.connection_error("host key verification failed".to_string()))
            }
        }
    }

    /// Run a short housekeeping command (mkdir, probe) under the
    /// connection-level timeout.
    fn run_probe(&self, command: &str) -> Result<ExecOutput> {
        let session = self.active()?;
        session.set_timeout(timeout_ms(self.connect_timeout));
        exec_channel(session, command).map_err(|failure| match failure {
            ChannelFailure::Timeout => self.connection_error(format!(
                "command did not answer within {}s",
                self.connect_timeout.as_secs()
            )),
            ChannelFailure::Other(message) => {
                self.connection_error(format!("exec channel failure: {message}"))
            }
        })
    }
}

impl HostSession for SshSession {
    fn connect(&mut self) -> Result<()> {
        let target = format!("{}:{}", self.host.address, self.host.port);
        debug!("connecting to {target}");

        let addr = target
            .to_socket_addrs()
            .map_err(|e| self.connection_error(format!("cannot resolve {target}: {e}")))?
            .next()
            .ok_or_else(|| self.connection_error(format!("no resolved address for {target}")))?;

        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| self.connection_error(format!("TCP connect failed: {e}")))?;

        // Socket-level backstop; the precise per-operation bound is the
        // libssh2 session timeout set before each call.
        let backstop = self.connect_timeout.max(self.exec_timeout) + Duration::from_secs(30);
        tcp.set_read_timeout(Some(backstop))
            .map_err(|e| self.connection_error(format!("cannot set read timeout: {e}")))?;
        tcp.set_write_timeout(Some(backstop))
            .map_err(|e| self.connection_error(format!("cannot set write timeout: {e}")))?;

        let mut session = Session::new()
            .map_err(|e| self.connection_error(format!("cannot create session: {e}")))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_ms(self.connect_timeout));
        session
            .handshake()
            .map_err(|e| self.connection_error(format!("handshake failed: {e}")))?;

        self.verify_host_key(&session)?;

        match &self.host.auth {
            Credential::Password { password } => session
                .userauth_password(&self.host.username, password)
                .map_err(|e| {
                    self.connection_error(format!("password authentication failed: {e}"))
                })?,
            Credential::Key {
                key_path,
                passphrase,
            } => session
                .userauth_pubkey_file(
                    &self.host.username,
                    None,
                    key_path,
                    passphrase.as_deref(),
                )
                .map_err(|e| {
                    self.connection_error(format!("key authentication failed: {e}"))
                })?,
        }

        if !session.authenticated() {
            return Err(self.connection_error("authentication rejected".to_string()));
        }

        info!("session established to {target}");
        self.session = Some(session);
        Ok(())
    }

    fn ensure_remote_dir(&mut self, path: &str) -> Result<()> {
        let output = self.run_probe(&mkdir_command(path))?;
        if output.exit_code != 0 {
            return Err(self.transfer_error(format!(
                "mkdir -p {path} failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        let data = std::fs::read(local).map_err(|e| {
            self.transfer_error(format!("cannot read local file {}: {e}", local.display()))
        })?;

        let session = self.active()?;
        session.set_timeout(timeout_ms(self.connect_timeout));
        let sftp = session
            .sftp()
            .map_err(|e| self.transfer_error(format!("cannot open sftp channel: {e}")))?;
        let mut remote_file = sftp
            .create(Path::new(remote))
            .map_err(|e| self.transfer_error(format!("cannot create {remote}: {e}")))?;
        remote_file
            .write_all(&data)
            .map_err(|e| self.transfer_error(format!("cannot write {remote}: {e}")))?;

        debug!("uploaded {} -> {remote}", local.display());
        Ok(())
    }

    fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput> {
        debug!("executing: {command}");
        let session = self.active()?;
        session.set_timeout(timeout_ms(timeout));
        let result = exec_channel(session, command);
        // Restore the short bound for the probe and download that follow.
        session.set_timeout(timeout_ms(self.connect_timeout));

        result.map_err(|failure| match failure {
            ChannelFailure::Timeout => FleetError::Timeout {
                host: self.host.address.clone(),
                seconds: timeout.as_secs(),
            },
            ChannelFailure::Other(message) => {
                self.connection_error(format!("exec channel failure: {message}"))
            }
        })
    }

    fn exists(&mut self, remote: &str) -> Result<bool> {
        let output = self.run_probe(&probe_command(remote))?;
        Ok(output.stdout.trim() == EXISTS_SENTINEL)
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
        let session = self.active()?;
        session.set_timeout(timeout_ms(self.connect_timeout));
        let sftp = session
            .sftp()
            .map_err(|e| self.transfer_error(format!("cannot open sftp channel: {e}")))?;
        // The file may have vanished since the probe; that is a normal
        // transfer failure, not a fatal one.
        let mut remote_file = sftp
            .open(Path::new(remote))
            .map_err(|e| self.transfer_error(format!("remote file {remote} unavailable: {e}")))?;
        let mut data = Vec::new();
        remote_file
            .read_to_end(&mut data)
            .map_err(|e| self.transfer_error(format!("cannot read {remote}: {e}")))?;

        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                self.transfer_error(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        std::fs::write(local, &data).map_err(|e| {
            self.transfer_error(format!("cannot write {}: {e}", local.display()))
        })?;

        debug!("downloaded {remote} -> {}", local.display());
        Ok(())
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            // Best effort; nothing propagates from a close path.
            let _ = session.disconnect(None, "fleetrun done", None);
            debug!("disconnected from {}", self.host.address);
        }
    }
}

enum ChannelFailure {
    Timeout,
    Other(String),
}

impl ChannelFailure {
    fn from_ssh(err: ssh2::Error) -> Self {
        if matches!(err.code(), ssh2::ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT)) {
            ChannelFailure::Timeout
        } else {
            ChannelFailure::Other(err.to_string())
        }
    }

    fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                ChannelFailure::Timeout
            }
            _ => ChannelFailure::Other(err.to_string()),
        }
    }
}

/// Run one command over a fresh exec channel, reading stdout and stderr
/// separately and collecting the exit status.
fn exec_channel(
    session: &Session,
    command: &str,
) -> std::result::Result<ExecOutput, ChannelFailure> {
    let mut channel = session.channel_session().map_err(ChannelFailure::from_ssh)?;
    channel.exec(command).map_err(ChannelFailure::from_ssh)?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(ChannelFailure::from_io)?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(ChannelFailure::from_io)?;

    channel.wait_close().map_err(ChannelFailure::from_ssh)?;
    let exit_code = channel.exit_status().map_err(ChannelFailure::from_ssh)?;

    let (stdout, stdout_truncated) = truncate_output(&stdout);
    let (stderr, stderr_truncated) = truncate_output(&stderr);

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code,
        output_truncated: stdout_truncated || stderr_truncated,
    })
}

fn known_hosts_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".ssh").join("known_hosts"))
}

/// Factory producing one [`SshSession`] per host
pub struct SshSessionFactory {
    host_key_policy: HostKeyPolicy,
}

impl SshSessionFactory {
    pub fn new(host_key_policy: HostKeyPolicy) -> Self {
        Self { host_key_policy }
    }
}

impl SessionFactory for SshSessionFactory {
    fn create(&self, host: &HostDescriptor, job: &RemoteJob) -> Box<dyn HostSession> {
        Box::new(SshSession::new(host.clone(), job, self.host_key_policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mkdir_command_shape() {
        assert_eq!(mkdir_command("/opt/fleet/"), "mkdir -p /opt/fleet/");
    }

    #[test]
    fn test_probe_command_sentinels() {
        assert_eq!(
            probe_command("/tmp/out/10.0.0.5_result.csv"),
            "if [ -f /tmp/out/10.0.0.5_result.csv ]; then echo 'exists'; else echo 'no'; fi"
        );
    }

    #[test]
    fn test_timeout_ms_saturates() {
        assert_eq!(timeout_ms(Duration::from_secs(30)), 30_000);
        assert_eq!(timeout_ms(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[test]
    fn test_channel_failure_classification() {
        let err = ssh2::Error::new(
            ssh2::ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT),
            "would block",
        );
        assert!(matches!(
            ChannelFailure::from_ssh(err),
            ChannelFailure::Timeout
        ));

        let err = ssh2::Error::new(ssh2::ErrorCode::Session(-5), "key exchange failed");
        assert!(matches!(
            ChannelFailure::from_ssh(err),
            ChannelFailure::Other(_)
        ));

        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "recv timeout");
        assert!(matches!(
            ChannelFailure::from_io(err),
            ChannelFailure::Timeout
        ));
    }

    #[test]
    fn test_unconnected_session_reports_connection_error() {
        let job: RemoteJob = serde_yaml::from_str(
            r#"
script: ./collect.py
remote_script_dir: /opt/fleet/
remote_output_dir: /tmp/out/
output_filename: result.csv
"#,
        )
        .unwrap();
        let host: HostDescriptor = serde_yaml::from_str(
            r#"
address: 10.0.0.5
username: root
auth:
  password: root
"#,
        )
        .unwrap();

        let mut session = SshSession::new(host, &job, HostKeyPolicy::Strict);
        let result = session.exists("/tmp/out/x");
        assert!(matches!(result, Err(FleetError::Connection { .. })));

        // close is idempotent and safe on a never-connected session
        session.close();
        session.close();
    }
}
