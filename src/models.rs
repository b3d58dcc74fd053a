//! Core data models for the fleetrun pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Input validation limits
pub const MAX_FLEET_YAML_SIZE: usize = 1_048_576; // 1 MB
pub const MAX_HOST_COUNT: usize = 1_000;
pub const MAX_PARALLEL_LIMIT: usize = 256;
pub const MAX_OUTPUT_SIZE: usize = 10_485_760; // 10 MB

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Fleet configuration parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub config: FleetGlobalConfig,
    pub job: RemoteJob,
    pub hosts: Vec<HostDescriptor>,
}

/// Global fleet run configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetGlobalConfig {
    /// Concurrent host limit; omitted means one worker per host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    #[serde(default)]
    pub stderr_policy: StderrPolicy,
}

/// Server host key verification policy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Verify against the OpenSSH known_hosts file; reject unknown or
    /// mismatched keys
    #[default]
    Strict,
    /// Trust whatever key the server presents on first contact
    AcceptNew,
}

/// How a remote command's outcome is judged
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StderrPolicy {
    /// Any non-empty stderr text fails the execute stage, regardless of
    /// exit code
    #[default]
    AnyStderr,
    /// Only a nonzero exit status fails; stderr is recorded but not fatal
    ExitCode,
}

/// One addressable host in the fleet. Identity key is `(address, port)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub auth: Credential,
}

impl HostDescriptor {
    pub fn id(&self) -> HostId {
        HostId {
            address: self.address.clone(),
            port: self.port,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Host identity carried on results and events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// SSH credential for one host
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credential {
    Password { password: String },
    Key {
        key_path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

// Secrets stay out of logs and debug dumps.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { .. } => write!(f, "Credential::Password(<redacted>)"),
            Credential::Key { key_path, .. } => {
                write!(f, "Credential::Key({})", key_path.display())
            }
        }
    }
}

/// Description of what to run on every host. Immutable and shared
/// read-only across one fleet run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJob {
    /// Local script to stage and execute
    pub script: PathBuf,
    /// Remote staging directory; joined by plain concatenation
    pub remote_script_dir: String,
    /// Remote directory the script writes its output into
    pub remote_output_dir: String,
    /// Expected output filename, prefixed remotely with the host address
    pub output_filename: String,
    #[serde(default = "default_local_output_dir")]
    pub local_output_dir: PathBuf,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Remote command bound, in seconds
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout: u64,
    /// Connection establishment bound, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_local_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_interpreter() -> String {
    DEFAULT_INTERPRETER.to_string()
}

fn default_exec_timeout() -> u64 {
    DEFAULT_EXEC_TIMEOUT_SECS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl RemoteJob {
    pub fn script_basename(&self) -> String {
        self.script
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Staged script path: `remote_script_dir` + script basename.
    pub fn remote_script_path(&self) -> String {
        format!("{}{}", self.remote_script_dir, self.script_basename())
    }

    /// Expected remote output path. The `{dir}{address}_{filename}`
    /// shape is a compatibility contract with deployed scripts and must
    /// stay bit-exact.
    pub fn remote_output_path(&self, host_address: &str) -> String {
        format!(
            "{}{}_{}",
            self.remote_output_dir, host_address, self.output_filename
        )
    }

    /// Local landing path for a host's artifact, named from the remote
    /// basename.
    pub fn local_artifact_path(&self, host_address: &str) -> PathBuf {
        let remote = self.remote_output_path(host_address);
        let basename = Path::new(&remote)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or(remote);
        self.local_output_dir.join(basename)
    }

    /// Remote invocation command for the staged script.
    pub fn invocation(&self) -> String {
        format!("{} {}", self.interpreter, self.remote_script_path())
    }
}

/// Furthest point a host's pipeline reached
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Init,
    Connected,
    Uploaded,
    Executed,
    OutputFound,
    Downloaded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Init => write!(f, "init"),
            Stage::Connected => write!(f, "connected"),
            Stage::Uploaded => write!(f, "uploaded"),
            Stage::Executed => write!(f, "executed"),
            Stage::OutputFound => write!(f, "output-found"),
            Stage::Downloaded => write!(f, "downloaded"),
        }
    }
}

/// Terminal classification of one host's run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Timeout,
    Unreachable,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Timeout => write!(f, "timeout"),
            RunStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Outcome of one host's pipeline. Created once by its executor and
/// never mutated after hand-off to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub host: HostId,
    pub stage: Stage,
    pub status: RunStatus,
    pub output_found: bool,
    /// Captured remote stderr; may be empty
    pub stderr: String,
    /// Local artifact path, present only when the stage reached download
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Success)
    }

    /// Result synthesized when a host's worker died instead of
    /// returning. Keeps the one-result-per-host guarantee.
    pub fn worker_failure(host: HostId, started_at: DateTime<Utc>, detail: String) -> Self {
        Self {
            host,
            stage: Stage::Init,
            status: RunStatus::Failed,
            output_found: false,
            stderr: String::new(),
            artifact: None,
            error: Some(format!("worker failure: {detail}")),
            started_at,
            duration: Duration::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_fixture() -> RemoteJob {
        RemoteJob {
            script: PathBuf::from("/tmp/collect.py"),
            remote_script_dir: "/opt/fleet/".to_string(),
            remote_output_dir: "/tmp/out/".to_string(),
            output_filename: "result.csv".to_string(),
            local_output_dir: PathBuf::from("./results"),
            interpreter: default_interpreter(),
            exec_timeout: default_exec_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }

    #[test]
    fn test_remote_output_path_exact() {
        let job = job_fixture();
        assert_eq!(
            job.remote_output_path("10.0.0.5"),
            "/tmp/out/10.0.0.5_result.csv"
        );
    }

    #[test]
    fn test_remote_script_path() {
        let job = job_fixture();
        assert_eq!(job.remote_script_path(), "/opt/fleet/collect.py");
        assert_eq!(job.invocation(), "python3 /opt/fleet/collect.py");
    }

    #[test]
    fn test_local_artifact_path_uses_remote_basename() {
        let job = job_fixture();
        assert_eq!(
            job.local_artifact_path("10.0.0.5"),
            PathBuf::from("./results/10.0.0.5_result.csv")
        );
    }

    #[test]
    fn test_job_defaults() {
        let yaml = r#"
script: ./collect.py
remote_script_dir: /opt/fleet/
remote_output_dir: /tmp/out/
output_filename: result.csv
"#;
        let job: RemoteJob = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(job.interpreter, "python3");
        assert_eq!(job.exec_timeout, 180);
        assert_eq!(job.connect_timeout, 30);
        assert_eq!(job.local_output_dir, PathBuf::from("./output"));
    }

    #[test]
    fn test_host_defaults_and_identity() {
        let yaml = r#"
address: 10.0.0.5
username: root
auth:
  password: root
"#;
        let host: HostDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(host.port, 22);
        assert_eq!(host.id().to_string(), "10.0.0.5:22");
        assert!(matches!(host.auth, Credential::Password { .. }));
    }

    #[test]
    fn test_credential_key_serde() {
        let yaml = r#"
key_path: /home/op/.ssh/id_rsa
"#;
        let cred: Credential = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(cred, Credential::Key { .. }));
    }

    #[test]
    fn test_credential_debug_redacts_password() {
        let cred = Credential::Password {
            password: "hunter2".to_string(),
        };
        let dump = format!("{cred:?}");
        assert!(!dump.contains("hunter2"));
        assert!(dump.contains("redacted"));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Init.to_string(), "init");
        assert_eq!(Stage::Connected.to_string(), "connected");
        assert_eq!(Stage::Uploaded.to_string(), "uploaded");
        assert_eq!(Stage::Executed.to_string(), "executed");
        assert_eq!(Stage::OutputFound.to_string(), "output-found");
        assert_eq!(Stage::Downloaded.to_string(), "downloaded");
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::Init < Stage::Connected);
        assert!(Stage::Executed < Stage::OutputFound);
        assert!(Stage::OutputFound < Stage::Downloaded);
    }

    #[test]
    fn test_run_status_display() {
        assert_eq!(RunStatus::Success.to_string(), "success");
        assert_eq!(RunStatus::Failed.to_string(), "failed");
        assert_eq!(RunStatus::Timeout.to_string(), "timeout");
        assert_eq!(RunStatus::Unreachable.to_string(), "unreachable");
    }

    #[test]
    fn test_policy_serde() {
        let policy: HostKeyPolicy = serde_yaml::from_str("accept-new").unwrap();
        assert_eq!(policy, HostKeyPolicy::AcceptNew);
        let policy: StderrPolicy = serde_yaml::from_str("exit-code").unwrap();
        assert_eq!(policy, StderrPolicy::ExitCode);

        let config = FleetGlobalConfig::default();
        assert_eq!(config.host_key_policy, HostKeyPolicy::Strict);
        assert_eq!(config.stderr_policy, StderrPolicy::AnyStderr);
        assert!(config.max_parallel.is_none());
    }

    #[test]
    fn test_worker_failure_result() {
        let result = ExecutionResult::worker_failure(
            HostId {
                address: "10.0.0.5".to_string(),
                port: 22,
            },
            Utc::now(),
            "panicked".to_string(),
        );
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.stage, Stage::Init);
        assert!(result.error.as_deref().unwrap().contains("panicked"));
    }
}
