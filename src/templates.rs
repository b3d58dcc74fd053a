//! Built-in fleet file template for the `fleetrun template` subcommand.

/// Commented example fleet file covering both credential forms.
pub const EXAMPLE_FLEET: &str = r#"# fleetrun fleet file
name: collect-metrics

config:
  # Concurrent host limit; omit for one worker per host
  max_parallel: 8
  # strict (verify known_hosts) or accept-new (trust on first contact)
  host_key_policy: strict
  # any-stderr (stderr text fails the run) or exit-code
  stderr_policy: any-stderr

job:
  # Local script staged onto every host
  script: ./collect.py
  remote_script_dir: /opt/fleet/
  # The script is expected to write {remote_output_dir}{address}_{output_filename}
  remote_output_dir: /tmp/out/
  output_filename: result.csv
  local_output_dir: ./results
  interpreter: python3
  exec_timeout: 180
  connect_timeout: 30

hosts:
  - address: 10.0.0.5
    username: root
    auth:
      password: root
  - address: 10.0.0.6
    port: 2222
    username: deploy
    auth:
      key_path: /home/deploy/.ssh/id_rsa
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FleetConfig, HostKeyPolicy};

    #[test]
    fn test_example_fleet_parses() {
        let config: FleetConfig = serde_yaml::from_str(EXAMPLE_FLEET).unwrap();
        assert_eq!(config.name, "collect-metrics");
        assert_eq!(config.config.max_parallel, Some(8));
        assert_eq!(config.config.host_key_policy, HostKeyPolicy::Strict);
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.job.remote_output_path("10.0.0.5"), "/tmp/out/10.0.0.5_result.csv");
    }
}
