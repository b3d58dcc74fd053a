//! YAML parser with validation for fleet configurations

use crate::error::{FleetError, Result};
use crate::models::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Parse a fleet configuration from a YAML file.
///
/// Reads and validates a fleet YAML file, enforcing resource limits:
/// - YAML file size must be <= 1MB
/// - Host count must be <= 1,000
/// - The job must be runnable (script readable, directories and
///   timeouts sane) before any host is contacted
///
/// # Errors
///
/// * `FleetError::Io` - If the file cannot be read
/// * `FleetError::FleetFileTooLarge` - If the file exceeds 1MB
/// * `FleetError::Yaml` - If the YAML is malformed
/// * `FleetError::Validation` - If the job or host list is invalid
pub fn parse_fleet_file<P: AsRef<Path>>(path: P) -> Result<FleetConfig> {
    let content = fs::read_to_string(path)?;
    parse_fleet_yaml(&content)
}

/// Parse a fleet configuration from a YAML string.
///
/// Prefer [`parse_fleet_file`] for loading from disk.
///
/// # Example
///
/// ```no_run
/// use fleetrun::parser::parse_fleet_file;
///
/// let config = parse_fleet_file("fleet.yaml")?;
/// println!("Loaded fleet: {}", config.name);
/// # Ok::<(), fleetrun::error::FleetError>(())
/// ```
pub fn parse_fleet_yaml(content: &str) -> Result<FleetConfig> {
    if content.len() > MAX_FLEET_YAML_SIZE {
        return Err(FleetError::FleetFileTooLarge {
            size: content.len(),
            limit: MAX_FLEET_YAML_SIZE,
        });
    }

    let config: FleetConfig = serde_yaml::from_str(content)?;
    validate_fleet(&config)?;

    Ok(config)
}

/// Validate a parsed fleet configuration.
pub fn validate_fleet(config: &FleetConfig) -> Result<()> {
    if config.name.is_empty() {
        return Err(FleetError::Validation(
            "fleet name cannot be empty".to_string(),
        ));
    }

    if let Some(max_parallel) = config.config.max_parallel {
        if max_parallel == 0 {
            return Err(FleetError::Validation(
                "max_parallel must be at least 1 to avoid deadlock".to_string(),
            ));
        }
        if max_parallel > MAX_PARALLEL_LIMIT {
            return Err(FleetError::Validation(format!(
                "max_parallel must be at most {MAX_PARALLEL_LIMIT} to prevent resource exhaustion"
            )));
        }
    }

    validate_job(&config.job)?;
    validate_hosts(&config.hosts)?;

    Ok(())
}

/// Validate the job before any host work begins. A failure here aborts
/// the whole run deterministically instead of producing N partial
/// failures.
pub fn validate_job(job: &RemoteJob) -> Result<()> {
    let metadata = fs::metadata(&job.script).map_err(|e| {
        FleetError::Validation(format!(
            "local script {} is not accessible: {e}",
            job.script.display()
        ))
    })?;
    if !metadata.is_file() {
        return Err(FleetError::Validation(format!(
            "local script {} is not a regular file",
            job.script.display()
        )));
    }
    // Open-probe catches permission problems before the fan-out does.
    fs::File::open(&job.script).map_err(|e| {
        FleetError::Validation(format!(
            "local script {} is not readable: {e}",
            job.script.display()
        ))
    })?;
    if job.script_basename().is_empty() {
        return Err(FleetError::Validation(format!(
            "local script {} has no filename component",
            job.script.display()
        )));
    }

    if job.remote_script_dir.is_empty() {
        return Err(FleetError::Validation(
            "remote_script_dir cannot be empty".to_string(),
        ));
    }
    if job.remote_output_dir.is_empty() {
        return Err(FleetError::Validation(
            "remote_output_dir cannot be empty".to_string(),
        ));
    }
    if job.output_filename.is_empty() {
        return Err(FleetError::Validation(
            "output_filename cannot be empty".to_string(),
        ));
    }
    if job.interpreter.is_empty() {
        return Err(FleetError::Validation(
            "interpreter cannot be empty".to_string(),
        ));
    }

    if job.exec_timeout == 0 {
        return Err(FleetError::Validation(
            "exec_timeout must be positive".to_string(),
        ));
    }
    if job.connect_timeout == 0 {
        return Err(FleetError::Validation(
            "connect_timeout must be positive".to_string(),
        ));
    }

    Ok(())
}

/// Validate the host list: non-empty, bounded, unique `(address, port)`
/// identities, credentials resolvable.
pub fn validate_hosts(hosts: &[HostDescriptor]) -> Result<()> {
    if hosts.is_empty() {
        return Err(FleetError::Validation(
            "host list cannot be empty".to_string(),
        ));
    }
    if hosts.len() > MAX_HOST_COUNT {
        return Err(FleetError::Validation(format!(
            "host count {} exceeds limit of {MAX_HOST_COUNT}",
            hosts.len()
        )));
    }

    let mut seen = HashSet::with_capacity(hosts.len());
    for host in hosts {
        if host.address.is_empty() {
            return Err(FleetError::Validation(
                "host address cannot be empty".to_string(),
            ));
        }
        if host.username.is_empty() {
            return Err(FleetError::Validation(format!(
                "host {} has an empty username",
                host.address
            )));
        }
        if let Credential::Key { key_path, .. } = &host.auth {
            if !key_path.exists() {
                return Err(FleetError::Validation(format!(
                    "SSH key file not found for {}: {}",
                    host.address,
                    key_path.display()
                )));
            }
        }
        if !seen.insert((host.address.as_str(), host.port)) {
            return Err(FleetError::Validation(format!(
                "duplicate host {}:{}",
                host.address, host.port
            )));
        }
    }

    Ok(())
}
