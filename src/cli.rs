//! CLI interface for fleetrun

use crate::fleet::FleetOrchestrator;
use crate::logging::{init_logging, LogFormat};
use crate::models::ExecutionResult;
use crate::parser::parse_fleet_file;
use crate::session::ssh::SshSessionFactory;
use crate::templates;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// fleetrun - Fleet-wide remote script execution and artifact retrieval over SSH
#[derive(Parser, Debug)]
#[command(name = "fleetrun")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fleet-wide remote script execution and artifact retrieval over SSH", long_about = None)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "json", global = true)]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a job across the fleet
    Run {
        /// Path to fleet YAML file
        fleet: PathBuf,

        /// Override the concurrent host limit
        #[arg(short = 'c', long)]
        limit: Option<usize>,

        /// Print results as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Validate a fleet YAML file without contacting any host
    Validate {
        /// Path to fleet YAML file
        fleet: PathBuf,
    },

    /// Generate an example fleet YAML file
    Template {
        /// Write output to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Cli {
    /// Initialize logging based on CLI arguments
    pub fn init_logging(&self) -> anyhow::Result<()> {
        init_logging(&self.log_level, LogFormat::from(self.log_format.as_str()))
    }

    /// Execute the CLI command
    pub async fn execute(&self) -> anyhow::Result<()> {
        match &self.command {
            Commands::Run { fleet, limit, json } => {
                self.run_fleet(fleet, *limit, *json).await?;
            }
            Commands::Validate { fleet } => {
                self.validate_fleet(fleet)?;
            }
            Commands::Template { output } => {
                self.handle_template(output.as_ref())?;
            }
        }
        Ok(())
    }

    /// Run a fleet job once
    async fn run_fleet(
        &self,
        fleet_path: &PathBuf,
        limit: Option<usize>,
        json: bool,
    ) -> anyhow::Result<()> {
        info!("Loading fleet from: {:?}", fleet_path);

        let config = parse_fleet_file(fleet_path)?;
        info!(
            "Fleet '{}' loaded: {} hosts, script {:?}",
            config.name,
            config.hosts.len(),
            config.job.script
        );

        let factory = Arc::new(SshSessionFactory::new(config.config.host_key_policy));
        let orchestrator =
            FleetOrchestrator::new(factory).with_stderr_policy(config.config.stderr_policy);

        // Ctrl-C cancels in-flight hosts; their sessions still close.
        let cancel = orchestrator.cancel_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, canceling in-flight hosts");
                cancel.cancel();
            }
        });

        let limit = limit.or(config.config.max_parallel);
        let results = orchestrator.run(config.job, config.hosts, limit).await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&results)?);
        } else {
            print_summary(&results);
        }

        let failed = results.iter().filter(|r| !r.is_success()).count();
        if failed > 0 {
            error!("{} of {} hosts failed", failed, results.len());
            std::process::exit(1);
        }

        info!("All {} hosts completed", results.len());
        Ok(())
    }

    /// Validate a fleet file without executing
    fn validate_fleet(&self, fleet_path: &PathBuf) -> anyhow::Result<()> {
        info!("Validating fleet: {:?}", fleet_path);

        let config = parse_fleet_file(fleet_path)?;

        println!("Fleet '{}' is valid", config.name);
        println!("Hosts: {}", config.hosts.len());
        println!(
            "Job: {} {} -> {}",
            config.job.interpreter,
            config.job.remote_script_path(),
            config.job.remote_output_dir
        );

        Ok(())
    }

    /// Handle the `template` subcommand.
    fn handle_template(&self, output: Option<&PathBuf>) -> anyhow::Result<()> {
        if let Some(path) = output {
            use std::fs::OpenOptions;
            use std::io::Write as _;
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::AlreadyExists {
                        anyhow::anyhow!(
                            "File '{}' already exists. Remove it first or choose a different name.",
                            path.display()
                        )
                    } else {
                        e.into()
                    }
                })?;
            file.write_all(templates::EXAMPLE_FLEET.as_bytes())?;
            println!("Template written to {}", path.display());
        } else {
            print!("{}", templates::EXAMPLE_FLEET);
        }

        Ok(())
    }
}

/// Per-host summary table
fn print_summary(results: &[ExecutionResult]) {
    println!();
    println!(
        "{:<22} {:<14} {:<12} {:<8} {}",
        "HOST", "STAGE", "STATUS", "OUTPUT", "DETAIL"
    );
    println!("{}", "-".repeat(90));

    for result in results {
        let detail = result
            .artifact
            .as_ref()
            .map(|p| p.display().to_string())
            .or_else(|| result.error.clone())
            .unwrap_or_default();

        println!(
            "{:<22} {:<14} {:<12} {:<8} {}",
            result.host.to_string(),
            result.stage.to_string(),
            result.status.to_string(),
            if result.output_found { "yes" } else { "no" },
            detail
        );
    }
    println!();
}
