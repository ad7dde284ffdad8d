//! Fleetward - Entry Point
//!
//! Deploys a named service version to a fleet of hosts with health
//! verification, bounded parallelism and rollback.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{error, info};

use fleetward::app::options::{DeployOptions, DEFAULT_CATALOG_PATH};
use fleetward::app::run::{run_deploy, DeployOutput};
use fleetward::deploy::fsm::HostState;
use fleetward::errors::EngineError;
use fleetward::logs::{init_logging, LogLevel, LogOptions};
use fleetward::models::descriptor::Environment;
use fleetward::models::plan::DeploymentPlan;
use fleetward::models::report::{DeploymentReport, OverallStatus};
use fleetward::utils::{format_duration_ms, version_info};

#[derive(Parser)]
#[command(name = "fleetward")]
#[command(about = "Fleet deployment orchestration engine", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a service version to its fleet
    Deploy {
        /// Target environment (dev, qa, prod)
        #[arg(long)]
        env: String,

        /// Service name as declared in the catalog
        #[arg(long)]
        service: String,

        /// Path to the service catalog file
        #[arg(long, default_value = DEFAULT_CATALOG_PATH)]
        catalog: PathBuf,

        /// Override the container registry from the catalog
        #[arg(long)]
        registry: Option<String>,

        /// Maximum hosts deployed concurrently within a batch
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Fraction of the fleet placed in the canary batch
        #[arg(long)]
        canary_fraction: Option<f64>,

        /// Abort when a batch's failure fraction exceeds this value
        #[arg(long)]
        failure_threshold: Option<f64>,

        /// Roll back succeeded hosts when the deployment aborts
        #[arg(long)]
        rollback_on_abort: bool,

        /// Retries per transition on transient failures
        #[arg(long)]
        retry_limit: Option<u32>,

        /// Per-host deployment deadline in seconds
        #[arg(long)]
        host_timeout: Option<u64>,

        /// SSH login user for hosts without one
        #[arg(long)]
        ssh_user: Option<String>,

        /// Write the deployment report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Plan and validate only; no host actions
        #[arg(long)]
        dry_run: bool,
    },

    /// Print version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.log_level.parse::<LogLevel>() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(3);
        }
    };
    let log_options = LogOptions {
        log_level,
        json_format: cli.json_logs,
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    match cli.command {
        Commands::Version => {
            println!("{}", serde_json::to_string_pretty(&version_info()).unwrap());
        }
        Commands::Deploy {
            env,
            service,
            catalog,
            registry,
            max_parallel,
            canary_fraction,
            failure_threshold,
            rollback_on_abort,
            retry_limit,
            host_timeout,
            ssh_user,
            report,
            dry_run,
        } => {
            let environment = match env.parse::<Environment>() {
                Ok(environment) => environment,
                Err(e) => {
                    error!("{}", e);
                    std::process::exit(3);
                }
            };

            let mut options = DeployOptions::new(environment, service);
            options.catalog_path = catalog;
            options.registry_override = registry;
            options.dry_run = dry_run;
            if let Some(max_parallel) = max_parallel {
                options.fleet.max_parallel = max_parallel;
            }
            if let Some(canary_fraction) = canary_fraction {
                options.fleet.canary_fraction = canary_fraction;
            }
            if let Some(failure_threshold) = failure_threshold {
                options.abort.failure_threshold = failure_threshold;
            }
            options.abort.rollback_on_abort = rollback_on_abort;
            if let Some(retry_limit) = retry_limit {
                options.machine.retry.retry_limit = retry_limit;
            }
            if let Some(host_timeout) = host_timeout {
                options.machine.deadlines.per_host = Duration::from_secs(host_timeout);
            }
            options.shell.user = ssh_user;

            match run_deploy(options, await_shutdown_signal()).await {
                Ok(DeployOutput::Plan(plan)) => {
                    print_plan(&plan);
                }
                Ok(DeployOutput::Report(deployment)) => {
                    print_summary(&deployment);
                    if let Some(path) = report {
                        if let Err(e) = write_report(&path, &deployment).await {
                            error!("Failed to write report to {}: {}", path.display(), e);
                        } else {
                            info!("Report written to {}", path.display());
                        }
                    }
                    std::process::exit(deployment.exit_code());
                }
                Err(e) => {
                    error!("Deployment not started: {}", e);
                    std::process::exit(3);
                }
            }
        }
    }
}

async fn write_report(path: &PathBuf, report: &DeploymentReport) -> Result<(), EngineError> {
    let contents = serde_json::to_string_pretty(report)?;
    tokio::fs::write(path, contents).await?;
    Ok(())
}

fn print_plan(plan: &DeploymentPlan) {
    println!(
        "\nDeployment plan: {} {} ({} hosts, {} batches)",
        plan.descriptor.service_name.as_str().bold(),
        plan.descriptor.version,
        plan.host_count(),
        plan.batches.len()
    );

    println!("\nSteps:");
    for step in &plan.steps {
        println!("  {:<12} {}", step.state.to_string(), step.action.describe());
    }

    if !plan.rollback.is_empty() {
        println!("\nRollback:");
        for action in &plan.rollback {
            println!("  {}", action.describe());
        }
    }

    println!("\nBatches:");
    for (index, batch) in plan.batches.iter().enumerate() {
        let hosts = batch
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let label = if index == 0 {
            format!("batch {} (canary)", index + 1)
        } else {
            format!("batch {}", index + 1)
        };
        println!("  {:<18} {}", label, hosts);
    }
    println!();
}

fn print_summary(report: &DeploymentReport) {
    println!(
        "\nDeployment {} of {} {}",
        report.deployment_id,
        report.descriptor.service_name.as_str().bold(),
        report.descriptor.version
    );
    println!(
        "\n{:<28} {:<12} {:>8} {:>10}  {}",
        "HOST", "RESULT", "ATTEMPTS", "DURATION", "LAST ERROR"
    );
    for outcome in report.outcomes.values() {
        let padded = format!("{:<12}", outcome.final_state.to_string());
        let state = match outcome.final_state {
            HostState::Succeeded => padded.as_str().green(),
            HostState::RolledBack => padded.as_str().yellow(),
            HostState::Failed => padded.as_str().red(),
            _ => padded.as_str().normal(),
        };
        let last_error = outcome
            .errors
            .last()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        println!(
            "{:<28} {} {:>8} {:>10}  {}",
            outcome.host.to_string(),
            state,
            outcome.attempts,
            format_duration_ms(outcome.duration_ms),
            last_error
        );
    }

    let overall = match report.overall {
        OverallStatus::AllSucceeded => "all succeeded".green(),
        OverallStatus::PartialFailure => "partial failure".red(),
        OverallStatus::Aborted => "aborted".red(),
        OverallStatus::RolledBack => "rolled back".yellow(),
    };
    println!("\nOverall: {}\n", overall);
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, cancelling...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, cancelling...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, cancelling...");
    }
}
