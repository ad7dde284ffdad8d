//! Deployment run loop: resolve, plan, coordinate

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::DeployOptions;
use crate::catalog::{FileCatalog, SpecResolver};
use crate::deploy::coordinator::FleetCoordinator;
use crate::deploy::executor::HostExecutor;
use crate::deploy::planner;
use crate::deploy::shell::ShellExecutor;
use crate::errors::EngineError;
use crate::models::plan::DeploymentPlan;
use crate::models::report::DeploymentReport;

/// Result of a deployment invocation
pub enum DeployOutput {
    /// Dry run: the validated plan, nothing was executed
    Plan(DeploymentPlan),

    /// Full run: the aggregated report
    Report(DeploymentReport),
}

/// Resolve the service, build the plan, and unless dry-run, execute it
/// across the fleet. The shutdown signal triggers cooperative
/// cancellation of in-flight hosts.
pub async fn run_deploy(
    options: DeployOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<DeployOutput, EngineError> {
    info!(
        "Resolving service '{}' for environment {}",
        options.service, options.environment
    );
    let catalog = FileCatalog::new(&options.catalog_path);
    let mut descriptor = catalog
        .resolve(&options.service, options.environment)
        .await?;

    if let Some(registry) = &options.registry_override {
        descriptor
            .config
            .insert("registry".to_string(), registry.clone());
    }

    let plan = planner::plan(&descriptor, &options.fleet)?;
    info!(
        "Planned {} batch(es) for {} host(s)",
        plan.batches.len(),
        plan.host_count()
    );

    if options.dry_run {
        return Ok(DeployOutput::Plan(plan));
    }

    let executor: Arc<dyn HostExecutor> = Arc::new(ShellExecutor::new(options.shell.clone()));
    let coordinator = FleetCoordinator::new(plan, executor, options.abort, options.machine.clone());

    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        shutdown_signal.await;
        warn!("Shutdown signal received, cancelling in-flight deployments...");
        let _ = cancel.send(());
    });

    Ok(DeployOutput::Report(coordinator.run().await))
}
