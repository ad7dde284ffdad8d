//! Fleet coordinator
//!
//! Runs the plan's batches sequentially, one machine task per host within
//! a batch, and aggregates the write-once outcomes into a deployment
//! report. After each batch the abort policy decides whether the rollout
//! continues, halts, or is rolled back.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::deploy::executor::{ExecutionError, HostExecutor};
use crate::deploy::fsm::HostState;
use crate::deploy::machine::{HostMachine, MachineOptions};
use crate::models::descriptor::HostId;
use crate::models::plan::DeploymentPlan;
use crate::models::policy::AbortPolicy;
use crate::models::report::{DeploymentOutcome, DeploymentReport, OverallStatus, ProgressEvent};
use crate::utils::generate_uuid;

/// Coordinates the concurrent deployment of one plan across its fleet
pub struct FleetCoordinator {
    plan: Arc<DeploymentPlan>,
    executor: Arc<dyn HostExecutor>,
    abort: AbortPolicy,
    machine_options: MachineOptions,
    cancel_tx: broadcast::Sender<()>,
}

impl FleetCoordinator {
    pub fn new(
        plan: DeploymentPlan,
        executor: Arc<dyn HostExecutor>,
        abort: AbortPolicy,
        machine_options: MachineOptions,
    ) -> Self {
        let (cancel_tx, _) = broadcast::channel(1);
        Self {
            plan: Arc::new(plan),
            executor,
            abort,
            machine_options,
            cancel_tx,
        }
    }

    /// Handle used to request cooperative cancellation of in-flight hosts
    pub fn cancel_handle(&self) -> broadcast::Sender<()> {
        self.cancel_tx.clone()
    }

    /// Run every batch to completion (or abort) and build the report
    pub async fn run(self) -> DeploymentReport {
        let deployment_id = generate_uuid();
        let started_at = Utc::now();
        info!(
            "Deployment {}: {} {} to {} host(s) in {} batch(es)",
            deployment_id,
            self.plan.descriptor.service_name,
            self.plan.descriptor.version,
            self.plan.host_count(),
            self.plan.batches.len()
        );

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let drain = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                debug!("host {}: {} -> {}", event.host, event.from, event.to);
            }
        });

        let mut outcomes: BTreeMap<String, DeploymentOutcome> = BTreeMap::new();
        let mut completed_batches: Vec<Vec<HostId>> = Vec::new();
        let mut aborted = false;

        let total = self.plan.batches.len();
        for (index, batch) in self.plan.batches.iter().enumerate() {
            info!(
                "Batch {}/{}: deploying to {} host(s)",
                index + 1,
                total,
                batch.len()
            );

            let mut handles = Vec::with_capacity(batch.len());
            for host in batch {
                let machine = HostMachine::new(
                    host.clone(),
                    self.plan.clone(),
                    self.executor.clone(),
                    self.machine_options.clone(),
                    event_tx.clone(),
                    self.cancel_tx.subscribe(),
                );
                handles.push(tokio::spawn(machine.run()));
            }

            let mut failed = 0usize;
            for handle in handles {
                match handle.await {
                    Ok(outcome) => {
                        if outcome.final_state != HostState::Succeeded {
                            failed += 1;
                        }
                        outcomes.insert(outcome.host.to_string(), outcome);
                    }
                    Err(e) => {
                        error!("Host task failed: {}", e);
                        failed += 1;
                    }
                }
            }
            completed_batches.push(batch.clone());

            let fraction = failed as f64 / batch.len() as f64;
            if fraction > self.abort.failure_threshold {
                warn!(
                    "Batch {}/{}: {}/{} host(s) failed, above threshold {:.2}; aborting",
                    index + 1,
                    total,
                    failed,
                    batch.len(),
                    self.abort.failure_threshold
                );
                aborted = true;
                break;
            }
        }
        drop(event_tx);

        let mut rollback_attempted = false;
        if aborted && self.abort.rollback_on_abort {
            if self.plan.rollback.is_empty() {
                warn!("Rollback requested but no previous version is recorded");
            } else {
                rollback_attempted = true;
                self.rollback_fleet(&completed_batches, &mut outcomes).await;
            }
        }
        let _ = drain.await;

        let overall = derive_overall(&outcomes, aborted, rollback_attempted);
        info!("Deployment {} finished: {:?}", deployment_id, overall);

        DeploymentReport {
            deployment_id,
            descriptor: self.plan.descriptor.clone(),
            outcomes,
            overall,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Roll back every succeeded host, batch by batch in reverse order
    async fn rollback_fleet(
        &self,
        batches: &[Vec<HostId>],
        outcomes: &mut BTreeMap<String, DeploymentOutcome>,
    ) {
        for batch in batches.iter().rev() {
            let targets: Vec<HostId> = batch
                .iter()
                .filter(|host| {
                    outcomes
                        .get(&host.to_string())
                        .map(|o| o.final_state == HostState::Succeeded)
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            if targets.is_empty() {
                continue;
            }

            info!("Rolling back {} host(s)", targets.len());
            let results = join_all(targets.iter().map(|host| self.rollback_host(host))).await;

            for (host, restored) in targets.iter().zip(results) {
                if !restored {
                    warn!("host {}: rollback failed, left as succeeded", host);
                    continue;
                }
                let key = host.to_string();
                let updated = outcomes.get(&key).map(|existing| DeploymentOutcome {
                    final_state: HostState::RolledBack,
                    ..existing.clone()
                });
                if let Some(updated) = updated {
                    outcomes.insert(key, updated);
                }
            }
        }
    }

    async fn rollback_host(&self, host: &HostId) -> bool {
        let retry = self.machine_options.retry;
        let limit = self.machine_options.deadlines.per_transition;

        for action in &self.plan.rollback {
            let mut attempt: u32 = 1;
            loop {
                let result =
                    match tokio::time::timeout(limit, self.executor.execute(host, action)).await {
                        Ok(result) => result,
                        Err(_) => Err(ExecutionError::Transient(format!(
                            "action timed out after {:?}",
                            limit
                        ))),
                    };
                match result {
                    Ok(_) => break,
                    Err(ExecutionError::Permanent(message)) => {
                        error!("host {}: rollback action failed: {}", host, message);
                        return false;
                    }
                    Err(ExecutionError::Cancelled) => return false,
                    Err(ExecutionError::Transient(message)) => {
                        warn!(
                            "host {}: rollback attempt {} failed: {}",
                            host, attempt, message
                        );
                        if attempt > retry.retry_limit {
                            return false;
                        }
                        tokio::time::sleep(retry.backoff_delay(attempt)).await;
                        attempt += 1;
                    }
                }
            }
        }
        true
    }
}

/// Aggregate the per-host outcomes into the overall status
fn derive_overall(
    outcomes: &BTreeMap<String, DeploymentOutcome>,
    aborted: bool,
    rollback_attempted: bool,
) -> OverallStatus {
    let all_succeeded = outcomes
        .values()
        .all(|o| o.final_state == HostState::Succeeded);

    if aborted {
        let none_succeeded = outcomes
            .values()
            .all(|o| o.final_state != HostState::Succeeded);
        if rollback_attempted && none_succeeded {
            OverallStatus::RolledBack
        } else {
            OverallStatus::Aborted
        }
    } else if all_succeeded {
        OverallStatus::AllSucceeded
    } else {
        OverallStatus::PartialFailure
    }
}
