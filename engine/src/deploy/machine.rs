//! Per-host deployment driver
//!
//! Walks one host through the deployment pipeline, invoking one executor
//! action per transition with retry, backoff and timeouts. Emits a
//! progress event for every state change and hands back a single
//! immutable outcome when it terminates.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::deploy::executor::{ActionResult, ExecutionError, HealthProbe, HostAction, HostExecutor};
use crate::deploy::fsm::{HostEvent, HostFsm, HostState};
use crate::models::descriptor::HostId;
use crate::models::plan::{DeploymentPlan, PlanStep};
use crate::models::policy::{DeadlineOptions, RetryPolicy};
use crate::models::report::{DeploymentOutcome, ErrorKind, ErrorRecord, ProgressEvent};

/// Per-host machine options
#[derive(Debug, Clone)]
pub struct MachineOptions {
    /// Retry policy for transient transition failures
    pub retry: RetryPolicy,

    /// Transition and per-host timeouts
    pub deadlines: DeadlineOptions,

    /// Roll a failed host back to the previous version when one is recorded
    pub rollback_on_failure: bool,
}

impl Default for MachineOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            deadlines: DeadlineOptions::default(),
            rollback_on_failure: true,
        }
    }
}

enum StepOutcome {
    Done(Option<HealthProbe>),
    Fail,
}

/// Drives one host through the deployment pipeline.
///
/// Owns its state exclusively; the coordinator only ever consumes the
/// returned outcome.
pub struct HostMachine {
    host: HostId,
    plan: Arc<DeploymentPlan>,
    executor: Arc<dyn HostExecutor>,
    options: MachineOptions,
    events: mpsc::UnboundedSender<ProgressEvent>,
    cancel: broadcast::Receiver<()>,
    fsm: HostFsm,
    attempts: u32,
    errors: Vec<ErrorRecord>,
    cancelled: bool,
}

impl HostMachine {
    pub fn new(
        host: HostId,
        plan: Arc<DeploymentPlan>,
        executor: Arc<dyn HostExecutor>,
        options: MachineOptions,
        events: mpsc::UnboundedSender<ProgressEvent>,
        cancel: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            host,
            plan,
            executor,
            options,
            events,
            cancel,
            fsm: HostFsm::new(),
            attempts: 1,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    /// Run the host to a terminal state and build its outcome
    pub async fn run(mut self) -> DeploymentOutcome {
        let started = Instant::now();
        let plan = self.plan.clone();
        info!(
            "host {}: deploying {} {}",
            self.host, plan.descriptor.service_name, plan.descriptor.version
        );

        let mut converged = false;
        for step in &plan.steps {
            self.transition(HostEvent::Advance);

            if converged && step.mutates {
                debug!(
                    "host {}: already at {}, skipping {}",
                    self.host, plan.descriptor.version, step.state
                );
                continue;
            }

            match self.run_step(step, started).await {
                StepOutcome::Done(probe) => {
                    if step.state == HostState::Validating {
                        converged = probe
                            .map(|p| {
                                p.healthy
                                    && p.running_version.as_deref()
                                        == Some(plan.descriptor.version.as_str())
                            })
                            .unwrap_or(false);
                        if converged {
                            info!(
                                "host {}: already running {} and healthy",
                                self.host, plan.descriptor.version
                            );
                        }
                    }
                }
                StepOutcome::Fail => return self.fail(started).await,
            }
        }

        // Verifying -> Succeeded
        self.transition(HostEvent::Advance);

        if !converged {
            if let Some(cleanup) = &plan.cleanup {
                if let Err(e) = self.executor.execute(&self.host, cleanup).await {
                    debug!("host {}: cleanup skipped: {}", self.host, e);
                }
            }
        }

        info!(
            "host {}: deployment succeeded after {} attempt(s)",
            self.host, self.attempts
        );
        self.outcome(started)
    }

    /// Execute one step's action, retrying transient failures with
    /// exponential backoff until the retry budget is exhausted
    async fn run_step(&mut self, step: &PlanStep, started: Instant) -> StepOutcome {
        let limit = self.options.retry.retry_limit;
        let mut attempt: u32 = 1;

        loop {
            if attempt > 1 {
                self.attempts += 1;
            }
            if self.check_cancelled() {
                self.record(
                    step.state,
                    attempt,
                    ErrorKind::Cancelled,
                    "operation cancelled".to_string(),
                );
                return StepOutcome::Fail;
            }

            let result = if started.elapsed() >= self.options.deadlines.per_host {
                Err(ExecutionError::Transient(
                    "per-host deadline exceeded".to_string(),
                ))
            } else if step.state == HostState::Verifying {
                self.verify_window(&step.action, started).await
            } else {
                self.execute_with_timeout(&step.action).await
            };

            match result {
                Ok(result) => return StepOutcome::Done(result.into_probe()),
                Err(ExecutionError::Permanent(message)) => {
                    self.record(step.state, attempt, ErrorKind::Permanent, message);
                    return StepOutcome::Fail;
                }
                Err(ExecutionError::Cancelled) => {
                    self.cancelled = true;
                    self.record(
                        step.state,
                        attempt,
                        ErrorKind::Cancelled,
                        "operation cancelled".to_string(),
                    );
                    return StepOutcome::Fail;
                }
                Err(ExecutionError::Transient(message)) => {
                    self.record(step.state, attempt, ErrorKind::Transient, message);
                    if attempt > limit {
                        warn!(
                            "host {}: {} failed after {} attempt(s)",
                            self.host, step.state, attempt
                        );
                        return StepOutcome::Fail;
                    }
                    let delay = self.options.retry.backoff_delay(attempt);
                    if started.elapsed() < self.options.deadlines.per_host {
                        debug!(
                            "host {}: retrying {} in {:?}",
                            self.host, step.state, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Poll the health probe until it reports healthy or the verify
    /// window closes; a closed window is one transient failure
    async fn verify_window(
        &mut self,
        action: &HostAction,
        started: Instant,
    ) -> Result<ActionResult, ExecutionError> {
        let window = Instant::now();
        loop {
            if self.check_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            match self.execute_with_timeout(action).await {
                Ok(ActionResult::Health(probe)) if probe.healthy => {
                    return Ok(ActionResult::Health(probe));
                }
                Ok(_) => {} // not healthy yet, keep polling
                Err(err) => return Err(err),
            }
            if window.elapsed() >= self.options.deadlines.verify_timeout
                || started.elapsed() >= self.options.deadlines.per_host
            {
                return Err(ExecutionError::Transient(format!(
                    "service not healthy within {:?}",
                    self.options.deadlines.verify_timeout
                )));
            }
            tokio::time::sleep(self.options.deadlines.verify_poll_interval).await;
        }
    }

    async fn execute_with_timeout(
        &self,
        action: &HostAction,
    ) -> Result<ActionResult, ExecutionError> {
        let limit = self.options.deadlines.per_transition;
        match tokio::time::timeout(limit, self.executor.execute(&self.host, action)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Transient(format!(
                "action timed out after {:?}",
                limit
            ))),
        }
    }

    /// Terminate as Failed, rolling back to the previous version when the
    /// plan carries one and policy allows
    async fn fail(mut self, started: Instant) -> DeploymentOutcome {
        let reason = self
            .errors
            .last()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "unknown failure".to_string());
        self.transition(HostEvent::Fail(reason));

        if self.cancelled || !self.options.rollback_on_failure {
            return self.outcome(started);
        }

        if self.plan.rollback.is_empty() {
            self.record(
                HostState::Failed,
                1,
                ErrorKind::RollbackUnavailable,
                "no previous version recorded".to_string(),
            );
            return self.outcome(started);
        }

        info!("host {}: rolling back to previous version", self.host);
        let actions = self.plan.rollback.clone();
        let mut restored = true;
        for action in &actions {
            if !self.run_rollback_action(action).await {
                restored = false;
                break;
            }
        }

        if restored {
            self.transition(HostEvent::Rollback);
            info!("host {}: rollback complete", self.host);
        } else {
            warn!("host {}: rollback failed, host left as failed", self.host);
        }
        self.outcome(started)
    }

    async fn run_rollback_action(&mut self, action: &HostAction) -> bool {
        let limit = self.options.retry.retry_limit;
        let mut attempt: u32 = 1;

        loop {
            if attempt > 1 {
                self.attempts += 1;
            }
            match self.execute_with_timeout(action).await {
                Ok(_) => return true,
                Err(ExecutionError::Permanent(message)) => {
                    self.record(HostState::Failed, attempt, ErrorKind::Permanent, message);
                    return false;
                }
                Err(ExecutionError::Cancelled) => {
                    self.cancelled = true;
                    self.record(
                        HostState::Failed,
                        attempt,
                        ErrorKind::Cancelled,
                        "operation cancelled".to_string(),
                    );
                    return false;
                }
                Err(ExecutionError::Transient(message)) => {
                    self.record(HostState::Failed, attempt, ErrorKind::Transient, message);
                    if attempt > limit {
                        return false;
                    }
                    tokio::time::sleep(self.options.retry.backoff_delay(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Cooperative cancellation: the in-flight action always finishes,
    /// the machine checks between transitions and between health polls
    fn check_cancelled(&mut self) -> bool {
        if self.cancelled {
            return true;
        }
        match self.cancel.try_recv() {
            Ok(()) | Err(TryRecvError::Lagged(_)) => {
                self.cancelled = true;
                true
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => false,
        }
    }

    fn transition(&mut self, event: HostEvent) {
        let from = self.fsm.state();
        if let Err(err) = self.fsm.process(event) {
            error!("host {}: {}", self.host, err);
            return;
        }
        let _ = self.events.send(ProgressEvent {
            host: self.host.clone(),
            from,
            to: self.fsm.state(),
            timestamp: Utc::now(),
        });
    }

    fn record(&mut self, state: HostState, attempt: u32, kind: ErrorKind, message: String) {
        warn!(
            "host {}: {} attempt {} failed: {}",
            self.host, state, attempt, message
        );
        self.errors.push(ErrorRecord {
            state,
            attempt,
            kind,
            message,
            timestamp: Utc::now(),
        });
    }

    fn outcome(&self, started: Instant) -> DeploymentOutcome {
        DeploymentOutcome {
            host: self.host.clone(),
            final_state: self.fsm.state(),
            attempts: self.attempts,
            errors: self.errors.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
