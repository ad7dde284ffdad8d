//! Per-host machine tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use fleetward::deploy::executor::ExecutionError;
use fleetward::deploy::fsm::HostState;
use fleetward::deploy::machine::{HostMachine, MachineOptions};
use fleetward::deploy::planner;
use fleetward::models::descriptor::{HostId, ServiceDescriptor};
use fleetward::models::plan::DeploymentPlan;
use fleetward::models::report::{DeploymentOutcome, ErrorKind, ProgressEvent};
use fleetward::models::policy::FleetPolicy;

use common::{container_descriptor, hosts, quick_machine_options, MockExecutor};

fn build_plan(descriptor: &ServiceDescriptor) -> Arc<DeploymentPlan> {
    Arc::new(planner::plan(descriptor, &FleetPolicy::default()).unwrap())
}

async fn run_machine(
    plan: Arc<DeploymentPlan>,
    executor: Arc<MockExecutor>,
    options: MachineOptions,
    cancel_first: bool,
) -> (DeploymentOutcome, Vec<ProgressEvent>) {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = broadcast::channel(1);
    let machine = HostMachine::new(
        HostId::new("h1"),
        plan,
        executor,
        options,
        event_tx,
        cancel_rx,
    );
    if cancel_first {
        cancel_tx.send(()).unwrap();
    }
    let outcome = machine.run().await;

    let mut events = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        events.push(event);
    }
    (outcome, events)
}

#[tokio::test]
async fn test_fresh_host_succeeds() {
    let descriptor = container_descriptor(hosts(1));
    let executor = MockExecutor::new();

    let (outcome, events) = run_machine(
        build_plan(&descriptor),
        executor.clone(),
        quick_machine_options(),
        false,
    )
    .await;

    assert_eq!(outcome.final_state, HostState::Succeeded);
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.errors.is_empty());
    assert_eq!(executor.running_version("h1").as_deref(), Some("2.0.0"));

    assert_eq!(
        executor.actions_for("h1"),
        vec![
            "query_health",   // validate
            "run_command",    // runtime check
            "stop_container",
            "pull_image",
            "start_container",
            "query_health",   // verify
            "run_command",    // cleanup
        ]
    );

    assert_eq!(events.first().map(|e| (e.from, e.to)), Some((HostState::Pending, HostState::Validating)));
    assert_eq!(events.last().map(|e| e.to), Some(HostState::Succeeded));
}

#[tokio::test]
async fn test_transient_verify_failures_then_success() {
    let descriptor = container_descriptor(hosts(1));
    let executor = MockExecutor::new();
    // First probe (validating) succeeds, then three transient failures
    // while verifying, then the probe works again
    executor.script_responses(
        "h1",
        "query_health",
        vec![
            None,
            Some(ExecutionError::Transient("connection reset".to_string())),
            Some(ExecutionError::Transient("connection reset".to_string())),
            Some(ExecutionError::Transient("connection reset".to_string())),
        ],
    );

    let (outcome, _) = run_machine(
        build_plan(&descriptor),
        executor.clone(),
        quick_machine_options(),
        false,
    )
    .await;

    assert_eq!(outcome.final_state, HostState::Succeeded);
    assert_eq!(outcome.attempts, 4);
    assert_eq!(outcome.errors.len(), 3);
    assert!(outcome
        .errors
        .iter()
        .all(|e| e.kind == ErrorKind::Transient && e.state == HostState::Verifying));
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let descriptor = container_descriptor(hosts(1));
    let executor = MockExecutor::new();
    executor.script_responses(
        "h1",
        "pull_image",
        vec![Some(ExecutionError::Permanent("access denied".to_string()))],
    );

    let mut options = quick_machine_options();
    options.rollback_on_failure = false;

    let (outcome, _) = run_machine(build_plan(&descriptor), executor.clone(), options, false).await;

    assert_eq!(outcome.final_state, HostState::Failed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].kind, ErrorKind::Permanent);
    assert_eq!(outcome.errors[0].state, HostState::Updating);
    // Nothing was started after the failed pull
    assert!(!executor.actions_for("h1").contains(&"start_container".to_string()));
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_the_host() {
    let descriptor = container_descriptor(hosts(1));
    let executor = MockExecutor::new();
    executor.script_responses(
        "h1",
        "pull_image",
        vec![
            Some(ExecutionError::Transient("registry timeout".to_string())),
            Some(ExecutionError::Transient("registry timeout".to_string())),
            Some(ExecutionError::Transient("registry timeout".to_string())),
            Some(ExecutionError::Transient("registry timeout".to_string())),
        ],
    );

    let mut options = quick_machine_options();
    options.rollback_on_failure = false;

    let (outcome, _) = run_machine(build_plan(&descriptor), executor.clone(), options, false).await;

    assert_eq!(outcome.final_state, HostState::Failed);
    // 1 initial attempt + 3 retries
    assert_eq!(outcome.attempts, 4);
    assert_eq!(outcome.errors.len(), 4);
}

#[tokio::test]
async fn test_failed_host_rolls_back_to_previous_version() {
    let descriptor = container_descriptor(hosts(1));
    let executor = MockExecutor::new();
    executor.script_responses(
        "h1",
        "start_container",
        vec![Some(ExecutionError::Permanent("invalid mount".to_string()))],
    );

    let (outcome, events) = run_machine(
        build_plan(&descriptor),
        executor.clone(),
        quick_machine_options(),
        false,
    )
    .await;

    assert_eq!(outcome.final_state, HostState::RolledBack);
    // The rollback action restored the previous version
    assert_eq!(executor.running_version("h1").as_deref(), Some("1.9.3"));
    assert_eq!(events.last().map(|e| (e.from, e.to)), Some((HostState::Failed, HostState::RolledBack)));
}

#[tokio::test]
async fn test_rollback_unavailable_without_previous_version() {
    let mut descriptor = container_descriptor(hosts(1));
    descriptor.previous_version = None;
    let executor = MockExecutor::new();
    executor.script_responses(
        "h1",
        "start_container",
        vec![Some(ExecutionError::Permanent("invalid mount".to_string()))],
    );

    let (outcome, _) = run_machine(
        build_plan(&descriptor),
        executor.clone(),
        quick_machine_options(),
        false,
    )
    .await;

    assert_eq!(outcome.final_state, HostState::Failed);
    assert_eq!(
        outcome.errors.last().map(|e| e.kind),
        Some(ErrorKind::RollbackUnavailable)
    );
}

#[tokio::test]
async fn test_converged_host_skips_mutating_steps() {
    let descriptor = container_descriptor(hosts(1));
    let executor = MockExecutor::new();
    executor.set_running("h1", "2.0.0");

    let (outcome, _) = run_machine(
        build_plan(&descriptor),
        executor.clone(),
        quick_machine_options(),
        false,
    )
    .await;

    assert_eq!(outcome.final_state, HostState::Succeeded);
    let actions = executor.actions_for("h1");
    assert!(!actions.contains(&"stop_container".to_string()));
    assert!(!actions.contains(&"pull_image".to_string()));
    assert!(!actions.contains(&"start_container".to_string()));
    // Health is still verified even when nothing changed
    assert_eq!(
        actions.iter().filter(|kind| *kind == "query_health").count(),
        2
    );
}

#[tokio::test]
async fn test_cancellation_fails_without_starting_work() {
    let descriptor = container_descriptor(hosts(1));
    let executor = MockExecutor::new();

    let (outcome, _) = run_machine(
        build_plan(&descriptor),
        executor.clone(),
        quick_machine_options(),
        true,
    )
    .await;

    assert_eq!(outcome.final_state, HostState::Failed);
    assert_eq!(outcome.errors.first().map(|e| e.kind), Some(ErrorKind::Cancelled));
    assert!(executor.actions_for("h1").is_empty());
}

#[tokio::test]
async fn test_hung_action_times_out_as_transient() {
    let descriptor = container_descriptor(hosts(1));
    let executor = MockExecutor::new();
    executor.hang_times("h1", "pull_image", 5);

    let mut options = quick_machine_options();
    options.retry.retry_limit = 1;
    options.deadlines.per_transition = Duration::from_millis(50);
    options.rollback_on_failure = false;

    let (outcome, _) = run_machine(build_plan(&descriptor), executor.clone(), options, false).await;

    assert_eq!(outcome.final_state, HostState::Failed);
    assert_eq!(outcome.attempts, 2);
    assert!(outcome.errors.iter().all(|e| e.kind == ErrorKind::Transient));
    assert!(outcome.errors[0].message.contains("timed out"));
}

#[tokio::test]
async fn test_exhausted_host_deadline_fails_fast() {
    let descriptor = container_descriptor(hosts(1));
    let executor = MockExecutor::new();

    let mut options = quick_machine_options();
    options.deadlines.per_host = Duration::from_millis(0);
    options.rollback_on_failure = false;

    let (outcome, _) = run_machine(build_plan(&descriptor), executor.clone(), options, false).await;

    assert_eq!(outcome.final_state, HostState::Failed);
    assert!(outcome
        .errors
        .iter()
        .all(|e| e.message.contains("per-host deadline exceeded")));
    // The deadline gate fires before any executor call
    assert!(executor.actions_for("h1").is_empty());
}
