#![allow(dead_code)]

//! Shared test fixtures: a scripted, behavioral host executor

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fleetward::deploy::executor::{
    ActionResult, ExecutionError, HealthProbe, HostAction, HostExecutor,
};
use fleetward::deploy::machine::MachineOptions;
use fleetward::models::descriptor::{HealthCheck, HostId, ServiceDescriptor, ServiceKind};
use fleetward::models::policy::{DeadlineOptions, RetryPolicy};

type ActionKey = (String, String);

/// Behavioral mock executor: tracks the running version per host, logs
/// every action, and plays back scripted failures in call order.
#[derive(Default)]
pub struct MockExecutor {
    /// (host, action kind) in invocation order
    pub log: Mutex<Vec<(String, String)>>,

    /// host -> version currently running and healthy
    pub running: Mutex<HashMap<String, String>>,

    /// host -> version staged by install_unit
    pub installed: Mutex<HashMap<String, String>>,

    /// Scripted responses per (host, action kind), consumed per call.
    /// `Some(err)` fails that call, `None` falls through to the behavior.
    pub script: Mutex<HashMap<ActionKey, VecDeque<Option<ExecutionError>>>>,

    /// Remaining calls per (host, action kind) that hang until timed out
    pub hang: Mutex<HashMap<ActionKey, u32>>,
}

impl MockExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_running(&self, host: &str, version: &str) {
        self.running
            .lock()
            .unwrap()
            .insert(host.to_string(), version.to_string());
    }

    pub fn running_version(&self, host: &str) -> Option<String> {
        self.running.lock().unwrap().get(host).cloned()
    }

    /// Queue scripted responses for an action kind on a host
    pub fn script_responses(&self, host: &str, kind: &str, responses: Vec<Option<ExecutionError>>) {
        self.script
            .lock()
            .unwrap()
            .entry((host.to_string(), kind.to_string()))
            .or_default()
            .extend(responses);
    }

    /// Make the next `times` calls of an action kind hang past any timeout
    pub fn hang_times(&self, host: &str, kind: &str, times: u32) {
        self.hang
            .lock()
            .unwrap()
            .insert((host.to_string(), kind.to_string()), times);
    }

    /// Action kinds invoked against one host, in order
    pub fn actions_for(&self, host: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, kind)| kind.clone())
            .collect()
    }

    /// All (host, action kind) pairs in invocation order
    pub fn all_actions(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().clone()
    }

    pub fn kind_of(action: &HostAction) -> &'static str {
        match action {
            HostAction::RunCommand { .. } => "run_command",
            HostAction::CopyFile { .. } => "copy_file",
            HostAction::QueryHealth { .. } => "query_health",
            HostAction::PullImage { .. } => "pull_image",
            HostAction::StartContainer { .. } => "start_container",
            HostAction::StopContainer { .. } => "stop_container",
            HostAction::InstallUnit { .. } => "install_unit",
            HostAction::StartUnit { .. } => "start_unit",
            HostAction::StopUnit { .. } => "stop_unit",
        }
    }

    fn tag_of(image: &str) -> String {
        image
            .rsplit('/')
            .next()
            .and_then(|segment| segment.split_once(':'))
            .map(|(_, tag)| tag.to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl HostExecutor for MockExecutor {
    async fn execute(
        &self,
        host: &HostId,
        action: &HostAction,
    ) -> Result<ActionResult, ExecutionError> {
        let host_key = host.to_string();
        let kind = Self::kind_of(action);
        let key = (host_key.clone(), kind.to_string());
        self.log.lock().unwrap().push(key.clone());

        let should_hang = {
            let mut hang = self.hang.lock().unwrap();
            match hang.get_mut(&key) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let scripted = {
            let mut script = self.script.lock().unwrap();
            script.get_mut(&key).and_then(|queue| queue.pop_front())
        };
        if let Some(Some(err)) = scripted {
            return Err(err);
        }

        match action {
            HostAction::QueryHealth { .. } => {
                let running = self.running.lock().unwrap();
                Ok(ActionResult::Health(HealthProbe {
                    healthy: running.contains_key(&host_key),
                    running_version: running.get(&host_key).cloned(),
                    detail: None,
                }))
            }
            HostAction::StartContainer { image, .. } => {
                self.running
                    .lock()
                    .unwrap()
                    .insert(host_key, Self::tag_of(image));
                Ok(ActionResult::Done)
            }
            HostAction::StopContainer { .. } | HostAction::StopUnit { .. } => {
                self.running.lock().unwrap().remove(&host_key);
                Ok(ActionResult::Done)
            }
            HostAction::InstallUnit { version, .. } => {
                self.installed
                    .lock()
                    .unwrap()
                    .insert(host_key, version.clone());
                Ok(ActionResult::Done)
            }
            HostAction::StartUnit { .. } => {
                let staged = self
                    .installed
                    .lock()
                    .unwrap()
                    .get(&host_key)
                    .cloned()
                    .unwrap_or_default();
                self.running.lock().unwrap().insert(host_key, staged);
                Ok(ActionResult::Done)
            }
            _ => Ok(ActionResult::Done),
        }
    }
}

pub fn hosts(n: usize) -> Vec<HostId> {
    (1..=n).map(|i| HostId::new(format!("h{}", i))).collect()
}

pub fn container_descriptor(hosts: Vec<HostId>) -> ServiceDescriptor {
    let mut config = BTreeMap::new();
    config.insert("image".to_string(), "acme/api".to_string());
    config.insert("registry".to_string(), "registry.acme.io".to_string());
    ServiceDescriptor {
        service_name: "api".to_string(),
        kind: ServiceKind::Container,
        version: "2.0.0".to_string(),
        previous_version: Some("1.9.3".to_string()),
        target_hosts: hosts,
        config,
        health_check: HealthCheck::default(),
    }
}

/// Machine options with millisecond delays so tests run fast
pub fn quick_machine_options() -> MachineOptions {
    MachineOptions {
        retry: RetryPolicy {
            retry_limit: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        deadlines: DeadlineOptions {
            per_transition: Duration::from_secs(5),
            per_host: Duration::from_secs(60),
            verify_timeout: Duration::from_millis(200),
            verify_poll_interval: Duration::from_millis(1),
        },
        rollback_on_failure: true,
    }
}
