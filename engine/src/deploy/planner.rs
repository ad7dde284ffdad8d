//! Deployment planner
//!
//! Validates a service descriptor and turns it into an ordered execution
//! plan: a per-host step template plus canary-then-rest concurrency
//! batches. No partial plans are returned; validation failures reject the
//! whole descriptor.

use std::collections::HashSet;

use tracing::debug;

use crate::deploy::executor::HostAction;
use crate::deploy::fsm::HostState;
use crate::errors::EngineError;
use crate::models::descriptor::{HostId, ServiceDescriptor, ServiceKind};
use crate::models::plan::{DeploymentPlan, PlanStep};
use crate::models::policy::FleetPolicy;

/// Build a deployment plan for the descriptor under the given fleet policy
pub fn plan(
    descriptor: &ServiceDescriptor,
    policy: &FleetPolicy,
) -> Result<DeploymentPlan, EngineError> {
    validate_policy(policy)?;
    validate(descriptor)?;

    let steps = build_steps(descriptor)?;
    let rollback = build_rollback(descriptor)?;
    let cleanup = build_cleanup(descriptor);
    let batches = build_batches(&descriptor.target_hosts, policy);

    debug!(
        "Planned {} step(s) over {} batch(es) for service {}",
        steps.len(),
        batches.len(),
        descriptor.service_name
    );

    Ok(DeploymentPlan {
        descriptor: descriptor.clone(),
        steps,
        rollback,
        cleanup,
        batches,
    })
}

fn validate_policy(policy: &FleetPolicy) -> Result<(), EngineError> {
    if policy.max_parallel == 0 {
        return Err(EngineError::PolicyError(
            "max_parallel must be at least 1".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&policy.canary_fraction) {
        return Err(EngineError::PolicyError(format!(
            "canary_fraction must be within [0, 1], got {}",
            policy.canary_fraction
        )));
    }
    Ok(())
}

fn validate(descriptor: &ServiceDescriptor) -> Result<(), EngineError> {
    if descriptor.target_hosts.is_empty() {
        return Err(EngineError::InvalidDescriptor(
            "target_hosts is empty".to_string(),
        ));
    }
    if descriptor.version.trim().is_empty() {
        return Err(EngineError::InvalidDescriptor(
            "version is empty".to_string(),
        ));
    }

    let mut seen: HashSet<&HostId> = HashSet::new();
    for host in &descriptor.target_hosts {
        if !seen.insert(host) {
            return Err(EngineError::InvalidDescriptor(format!(
                "duplicate target host: {}",
                host
            )));
        }
    }

    match descriptor.kind {
        ServiceKind::Container => {
            if descriptor.image().unwrap_or("").is_empty() {
                return Err(EngineError::InvalidDescriptor(
                    "container service requires config key 'image'".to_string(),
                ));
            }
            if descriptor.registry().unwrap_or("").is_empty() {
                return Err(EngineError::InvalidDescriptor(
                    "container service requires config key 'registry'".to_string(),
                ));
            }
        }
        ServiceKind::SystemProcess => {
            if descriptor.unit_template().unwrap_or("").is_empty() {
                return Err(EngineError::InvalidDescriptor(
                    "system process service requires config key 'unit_template'".to_string(),
                ));
            }
        }
    }

    Ok(())
}

/// Split the fleet into a canary batch followed by batches of at most
/// max_parallel hosts, preserving target order
fn build_batches(hosts: &[HostId], policy: &FleetPolicy) -> Vec<Vec<HostId>> {
    let total = hosts.len();
    let canary = ((policy.canary_fraction * total as f64).ceil() as usize)
        .max(1)
        .min(policy.max_parallel)
        .min(total);

    let mut batches = vec![hosts[..canary].to_vec()];
    for chunk in hosts[canary..].chunks(policy.max_parallel) {
        batches.push(chunk.to_vec());
    }
    batches
}

fn probe_action(descriptor: &ServiceDescriptor) -> HostAction {
    HostAction::QueryHealth {
        service: descriptor.service_name.clone(),
        kind: descriptor.kind,
        command: descriptor.health_check.command.clone(),
    }
}

fn build_steps(descriptor: &ServiceDescriptor) -> Result<Vec<PlanStep>, EngineError> {
    let probe = probe_action(descriptor);
    let name = descriptor.service_name.clone();

    let steps = match descriptor.kind {
        ServiceKind::Container => {
            let image = descriptor.image_ref(&descriptor.version).ok_or_else(|| {
                EngineError::InvalidDescriptor("missing image or registry".to_string())
            })?;
            vec![
                PlanStep {
                    state: HostState::Validating,
                    action: probe.clone(),
                    mutates: false,
                },
                PlanStep {
                    state: HostState::Preparing,
                    action: HostAction::RunCommand {
                        command: "docker info >/dev/null".to_string(),
                    },
                    mutates: false,
                },
                PlanStep {
                    state: HostState::Stopping,
                    action: HostAction::StopContainer { name: name.clone() },
                    mutates: true,
                },
                PlanStep {
                    state: HostState::Updating,
                    action: HostAction::PullImage {
                        image: image.clone(),
                    },
                    mutates: true,
                },
                PlanStep {
                    state: HostState::Starting,
                    action: HostAction::StartContainer {
                        name,
                        image,
                        env: descriptor.runtime_env(),
                    },
                    mutates: true,
                },
                PlanStep {
                    state: HostState::Verifying,
                    action: probe,
                    mutates: false,
                },
            ]
        }
        ServiceKind::SystemProcess => {
            let unit = descriptor.unit_name();
            vec![
                PlanStep {
                    state: HostState::Validating,
                    action: probe.clone(),
                    mutates: false,
                },
                PlanStep {
                    state: HostState::Preparing,
                    action: HostAction::RunCommand {
                        command: "systemctl --version >/dev/null".to_string(),
                    },
                    mutates: false,
                },
                PlanStep {
                    state: HostState::Stopping,
                    action: HostAction::StopUnit { unit: unit.clone() },
                    mutates: true,
                },
                PlanStep {
                    state: HostState::Updating,
                    action: HostAction::InstallUnit {
                        unit: unit.clone(),
                        contents: render_unit(descriptor, &descriptor.version)?,
                        version: descriptor.version.clone(),
                    },
                    mutates: true,
                },
                PlanStep {
                    state: HostState::Starting,
                    action: HostAction::StartUnit { unit },
                    mutates: true,
                },
                PlanStep {
                    state: HostState::Verifying,
                    action: probe,
                    mutates: false,
                },
            ]
        }
    };

    Ok(steps)
}

/// Actions restoring the previous version; empty when none is recorded
fn build_rollback(descriptor: &ServiceDescriptor) -> Result<Vec<HostAction>, EngineError> {
    let Some(previous) = descriptor.previous_version.as_deref() else {
        return Ok(Vec::new());
    };

    match descriptor.kind {
        ServiceKind::Container => {
            let image = descriptor.image_ref(previous).ok_or_else(|| {
                EngineError::InvalidDescriptor("missing image or registry".to_string())
            })?;
            Ok(vec![HostAction::StartContainer {
                name: descriptor.service_name.clone(),
                image,
                env: descriptor.runtime_env(),
            }])
        }
        ServiceKind::SystemProcess => {
            let unit = descriptor.unit_name();
            Ok(vec![
                HostAction::InstallUnit {
                    unit: unit.clone(),
                    contents: render_unit(descriptor, previous)?,
                    version: previous.to_string(),
                },
                HostAction::StartUnit { unit },
            ])
        }
    }
}

fn build_cleanup(descriptor: &ServiceDescriptor) -> Option<HostAction> {
    match descriptor.kind {
        ServiceKind::Container => Some(HostAction::RunCommand {
            command: "docker image prune -f >/dev/null".to_string(),
        }),
        ServiceKind::SystemProcess => None,
    }
}

/// Unit file contents for a version: the template with the `{version}`
/// token substituted
fn render_unit(descriptor: &ServiceDescriptor, version: &str) -> Result<String, EngineError> {
    let template = descriptor
        .unit_template()
        .ok_or_else(|| EngineError::InvalidDescriptor("missing unit_template".to_string()))?;
    Ok(template.replace("{version}", version))
}
