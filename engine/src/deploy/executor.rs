//! Host executor capability
//!
//! The engine is polymorphic over this trait: an executor performs one
//! atomic action against one target host and reports the result. The
//! shipped implementation shells out over ssh (see `deploy::shell`);
//! tests inject scripted executors.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::descriptor::{HostId, ServiceKind};

/// Execution failure, classified for retry decisions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Expected to resolve on retry (timeouts, connection resets)
    #[error("transient execution failure: {0}")]
    Transient(String),

    /// Will not resolve on retry (permission, validation)
    #[error("permanent execution failure: {0}")]
    Permanent(String),

    /// Cooperative cancellation honored by the executor
    #[error("operation cancelled")]
    Cancelled,
}

/// One atomic host-level action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    /// Run an arbitrary command on the host
    RunCommand { command: String },

    /// Copy a local file onto the host
    CopyFile { source: String, destination: String },

    /// Probe the service: running state, running version, health
    QueryHealth {
        service: String,
        kind: ServiceKind,
        command: Option<String>,
    },

    /// Pull a container image
    PullImage { image: String },

    /// Start (or replace) a container
    StartContainer {
        name: String,
        image: String,
        env: BTreeMap<String, String>,
    },

    /// Stop and remove a container
    StopContainer { name: String },

    /// Install a systemd unit for the given version
    InstallUnit {
        unit: String,
        contents: String,
        version: String,
    },

    /// Start a systemd unit
    StartUnit { unit: String },

    /// Stop a systemd unit
    StopUnit { unit: String },
}

impl HostAction {
    /// Short human-readable description for plan previews and logs
    pub fn describe(&self) -> String {
        match self {
            HostAction::RunCommand { command } => format!("run `{}`", command),
            HostAction::CopyFile { source, destination } => {
                format!("copy {} to {}", source, destination)
            }
            HostAction::QueryHealth { service, .. } => format!("probe health of {}", service),
            HostAction::PullImage { image } => format!("pull image {}", image),
            HostAction::StartContainer { name, image, .. } => {
                format!("start container {} from {}", name, image)
            }
            HostAction::StopContainer { name } => format!("stop container {}", name),
            HostAction::InstallUnit { unit, version, .. } => {
                format!("install unit {} ({})", unit, version)
            }
            HostAction::StartUnit { unit } => format!("start unit {}", unit),
            HostAction::StopUnit { unit } => format!("stop unit {}", unit),
        }
    }
}

/// Result of a health probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthProbe {
    /// Service is up and passing its health check
    pub healthy: bool,

    /// Version currently running, when discoverable
    pub running_version: Option<String>,

    /// Raw probe detail for logs
    pub detail: Option<String>,
}

/// Result of a successfully executed action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    /// Action completed with no output of interest
    Done,

    /// Action completed and produced output
    Output(String),

    /// Health probe result
    Health(HealthProbe),
}

impl ActionResult {
    pub fn into_probe(self) -> Option<HealthProbe> {
        match self {
            ActionResult::Health(probe) => Some(probe),
            _ => None,
        }
    }
}

/// Capability that performs atomic actions against target hosts.
///
/// Implementations must be safe for concurrent invocation with distinct
/// hosts; machines in one batch share a single executor instance.
#[async_trait]
pub trait HostExecutor: Send + Sync {
    async fn execute(
        &self,
        host: &HostId,
        action: &HostAction,
    ) -> Result<ActionResult, ExecutionError>;
}
