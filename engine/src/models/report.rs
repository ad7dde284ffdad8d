//! Deployment outcomes and the aggregated report

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::HostState;
use crate::models::descriptor::{HostId, ServiceDescriptor};

/// Classification of a recorded transition failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Cancelled,
    RollbackUnavailable,
}

/// One failed transition attempt on one host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// State whose transition failed
    pub state: HostState,

    /// Attempt number within that transition (1-based)
    pub attempt: u32,

    /// Failure classification
    pub kind: ErrorKind,

    /// Error message
    pub message: String,

    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
}

/// Final result for one host, built once when its machine terminates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    /// Host this outcome belongs to
    pub host: HostId,

    /// Terminal state the machine reached
    pub final_state: HostState,

    /// Total attempts: 1 plus one per retried transition attempt
    pub attempts: u32,

    /// Failures recorded along the way, in order
    pub errors: Vec<ErrorRecord>,

    /// Wall-clock duration of the host deployment
    pub duration_ms: u64,
}

/// A state transition observed on one host
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub host: HostId,
    pub from: HostState,
    pub to: HostState,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated result of a whole deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    AllSucceeded,
    PartialFailure,
    Aborted,
    RolledBack,
}

/// Immutable report returned to the caller after all batches complete
/// or an abort triggers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentReport {
    /// Unique id for this deployment run
    pub deployment_id: String,

    /// Descriptor the deployment was planned from
    pub descriptor: ServiceDescriptor,

    /// Per-host outcomes, keyed by host id
    pub outcomes: BTreeMap<String, DeploymentOutcome>,

    /// Aggregated status
    pub overall: OverallStatus,

    /// When the deployment started
    pub started_at: DateTime<Utc>,

    /// When the deployment finished
    pub finished_at: DateTime<Utc>,
}

impl DeploymentReport {
    /// Process exit code for the CLI: 0 success, 1 partial/aborted, 2 rolled back
    pub fn exit_code(&self) -> i32 {
        match self.overall {
            OverallStatus::AllSucceeded => 0,
            OverallStatus::PartialFailure | OverallStatus::Aborted => 1,
            OverallStatus::RolledBack => 2,
        }
    }
}
