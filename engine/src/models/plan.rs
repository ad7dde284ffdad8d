//! Deployment plans

use crate::deploy::executor::HostAction;
use crate::deploy::fsm::HostState;
use crate::models::descriptor::{HostId, ServiceDescriptor};

/// One step of the per-host pipeline: the state it belongs to and the
/// single executor action that drives it
#[derive(Debug, Clone)]
pub struct PlanStep {
    /// Pipeline state this step runs in
    pub state: HostState,

    /// Executor action invoked for the transition
    pub action: HostAction,

    /// Step changes running state and is skipped on a converged host
    pub mutates: bool,
}

/// Ordered execution plan produced by the planner.
///
/// Every host in the descriptor's target_hosts appears in exactly one
/// batch; batches run sequentially, hosts within a batch concurrently.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    /// Descriptor the plan was built from
    pub descriptor: ServiceDescriptor,

    /// Step template applied to every host
    pub steps: Vec<PlanStep>,

    /// Actions restoring the previous version; empty when none is recorded
    pub rollback: Vec<HostAction>,

    /// Best-effort cleanup run after a successful deployment
    pub cleanup: Option<HostAction>,

    /// Concurrency batches: first batch is the canary
    pub batches: Vec<Vec<HostId>>,
}

impl DeploymentPlan {
    /// Total number of hosts across all batches
    pub fn host_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}
