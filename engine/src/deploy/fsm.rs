//! Finite state machine for one host's deployment

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deployment state of a single host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    /// Initial state, nothing has run yet
    Pending,

    /// Probing the host and the currently running service
    Validating,

    /// Checking prerequisites (runtime present)
    Preparing,

    /// Stopping the old service
    Stopping,

    /// Transferring the new version (image pull / unit install)
    Updating,

    /// Starting the new version
    Starting,

    /// Waiting for the service to report healthy
    Verifying,

    /// Deployment finished successfully
    Succeeded,

    /// Deployment failed
    Failed,

    /// Deployment failed and the previous version was restored
    RolledBack,
}

impl HostState {
    /// Terminal states are never left
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HostState::Succeeded | HostState::Failed | HostState::RolledBack
        )
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostState::Pending => "pending",
            HostState::Validating => "validating",
            HostState::Preparing => "preparing",
            HostState::Stopping => "stopping",
            HostState::Updating => "updating",
            HostState::Starting => "starting",
            HostState::Verifying => "verifying",
            HostState::Succeeded => "succeeded",
            HostState::Failed => "failed",
            HostState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Host deployment event
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// Current step completed, move to the next pipeline state
    Advance,

    /// Unrecoverable error or retry budget exhausted
    Fail(String),

    /// Previous version restored after a failure
    Rollback,
}

/// Per-host deployment FSM
#[derive(Debug, Clone)]
pub struct HostFsm {
    state: HostState,
    error: Option<String>,
}

impl HostFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: HostState::Pending,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> HostState {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: HostEvent) -> Result<(), String> {
        let new_state = match (self.state, &event) {
            // Forward pipeline
            (HostState::Pending, HostEvent::Advance) => HostState::Validating,
            (HostState::Validating, HostEvent::Advance) => HostState::Preparing,
            (HostState::Preparing, HostEvent::Advance) => HostState::Stopping,
            (HostState::Stopping, HostEvent::Advance) => HostState::Updating,
            (HostState::Updating, HostEvent::Advance) => HostState::Starting,
            (HostState::Starting, HostEvent::Advance) => HostState::Verifying,
            (HostState::Verifying, HostEvent::Advance) => HostState::Succeeded,

            // Any active state can fail
            (state, HostEvent::Fail(err))
                if !matches!(state, HostState::Pending) && !state.is_terminal() =>
            {
                self.error = Some(err.clone());
                HostState::Failed
            }

            // A failed host can be restored to its previous version
            (HostState::Failed, HostEvent::Rollback) => HostState::RolledBack,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for HostFsm {
    fn default() -> Self {
        Self::new()
    }
}
