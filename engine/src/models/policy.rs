//! Deployment policies
//!
//! Explicit value objects passed into the planner, the per-host machines
//! and the fleet coordinator.

use std::time::Duration;

/// Fleet-level batching policy
#[derive(Debug, Clone, Copy)]
pub struct FleetPolicy {
    /// Maximum hosts deployed concurrently within one batch
    pub max_parallel: usize,

    /// Fraction of the fleet placed in the first (canary) batch
    pub canary_fraction: f64,
}

impl Default for FleetPolicy {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            canary_fraction: 0.2,
        }
    }
}

/// Retry policy for transient transition failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries per transition after the first attempt
    pub retry_limit: u32,

    /// Base backoff delay
    pub base_delay: Duration,

    /// Maximum backoff delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Backoff delay before retrying after failed attempt `attempt` (1-based):
    /// base * 2^(attempt - 1), capped at max_delay.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay.as_secs_f64() * 2f64.powi(exp as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Fleet abort policy evaluated after each batch
#[derive(Debug, Clone, Copy)]
pub struct AbortPolicy {
    /// Abort when the batch failure fraction is strictly above this value
    pub failure_threshold: f64,

    /// Roll back already-succeeded hosts when the deployment aborts
    pub rollback_on_abort: bool,
}

impl Default for AbortPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            rollback_on_abort: false,
        }
    }
}

/// Timeout configuration for per-host execution
#[derive(Debug, Clone, Copy)]
pub struct DeadlineOptions {
    /// Timeout for a single executor action
    pub per_transition: Duration,

    /// Overall deadline for one host's deployment
    pub per_host: Duration,

    /// Window within which a started service must report healthy
    pub verify_timeout: Duration,

    /// Interval between health polls while verifying
    pub verify_poll_interval: Duration,
}

impl Default for DeadlineOptions {
    fn default() -> Self {
        Self {
            per_transition: Duration::from_secs(60),
            per_host: Duration::from_secs(600),
            verify_timeout: Duration::from_secs(60),
            verify_poll_interval: Duration::from_secs(2),
        }
    }
}
