//! Deployment invocation options

use std::path::PathBuf;

use crate::deploy::machine::MachineOptions;
use crate::deploy::shell::ShellOptions;
use crate::models::descriptor::Environment;
use crate::models::policy::{AbortPolicy, FleetPolicy};

/// Default catalog location
pub const DEFAULT_CATALOG_PATH: &str = "/etc/fleetward/catalog.json";

/// Options for one deployment invocation
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Target environment
    pub environment: Environment,

    /// Service name as declared in the catalog
    pub service: String,

    /// Path to the service catalog
    pub catalog_path: PathBuf,

    /// Registry override applied on top of the catalog entry
    pub registry_override: Option<String>,

    /// Batching policy
    pub fleet: FleetPolicy,

    /// Fleet abort policy
    pub abort: AbortPolicy,

    /// Per-host machine options
    pub machine: MachineOptions,

    /// Shell executor options
    pub shell: ShellOptions,

    /// Plan and validate only; no host actions
    pub dry_run: bool,
}

impl DeployOptions {
    pub fn new(environment: Environment, service: impl Into<String>) -> Self {
        Self {
            environment,
            service: service.into(),
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            registry_override: None,
            fleet: FleetPolicy::default(),
            abort: AbortPolicy::default(),
            machine: MachineOptions::default(),
            shell: ShellOptions::default(),
            dry_run: false,
        }
    }
}
