//! Service catalog resolution
//!
//! Turns a service name plus environment into a concrete deployment
//! descriptor. The file-backed resolver reads a JSON document keyed by
//! environment, then by service name:
//!
//! ```json
//! {
//!   "environments": {
//!     "prod": {
//!       "services": {
//!         "billing-api": {
//!           "kind": "container",
//!           "version": "1.4.2",
//!           "previous_version": "1.4.1",
//!           "hosts": ["deploy@10.0.0.11", "deploy@10.0.0.12"],
//!           "config": { "image": "acme/billing-api", "registry": "registry.acme.io" },
//!           "health_check": { "command": "curl -fsS localhost:8080/healthz" }
//!         }
//!       }
//!     }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::errors::EngineError;
use crate::models::descriptor::{Environment, HealthCheck, HostId, ServiceDescriptor, ServiceKind};

/// Capability resolving service names into deployment descriptors
#[async_trait]
pub trait SpecResolver: Send + Sync {
    async fn resolve(
        &self,
        service: &str,
        environment: Environment,
    ) -> Result<ServiceDescriptor, EngineError>;
}

/// Catalog document root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentCatalog>,
}

/// One environment's services
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentCatalog {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceEntry>,
}

/// One service's catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub kind: ServiceKind,

    pub version: String,

    #[serde(default)]
    pub previous_version: Option<String>,

    pub hosts: Vec<HostId>,

    #[serde(default)]
    pub config: BTreeMap<String, String>,

    #[serde(default)]
    pub health_check: HealthCheck,
}

impl ServiceEntry {
    fn into_descriptor(self, name: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            service_name: name.to_string(),
            kind: self.kind,
            version: self.version,
            previous_version: self.previous_version,
            target_hosts: self.hosts,
            config: self.config,
            health_check: self.health_check,
        }
    }
}

/// File-backed service catalog
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<CatalogDocument, EngineError> {
        let contents = fs::read_to_string(&self.path).await?;
        let document = serde_json::from_str(&contents)?;
        Ok(document)
    }
}

#[async_trait]
impl SpecResolver for FileCatalog {
    async fn resolve(
        &self,
        service: &str,
        environment: Environment,
    ) -> Result<ServiceDescriptor, EngineError> {
        debug!(
            "Resolving service '{}' for {} from {}",
            service,
            environment,
            self.path.display()
        );
        let document = self.load().await?;

        let env_catalog = document
            .environments
            .get(environment.as_str())
            .ok_or_else(|| {
                EngineError::NotFound(format!("environment '{}' not in catalog", environment))
            })?;

        let entry = env_catalog.services.get(service).ok_or_else(|| {
            EngineError::NotFound(format!(
                "service '{}' not declared for environment '{}'",
                service, environment
            ))
        })?;

        if entry.hosts.is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "service '{}' has no hosts for environment '{}'",
                service, environment
            )));
        }

        Ok(entry.clone().into_descriptor(service))
    }
}
