//! Service descriptors and host identities

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Qa,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Qa => "qa",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "qa" => Ok(Environment::Qa),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {} (expected dev, qa or prod)", s)),
        }
    }
}

/// Kind of service being deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Containerized service managed through a container runtime
    Container,

    /// Long-running process managed through systemd units
    SystemProcess,
}

/// A target host: address plus an optional login user
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostId {
    pub address: String,
    pub user: Option<String>,
}

impl HostId {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: None,
        }
    }

    pub fn with_user(address: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: Some(user.into()),
        }
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user {
            Some(user) => write!(f, "{}@{}", user, self.address),
            None => f.write_str(&self.address),
        }
    }
}

impl std::str::FromStr for HostId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Host address is empty".to_string());
        }
        match s.split_once('@') {
            Some((user, address)) if !user.is_empty() && !address.is_empty() => {
                Ok(HostId::with_user(address, user))
            }
            Some(_) => Err(format!("Invalid host: {}", s)),
            None => Ok(HostId::new(s)),
        }
    }
}

impl Serialize for HostId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HostId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Health check configuration for a service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Optional command run on the host; exit code 0 means healthy.
    /// When absent, the runtime status of the container/unit is used.
    #[serde(default)]
    pub command: Option<String>,
}

/// Concrete deployment descriptor for one service in one environment.
///
/// Immutable once planning begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service name, also used as container/unit name
    pub service_name: String,

    /// Kind of service
    pub kind: ServiceKind,

    /// Version to deploy
    pub version: String,

    /// Previously deployed version, used for rollback
    #[serde(default)]
    pub previous_version: Option<String>,

    /// Target fleet, in deployment order
    pub target_hosts: Vec<HostId>,

    /// Resolved configuration key/value mapping
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// Health check specification
    #[serde(default)]
    pub health_check: HealthCheck,
}

/// Config keys consumed by the planner rather than passed to the service
pub const RESERVED_CONFIG_KEYS: [&str; 3] = ["image", "registry", "unit_template"];

impl ServiceDescriptor {
    pub fn image(&self) -> Option<&str> {
        self.config.get("image").map(String::as_str)
    }

    pub fn registry(&self) -> Option<&str> {
        self.config.get("registry").map(String::as_str)
    }

    pub fn unit_template(&self) -> Option<&str> {
        self.config.get("unit_template").map(String::as_str)
    }

    /// Fully qualified image reference for the given version
    pub fn image_ref(&self, version: &str) -> Option<String> {
        Some(format!("{}/{}:{}", self.registry()?, self.image()?, version))
    }

    /// Systemd unit name for this service
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.service_name)
    }

    /// Environment variables handed to the running service
    pub fn runtime_env(&self) -> BTreeMap<String, String> {
        self.config
            .iter()
            .filter(|(key, _)| !RESERVED_CONFIG_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}
