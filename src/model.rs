use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::types::{EnvironmentId, WorkerServerId};

/// Fixed value shown in place of the root credential in every API-visible field.
pub const REDACTED_PASSWORD: &str = "__redacted__";

/// Lifecycle state of an environment.
///
/// Only the states this service reasons about get their own variant; anything
/// else written by the lifecycle manager is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvironmentStatus {
    Running,
    Building,
    Stopped,
    Other(String),
}

impl EnvironmentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Building => "building",
            Self::Stopped => "stopped",
            Self::Other(s) => s.as_str(),
        }
    }

    /// Whether an environment in this state holds its GPU reservation.
    pub fn occupies_gpus(&self) -> bool {
        matches!(self, Self::Running | Self::Building)
    }
}

impl From<String> for EnvironmentStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "running" => Self::Running,
            "building" => Self::Building,
            "stopped" => Self::Stopped,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for EnvironmentStatus {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<EnvironmentStatus> for String {
    fn from(value: EnvironmentStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sandbox instance as recorded by the system of record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
    pub status: EnvironmentStatus,
    /// GPU devices reserved inside this environment's placement domain.
    #[serde(default)]
    pub gpu_indices: BTreeSet<u32>,
    /// `None` means host-local placement.
    #[serde(default)]
    pub worker_server_id: Option<WorkerServerId>,
    /// Display field; always [`REDACTED_PASSWORD`].
    pub root_password: String,
    /// The only durable copy of the root credential.
    #[serde(default, skip_serializing)]
    pub root_password_encrypted: Option<String>,
}

impl Environment {
    /// Deterministic runtime name of the backing container.
    pub fn container_name(&self) -> String {
        format!("lyra-{}-{}", self.name, self.id)
    }

    pub fn is_host_local(&self) -> bool {
        self.worker_server_id.is_none()
    }
}

/// A remote execution domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerServer {
    pub id: WorkerServerId,
    pub name: String,
    pub base_url: String,
}

/// The execution context an environment is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlacementDomain {
    Host,
    Worker(WorkerServerId),
}

impl PlacementDomain {
    /// Whether `env` is placed in this domain.
    pub fn contains(&self, env: &Environment) -> bool {
        match (self, env.worker_server_id.as_ref()) {
            (Self::Host, None) => true,
            (Self::Worker(id), Some(assigned)) => id == assigned,
            _ => false,
        }
    }
}

impl fmt::Display for PlacementDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Worker(id) => write!(f, "worker:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(worker: Option<&str>) -> Environment {
        Environment {
            id: EnvironmentId::new("1234"),
            name: "dev".to_string(),
            status: EnvironmentStatus::Running,
            gpu_indices: BTreeSet::new(),
            worker_server_id: worker.map(WorkerServerId::new),
            root_password: REDACTED_PASSWORD.to_string(),
            root_password_encrypted: None,
        }
    }

    #[test]
    fn test_container_name_is_deterministic() {
        assert_eq!(env(None).container_name(), "lyra-dev-1234");
    }

    #[test]
    fn test_status_roundtrips_unknown_values() {
        let status: EnvironmentStatus = serde_json::from_str("\"paused\"").unwrap();
        assert_eq!(status, EnvironmentStatus::Other("paused".to_string()));
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"paused\"");
        assert!(!status.occupies_gpus());
        assert!(EnvironmentStatus::Building.occupies_gpus());
    }

    #[test]
    fn test_domain_membership() {
        let host = PlacementDomain::Host;
        let w1 = PlacementDomain::Worker(WorkerServerId::new("w1"));

        assert!(host.contains(&env(None)));
        assert!(!host.contains(&env(Some("w1"))));
        assert!(w1.contains(&env(Some("w1"))));
        assert!(!w1.contains(&env(Some("w2"))));
        assert!(!w1.contains(&env(None)));
    }

    #[test]
    fn test_ciphertext_is_never_serialized() {
        let mut e = env(None);
        e.root_password_encrypted = Some("ciphertext".to_string());
        let json = serde_json::to_value(&e).unwrap();
        assert!(json.get("root_password_encrypted").is_none());
        assert_eq!(json["root_password"], REDACTED_PASSWORD);
    }
}
