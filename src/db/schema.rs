use serde::{Deserialize, Serialize};

use crate::model::{Environment, EnvironmentStatus, WorkerServer};
use crate::types::{EnvironmentId, WorkerServerId};

/// Persisted representation of an environment (table: `environment`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    /// Stable public identifier; the same value is used on workers.
    pub uid: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub gpu_indices: Vec<i64>,
    /// Owning worker's `uid`, or none for host-local environments.
    pub worker_server_id: Option<String>,
    /// Display field, always the redaction placeholder.
    pub root_password: String,
    pub root_password_encrypted: Option<String>,
}

impl From<EnvironmentRecord> for Environment {
    fn from(record: EnvironmentRecord) -> Self {
        Environment {
            id: EnvironmentId::new(record.uid),
            name: record.name,
            status: EnvironmentStatus::from(record.status),
            // Negative indices cannot name a device; drop them rather than wrap.
            gpu_indices: record
                .gpu_indices
                .into_iter()
                .filter_map(|i| u32::try_from(i).ok())
                .collect(),
            worker_server_id: record.worker_server_id.map(WorkerServerId::new),
            root_password: record.root_password,
            root_password_encrypted: record.root_password_encrypted,
        }
    }
}

impl From<&Environment> for EnvironmentRecord {
    fn from(env: &Environment) -> Self {
        EnvironmentRecord {
            uid: env.id.to_string(),
            name: env.name.clone(),
            status: env.status.to_string(),
            gpu_indices: env.gpu_indices.iter().map(|i| i64::from(*i)).collect(),
            worker_server_id: env.worker_server_id.as_ref().map(|w| w.to_string()),
            root_password: env.root_password.clone(),
            root_password_encrypted: env.root_password_encrypted.clone(),
        }
    }
}

/// Persisted representation of a worker (table: `worker_server`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerServerRecord {
    pub uid: String,
    pub name: String,
    pub base_url: String,
}

impl From<WorkerServerRecord> for WorkerServer {
    fn from(record: WorkerServerRecord) -> Self {
        WorkerServer {
            id: WorkerServerId::new(record.uid),
            name: record.name,
            base_url: record.base_url,
        }
    }
}

impl From<&WorkerServer> for WorkerServerRecord {
    fn from(worker: &WorkerServer) -> Self {
        WorkerServerRecord {
            uid: worker.id.to_string(),
            name: worker.name.clone(),
            base_url: worker.base_url.clone(),
        }
    }
}
