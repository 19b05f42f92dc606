//! In-memory fakes for the persistence and worker seams, shared by tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};

use crate::db::{EnvironmentStore, PendingPasswordUpdate, StoreError, StoreResult};
use crate::model::{Environment, EnvironmentStatus, REDACTED_PASSWORD, WorkerServer};
use crate::types::{EnvironmentId, WorkerServerId};
use crate::worker_client::{WorkerApi, WorkerRequestError};

pub fn environment(
    id: &str,
    status: EnvironmentStatus,
    gpus: &[u32],
    worker: Option<&str>,
) -> Environment {
    Environment {
        id: EnvironmentId::new(id),
        name: "test-env".to_string(),
        status,
        gpu_indices: gpus.iter().copied().collect(),
        worker_server_id: worker.map(WorkerServerId::new),
        root_password: REDACTED_PASSWORD.to_string(),
        root_password_encrypted: None,
    }
}

pub fn worker(id: &str) -> WorkerServer {
    WorkerServer {
        id: WorkerServerId::new(id),
        name: format!("{}-name", id),
        base_url: format!("http://{}:8000", id),
    }
}

#[derive(Default)]
pub struct StoreLog {
    pub begun: Vec<String>,
    pub committed: Vec<String>,
    pub rollbacks: usize,
}

#[derive(Default)]
pub struct FakeStore {
    pub environments: Mutex<HashMap<String, Environment>>,
    pub workers: Mutex<HashMap<String, WorkerServer>>,
    pub fail_begin: bool,
    pub fail_commit: bool,
    pub log: Arc<Mutex<StoreLog>>,
}

impl FakeStore {
    pub fn with(envs: Vec<Environment>, workers: Vec<WorkerServer>) -> Self {
        let store = Self::default();
        for env in envs {
            store.environments.lock().unwrap().insert(env.id.to_string(), env);
        }
        for w in workers {
            store.workers.lock().unwrap().insert(w.id.to_string(), w);
        }
        store
    }

    pub fn committed(&self) -> Vec<String> {
        self.log.lock().unwrap().committed.clone()
    }

    pub fn rollbacks(&self) -> usize {
        self.log.lock().unwrap().rollbacks
    }

    pub fn begun(&self) -> usize {
        self.log.lock().unwrap().begun.len()
    }
}

struct FakePending {
    ciphertext: String,
    fail_commit: bool,
    log: Arc<Mutex<StoreLog>>,
}

#[async_trait]
impl PendingPasswordUpdate for FakePending {
    async fn commit(&mut self) -> StoreResult<()> {
        if self.fail_commit {
            return Err(StoreError::Database("commit refused".to_string()));
        }
        self.log.lock().unwrap().committed.push(self.ciphertext.clone());
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.log.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

#[async_trait]
impl EnvironmentStore for FakeStore {
    async fn get_environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>> {
        Ok(self.environments.lock().unwrap().get(id.as_str()).cloned())
    }

    async fn get_worker(&self, id: &WorkerServerId) -> StoreResult<Option<WorkerServer>> {
        Ok(self.workers.lock().unwrap().get(id.as_str()).cloned())
    }

    async fn list_environments_by_status(
        &self,
        statuses: &[EnvironmentStatus],
    ) -> StoreResult<Vec<Environment>> {
        Ok(self
            .environments
            .lock()
            .unwrap()
            .values()
            .filter(|env| statuses.contains(&env.status))
            .cloned()
            .collect())
    }

    async fn begin_password_update(
        &self,
        _id: &EnvironmentId,
        ciphertext: String,
    ) -> StoreResult<Box<dyn PendingPasswordUpdate>> {
        if self.fail_begin {
            return Err(StoreError::Database("store unavailable".to_string()));
        }
        self.log.lock().unwrap().begun.push(ciphertext.clone());
        Ok(Box::new(FakePending {
            ciphertext,
            fail_commit: self.fail_commit,
            log: self.log.clone(),
        }))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerCall {
    pub worker: String,
    pub method: Method,
    pub path: String,
    pub payload: Option<Value>,
    pub timeout: Option<Duration>,
}

/// Answers health and GPU queries like a live worker and records the rest.
pub struct FakeWorkerApi {
    pub calls: Mutex<Vec<WorkerCall>>,
    pub health: Result<Value, WorkerRequestError>,
    pub gpu: Result<Value, WorkerRequestError>,
    /// Responses for non-health, non-GPU calls, consumed in order; `Ok` once exhausted.
    pub responses: Mutex<Vec<Result<Value, WorkerRequestError>>>,
}

impl Default for FakeWorkerApi {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            health: Ok(json!({"status": "healthy", "role": "worker"})),
            gpu: Ok(json!({"total": 0})),
            responses: Mutex::new(Vec::new()),
        }
    }
}

impl FakeWorkerApi {
    pub fn failing_with(err: WorkerRequestError) -> Self {
        Self {
            responses: Mutex::new(vec![Err(err)]),
            ..Self::default()
        }
    }

    /// Recorded calls other than health checks.
    pub fn commands(&self) -> Vec<WorkerCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.path != "/api/worker/health")
            .cloned()
            .collect()
    }

    /// Number of recorded health checks.
    pub fn health_checks(&self) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.iter().filter(|c| c.path == "/api/worker/health").count()
    }

    /// `new_password` of every recorded rotation payload, in call order.
    pub fn passwords(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter_map(|c| c.payload.as_ref()?.get("new_password")?.as_str().map(String::from))
            .collect()
    }
}

#[async_trait]
impl WorkerApi for FakeWorkerApi {
    async fn call(
        &self,
        worker: &WorkerServer,
        method: Method,
        path: &str,
        payload: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, WorkerRequestError> {
        self.calls.lock().unwrap().push(WorkerCall {
            worker: worker.id.to_string(),
            method,
            path: path.to_string(),
            payload,
            timeout,
        });
        match path {
            "/api/worker/health" => self.health.clone(),
            "/api/worker/gpu" => self.gpu.clone(),
            _ => {
                let mut responses = self.responses.lock().unwrap();
                if responses.is_empty() {
                    Ok(json!({"message": "Root password updated"}))
                } else {
                    responses.remove(0)
                }
            }
        }
    }
}
