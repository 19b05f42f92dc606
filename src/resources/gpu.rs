//! GPU usage snapshot for one placement domain.
//!
//! Indices are domain-local: a query only ever looks at environments placed in
//! the queried domain, so host indices and worker indices are never merged.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::EnvironmentStore;
use crate::error::ApiError;
use crate::model::{EnvironmentStatus, PlacementDomain};
use crate::placement::PlacementResolver;
use crate::resources::probe::GpuProbe;
use crate::types::WorkerServerId;
use crate::worker_client::WorkerApi;

pub const WORKER_GPU_PATH: &str = "/api/worker/gpu";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuResources {
    pub total: u32,
    pub used: u32,
    pub available: u32,
    pub used_indices: Vec<u32>,
    pub available_indices: Vec<u32>,
}

impl GpuResources {
    pub fn from_usage(total: u32, used: &BTreeSet<u32>) -> Self {
        let used_count = used.len() as u32;
        Self {
            total,
            used: used_count,
            available: total.saturating_sub(used_count),
            used_indices: used.iter().copied().collect(),
            available_indices: (0..total).filter(|i| !used.contains(i)).collect(),
        }
    }
}

#[derive(Clone)]
pub struct GpuAccountant {
    store: Arc<dyn EnvironmentStore>,
    probe: Arc<dyn GpuProbe>,
    workers: Arc<dyn WorkerApi>,
    worker_timeout: Duration,
}

impl GpuAccountant {
    pub fn new(
        store: Arc<dyn EnvironmentStore>,
        probe: Arc<dyn GpuProbe>,
        workers: Arc<dyn WorkerApi>,
        worker_timeout: Duration,
    ) -> Self {
        Self {
            store,
            probe,
            workers,
            worker_timeout,
        }
    }

    pub async fn get_gpu_resources(
        &self,
        domain: &PlacementDomain,
    ) -> Result<GpuResources, ApiError> {
        let occupying = self
            .store
            .list_environments_by_status(&[EnvironmentStatus::Running, EnvironmentStatus::Building])
            .await
            .map_err(|e| {
                warn!(
                    domain = %domain,
                    error = %e,
                    "Failed to list environments for GPU accounting"
                );
                ApiError::internal("Failed to load environments")
            })?;

        let used: BTreeSet<u32> = occupying
            .iter()
            .filter(|env| env.status.occupies_gpus() && PlacementResolver::in_domain(env, domain))
            .flat_map(|env| env.gpu_indices.iter().copied())
            .collect();

        let total = match domain {
            PlacementDomain::Host => self.probe.device_count().await,
            PlacementDomain::Worker(id) => self.worker_device_count(id).await,
        };

        let resources = GpuResources::from_usage(total, &used);
        debug!(domain = %domain, total, used = resources.used, "GPU snapshot");
        Ok(resources)
    }

    /// Device count as reported by the worker itself; 0 on any failure.
    async fn worker_device_count(&self, id: &WorkerServerId) -> u32 {
        let worker = match self.store.get_worker(id).await {
            Ok(Some(worker)) => worker,
            Ok(None) => {
                warn!(worker_id = %id, "GPU query for unregistered worker");
                return 0;
            }
            Err(e) => {
                warn!(worker_id = %id, error = %e, "Worker lookup failed");
                return 0;
            }
        };

        match self
            .workers
            .call(&worker, Method::GET, WORKER_GPU_PATH, None, Some(self.worker_timeout))
            .await
        {
            Ok(data) => data
                .get("total")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
            Err(e) => {
                warn!(
                    worker = %worker.name,
                    code = %e.code,
                    "Worker GPU query failed, reporting 0 devices"
                );
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::probe::StaticGpuProbe;
    use crate::testing::{FakeStore, FakeWorkerApi, environment, worker};
    use crate::worker_client::WorkerRequestError;
    use serde_json::json;

    fn accountant(store: FakeStore, total: u32, api: FakeWorkerApi) -> GpuAccountant {
        GpuAccountant::new(
            Arc::new(store),
            Arc::new(StaticGpuProbe(total)),
            Arc::new(api),
            Duration::from_secs(5),
        )
    }

    fn mixed_store() -> FakeStore {
        FakeStore::with(
            vec![
                environment("a", EnvironmentStatus::Running, &[0], None),
                environment("b", EnvironmentStatus::Building, &[2], None),
                environment("c", EnvironmentStatus::Running, &[1], Some("w1")),
                environment("d", EnvironmentStatus::Stopped, &[3], None),
            ],
            vec![worker("w1")],
        )
    }

    #[tokio::test]
    async fn test_host_domain_excludes_worker_and_stopped_environments() {
        let gpu = accountant(mixed_store(), 4, FakeWorkerApi::default())
            .get_gpu_resources(&PlacementDomain::Host)
            .await
            .unwrap();

        assert_eq!(gpu.total, 4);
        assert_eq!(gpu.used, 2);
        assert_eq!(gpu.available, 2);
        assert_eq!(gpu.used_indices, vec![0, 2]);
        assert_eq!(gpu.available_indices, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_duplicate_indices_count_once() {
        let store = FakeStore::with(
            vec![
                environment("a", EnvironmentStatus::Running, &[0, 1], None),
                environment("b", EnvironmentStatus::Running, &[1], None),
            ],
            vec![],
        );
        let gpu = accountant(store, 2, FakeWorkerApi::default())
            .get_gpu_resources(&PlacementDomain::Host)
            .await
            .unwrap();
        assert_eq!(gpu.used, 2);
        assert_eq!(gpu.available, 0);
        assert!(gpu.available_indices.is_empty());
    }

    #[tokio::test]
    async fn test_no_driver_means_zero_total() {
        let gpu = accountant(mixed_store(), 0, FakeWorkerApi::default())
            .get_gpu_resources(&PlacementDomain::Host)
            .await
            .unwrap();
        assert_eq!(gpu.total, 0);
        assert_eq!(gpu.used, 2);
        assert_eq!(gpu.available, 0);
        assert!(gpu.available_indices.is_empty());
    }

    #[tokio::test]
    async fn test_worker_domain_uses_worker_total_and_its_environments() {
        let api = FakeWorkerApi {
            gpu: Ok(json!({"total": 2, "used": 0})),
            ..FakeWorkerApi::default()
        };
        let gpu = accountant(mixed_store(), 4, api)
            .get_gpu_resources(&PlacementDomain::Worker(WorkerServerId::new("w1")))
            .await
            .unwrap();

        assert_eq!(gpu.total, 2);
        assert_eq!(gpu.used_indices, vec![1]);
        assert_eq!(gpu.available_indices, vec![0]);
    }

    #[tokio::test]
    async fn test_unreachable_worker_degrades_to_zero() {
        let api = FakeWorkerApi {
            gpu: Err(WorkerRequestError::unreachable("down")),
            ..FakeWorkerApi::default()
        };
        let gpu = accountant(mixed_store(), 4, api)
            .get_gpu_resources(&PlacementDomain::Worker(WorkerServerId::new("w1")))
            .await
            .unwrap();
        assert_eq!(gpu.total, 0);
        assert_eq!(gpu.used, 1);
    }
}
