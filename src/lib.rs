// Domain model and persistence
pub mod types;
pub mod model;
pub mod error;
pub mod db;
pub mod secrets;
pub mod config;

// Routing, execution and accounting
pub mod placement;
pub mod service_url;
pub mod container;
pub mod worker_client;
pub mod rotation;
pub mod resources;
pub mod envelope;
pub mod api;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types and functions
pub use api::{AppState, create_router};
pub use config::{NodeArgs, NodeConfig, NodeRole};
pub use db::{DatabaseConfig, SurrealEnvironmentStore, create_connection, ensure_schema};
pub use error::{ApiError, ErrorCode};
pub use model::{Environment, EnvironmentStatus, PlacementDomain, WorkerServer};
pub use types::{EnvironmentId, WorkerServerId};

use std::sync::Arc;

use anyhow::Result;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};

use container::{DockerRuntime, LocalExecEngine};
use placement::PlacementResolver;
use resources::{GpuAccountant, GpuProbe, NvidiaSmiProbe, StaticGpuProbe};
use rotation::{PasswordPolicy, RotationCoordinator};
use secrets::SecretsCrypto;
use worker_client::HttpWorkerClient;

/// GPU probe for this node: the configured override, or `nvidia-smi`.
pub fn gpu_probe(config: &NodeConfig) -> Arc<dyn GpuProbe> {
    match config.gpu_count {
        Some(count) => Arc::new(StaticGpuProbe(count)),
        None => Arc::new(NvidiaSmiProbe::default()),
    }
}

/// Wire the production collaborators into the shared API state.
pub fn create_app_state(config: &NodeConfig, store: SurrealEnvironmentStore) -> Result<AppState> {
    let store = Arc::new(store);
    let crypto = Arc::new(SecretsCrypto::new(config.secret_key.clone())?);
    let workers = Arc::new(HttpWorkerClient::new(
        config.worker_api_token.clone(),
        config.worker_timeout,
    )?);
    let runtime = Arc::new(DockerRuntime::connect(config.docker_socket.as_deref())?);

    let placement =
        PlacementResolver::new(store.clone(), workers.clone(), config.worker_health_timeout);
    let rotation = RotationCoordinator::new(
        store.clone(),
        placement.clone(),
        LocalExecEngine::new(runtime),
        workers.clone(),
        crypto,
        PasswordPolicy::with_min_length(config.password_min_length),
    );
    let gpu = GpuAccountant::new(store.clone(), gpu_probe(config), workers, config.worker_timeout);

    Ok(AppState {
        role: config.role,
        store,
        placement,
        rotation: Arc::new(rotation),
        gpu,
        public_base_url: config.public_base_url.clone(),
        worker_token_digest: config
            .worker_api_token
            .as_ref()
            .map(|token| Sha256::digest(token.expose_secret().as_bytes()).to_vec()),
    })
}
