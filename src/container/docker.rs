//! [`ContainerRuntime`] backed by the Docker Engine API.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::InspectContainerOptions;
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{ContainerInfo, ContainerRuntime, RuntimeError};

const DOCKER_TIMEOUT_SECS: u64 = 120;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the daemon at `socket`, or the platform default when `None`.
    pub fn connect(socket: Option<&str>) -> anyhow::Result<Self> {
        let docker = match socket {
            Some(path) => Docker::connect_with_socket(
                path,
                DOCKER_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )?,
            None => Docker::connect_with_local_defaults()?,
        };
        info!(socket = socket.unwrap_or("default"), "Docker runtime configured");
        Ok(Self { docker })
    }
}

fn map_docker_error(err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound,
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn get_container(&self, name: &str) -> Result<ContainerInfo, RuntimeError> {
        let inspect = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(map_docker_error)?;

        let running = inspect
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        let id = inspect.id.unwrap_or_else(|| name.to_string());

        Ok(ContainerInfo { id, running })
    }

    async fn exec_create(&self, container_id: &str, cmd: &[&str]) -> Result<String, RuntimeError> {
        let options = CreateExecOptions {
            cmd: Some(cmd.iter().map(|part| part.to_string()).collect::<Vec<String>>()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let created = self
            .docker
            .create_exec(container_id, options)
            .await
            .map_err(map_docker_error)?;
        Ok(created.id)
    }

    async fn exec_start(&self, exec_id: &str, stdin: &[u8]) -> Result<(), RuntimeError> {
        let started = self
            .docker
            .start_exec(
                exec_id,
                Some(StartExecOptions {
                    detach: false,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_docker_error)?;

        let StartExecResults::Attached { mut output, mut input } = started else {
            return Err(RuntimeError::Unavailable(
                "exec started detached".to_string(),
            ));
        };

        input
            .write_all(stdin)
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("stdin write failed: {}", e)))?;
        input
            .shutdown()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("stdin close failed: {}", e)))?;

        // Output is consumed but never logged.
        let mut chunks = 0usize;
        while let Some(chunk) = output.next().await {
            chunk.map_err(map_docker_error)?;
            chunks += 1;
        }
        debug!(exec_id, chunks, "Exec output drained");
        Ok(())
    }

    async fn exec_inspect(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError> {
        let inspect = self
            .docker
            .inspect_exec(exec_id)
            .await
            .map_err(map_docker_error)?;
        Ok(inspect.exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_runtime_not_found() {
        let err = DockerError::DockerResponseServerError {
            status_code: 404,
            message: "No such container: lyra-x-1".to_string(),
        };
        assert_eq!(map_docker_error(err), RuntimeError::NotFound);

        let err = DockerError::DockerResponseServerError {
            status_code: 500,
            message: "daemon exploded".to_string(),
        };
        assert!(matches!(map_docker_error(err), RuntimeError::Unavailable(_)));
    }
}
