//! Privileged command execution inside an environment's container.
//!
//! The engine finds the container by its deterministic name, feeds the
//! command's stdin through an attached exec session and reports the exit
//! status. Command payloads carry plaintext credentials, so nothing that
//! leaves this module (errors, logs) mentions the command or its stdin.

pub mod docker;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::error::{ApiError, ErrorCode};
use crate::model::Environment;

pub use docker::DockerRuntime;

/// Command used to set account passwords from `user:password` lines on stdin.
pub const PASSWORD_COMMAND: &[&str] = &["chpasswd"];

/// What the runtime reports about a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime has no container with the requested name.
    NotFound,
    /// The runtime failed or could not be reached.
    Unavailable(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "Container not found"),
            Self::Unavailable(msg) => write!(f, "Container runtime error: {}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// The slice of the container runtime this service needs.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look a container up by name. `Err(NotFound)` when it does not exist.
    async fn get_container(&self, name: &str) -> Result<ContainerInfo, RuntimeError>;

    /// Create an exec instance with stdin attached and no TTY.
    async fn exec_create(&self, container_id: &str, cmd: &[&str]) -> Result<String, RuntimeError>;

    /// Start the exec, write `stdin`, close the channel and wait for the
    /// command's output stream to end.
    async fn exec_start(&self, exec_id: &str, stdin: &[u8]) -> Result<(), RuntimeError>;

    /// Exit code of a finished exec; `None` if the runtime does not know it.
    async fn exec_inspect(&self, exec_id: &str) -> Result<Option<i64>, RuntimeError>;
}

/// Why an in-container execution did not produce an exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    ContainerNotFound,
    Runtime(String),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContainerNotFound => write!(f, "Container not found"),
            Self::Runtime(msg) => write!(f, "Exec failed: {}", msg),
        }
    }
}

impl std::error::Error for ExecError {}

#[derive(Clone)]
pub struct LocalExecEngine {
    runtime: Arc<dyn ContainerRuntime>,
}

impl LocalExecEngine {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Run `command` in the environment's container with `stdin` piped in.
    pub async fn exec_in_container(
        &self,
        env: &Environment,
        command: &[&str],
        stdin: &SecretString,
    ) -> Result<i64, ExecError> {
        let name = env.container_name();
        let container = match self.runtime.get_container(&name).await {
            Ok(c) => c,
            Err(RuntimeError::NotFound) => return Err(ExecError::ContainerNotFound),
            Err(RuntimeError::Unavailable(msg)) => return Err(ExecError::Runtime(msg)),
        };

        let exec_id = self
            .runtime
            .exec_create(&container.id, command)
            .await
            .map_err(runtime_to_exec)?;
        self.runtime
            .exec_start(&exec_id, stdin.expose_secret().as_bytes())
            .await
            .map_err(runtime_to_exec)?;
        let exit_code = self
            .runtime
            .exec_inspect(&exec_id)
            .await
            .map_err(runtime_to_exec)?;

        debug!(environment_id = %env.id, container = %name, ?exit_code, "Exec finished");
        // An exec the runtime cannot report on did not demonstrably succeed.
        Ok(exit_code.unwrap_or(-1))
    }

    /// Set the container's root password through `chpasswd`.
    pub async fn set_root_password(
        &self,
        env: &Environment,
        password: &SecretString,
    ) -> Result<(), ApiError> {
        let payload = SecretString::from(format!("root:{}\n", password.expose_secret()));

        match self.exec_in_container(env, PASSWORD_COMMAND, &payload).await {
            Ok(0) => Ok(()),
            Ok(exit_code) => {
                warn!(environment_id = %env.id, exit_code, "Root password command failed");
                Err(ApiError::new(
                    ErrorCode::RotationFailed,
                    format!("Failed to reset root password (exit status {})", exit_code),
                ))
            }
            Err(ExecError::ContainerNotFound) => Err(ApiError::new(
                ErrorCode::ContainerNotFound,
                "Environment container not found",
            )),
            Err(ExecError::Runtime(msg)) => {
                warn!(environment_id = %env.id, error = %msg, "Root password exec failed");
                Err(ApiError::new(
                    ErrorCode::RotationFailed,
                    "Failed to reset root password",
                ))
            }
        }
    }

    /// Live running state of the environment's container.
    ///
    /// `None` when the container is missing or the runtime cannot answer.
    pub async fn is_running_now(&self, env: &Environment) -> Option<bool> {
        match self.runtime.get_container(&env.container_name()).await {
            Ok(info) => Some(info.running),
            Err(RuntimeError::NotFound) => None,
            Err(RuntimeError::Unavailable(msg)) => {
                debug!(environment_id = %env.id, error = %msg, "Live container check unavailable");
                None
            }
        }
    }
}

fn runtime_to_exec(err: RuntimeError) -> ExecError {
    match err {
        RuntimeError::NotFound => ExecError::ContainerNotFound,
        RuntimeError::Unavailable(msg) => ExecError::Runtime(msg),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeRuntime;
    use super::*;
    use crate::model::{EnvironmentStatus, REDACTED_PASSWORD};
    use crate::types::EnvironmentId;

    fn env() -> Environment {
        Environment {
            id: EnvironmentId::new("e1"),
            name: "test-env".to_string(),
            status: EnvironmentStatus::Running,
            gpu_indices: Default::default(),
            worker_server_id: None,
            root_password: REDACTED_PASSWORD.to_string(),
            root_password_encrypted: None,
        }
    }

    #[tokio::test]
    async fn test_set_root_password_writes_chpasswd_line() {
        let mut runtime = FakeRuntime::running(0);
        runtime.expected_name = Some("lyra-test-env-e1".to_string());
        let runtime = Arc::new(runtime);
        let engine = LocalExecEngine::new(runtime.clone());

        engine
            .set_root_password(&env(), &SecretString::from("newpass123"))
            .await
            .unwrap();

        let execs = runtime.execs();
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].container_id, "container-123");
        assert_eq!(execs[0].cmd, vec!["chpasswd".to_string()]);
        assert_eq!(execs[0].stdin, b"root:newpass123\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_hides_payload() {
        let engine = LocalExecEngine::new(Arc::new(FakeRuntime::running(1)));

        let err = engine
            .set_root_password(&env(), &SecretString::from("newpass123"))
            .await
            .unwrap_err();

        assert!(err.is(ErrorCode::RotationFailed));
        let rendered = serde_json::to_string(&err.body()).unwrap();
        assert!(!rendered.contains("newpass123"));
        assert!(!rendered.contains("chpasswd"));
        assert!(rendered.contains("exit status 1"));
    }

    #[tokio::test]
    async fn test_missing_container_is_conflict() {
        let engine = LocalExecEngine::new(Arc::new(FakeRuntime::missing()));

        let err = engine
            .set_root_password(&env(), &SecretString::from("newpass123"))
            .await
            .unwrap_err();

        assert!(err.is(ErrorCode::ContainerNotFound));
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_runtime_failure_is_sanitized() {
        let mut runtime = FakeRuntime::running(0);
        runtime.fail_start = true;
        let engine = LocalExecEngine::new(Arc::new(runtime));

        let err = engine
            .set_root_password(&env(), &SecretString::from("newpass123"))
            .await
            .unwrap_err();
        assert!(err.is(ErrorCode::RotationFailed));
        assert!(!err.message().contains("socket"));
    }

    #[tokio::test]
    async fn test_unknown_exit_code_is_failure() {
        let mut runtime = FakeRuntime::running(0);
        runtime.exit_code = None;
        let engine = LocalExecEngine::new(Arc::new(runtime));

        let code = engine
            .exec_in_container(&env(), &["true"], &SecretString::from(""))
            .await
            .unwrap();
        assert_eq!(code, -1);
    }

    #[tokio::test]
    async fn test_live_running_state() {
        let running = LocalExecEngine::new(Arc::new(FakeRuntime::running(0)));
        let stopped = LocalExecEngine::new(Arc::new(FakeRuntime::stopped()));
        let missing = LocalExecEngine::new(Arc::new(FakeRuntime::missing()));

        assert_eq!(running.is_running_now(&env()).await, Some(true));
        assert_eq!(stopped.is_running_now(&env()).await, Some(false));
        assert_eq!(missing.is_running_now(&env()).await, None);
    }
}
