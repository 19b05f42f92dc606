//! Root credential rotation.
//!
//! Rotation is a two-step saga: the live credential is changed first (inside
//! the container, or by the environment's worker), then the new ciphertext is
//! committed. If the commit fails, the same channel is used once more to put
//! the previous password back, derived from the ciphertext read before the
//! rotation started.
//!
//! Plaintext passwords only ever live in [`SecretString`]s and in the payload
//! handed to the exec engine or the worker transport; nothing here logs them.

use std::sync::Arc;

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::container::LocalExecEngine;
use crate::db::{EnvironmentStore, StoreError};
use crate::error::{ApiError, ErrorCode};
use crate::model::{Environment, EnvironmentStatus};
use crate::placement::{Placement, PlacementResolver};
use crate::secrets::SecretsCrypto;
use crate::types::EnvironmentId;
use crate::worker_client::{WorkerApi, root_password_path};

pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;

/// Checks applied to a new password before anything is changed.
#[derive(Debug, Clone, Copy)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_PASSWORD_LENGTH,
            max_length: MAX_PASSWORD_LENGTH,
        }
    }
}

impl PasswordPolicy {
    pub fn with_min_length(min_length: usize) -> Self {
        Self {
            min_length,
            ..Self::default()
        }
    }

    pub fn check(&self, password: &SecretString) -> Result<(), ApiError> {
        let password = password.expose_secret();
        let length = password.chars().count();

        if length < self.min_length {
            return Err(ApiError::new(
                ErrorCode::WeakPassword,
                format!("Password must be at least {} characters", self.min_length),
            ));
        }
        if length > self.max_length {
            return Err(ApiError::new(
                ErrorCode::WeakPassword,
                format!("Password must be at most {} characters", self.max_length),
            ));
        }
        // chpasswd reads one `user:password` pair per line.
        if password.chars().any(char::is_control) {
            return Err(ApiError::new(
                ErrorCode::WeakPassword,
                "Password must not contain control characters",
            ));
        }
        Ok(())
    }
}

/// Request body of the rotation endpoints.
#[derive(Deserialize)]
pub struct RotateRootPasswordRequest {
    pub new_password: String,
}

impl std::fmt::Debug for RotateRootPasswordRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotateRootPasswordRequest")
            .field("new_password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationOutcome {
    pub message: String,
}

/// Result of trying to put the previous password back after a failed commit.
#[derive(Debug, Clone)]
pub enum Compensation {
    Restored,
    Failed(ApiError),
    /// Nothing was attempted; the reason is safe to log.
    Skipped(&'static str),
}

pub struct RotationCoordinator {
    store: Arc<dyn EnvironmentStore>,
    placement: PlacementResolver,
    exec: LocalExecEngine,
    workers: Arc<dyn WorkerApi>,
    crypto: Arc<SecretsCrypto>,
    policy: PasswordPolicy,
}

impl RotationCoordinator {
    pub fn new(
        store: Arc<dyn EnvironmentStore>,
        placement: PlacementResolver,
        exec: LocalExecEngine,
        workers: Arc<dyn WorkerApi>,
        crypto: Arc<SecretsCrypto>,
        policy: PasswordPolicy,
    ) -> Self {
        Self {
            store,
            placement,
            exec,
            workers,
            crypto,
            policy,
        }
    }

    pub async fn rotate_root_password(
        &self,
        id: &EnvironmentId,
        new_password: SecretString,
    ) -> Result<RotationOutcome, ApiError> {
        let env = self
            .store
            .get_environment(id)
            .await
            .map_err(|e| {
                warn!(environment_id = %id, error = %e, "Environment lookup failed");
                ApiError::internal("Failed to load environment")
            })?
            .ok_or_else(|| ApiError::env_not_found(id))?;

        self.policy.check(&new_password)?;
        self.ensure_running(&env).await?;

        // Encrypt up front so the only failure left after the live change is the commit.
        let ciphertext = self
            .crypto
            .encrypt_secret(new_password.expose_secret())
            .map_err(|e| {
                warn!(environment_id = %id, error = %e, "Credential encryption failed");
                ApiError::internal("Failed to secure the new password")
            })?;

        let placement = self.placement.resolve(&env).await?;

        if let Err(err) = self.apply(&env, &placement, &new_password).await {
            warn!(
                environment_id = %id,
                code = err.code(),
                status = err.status().as_u16(),
                "Root password rotation failed"
            );
            return Err(err);
        }

        match self.persist(&env, ciphertext).await {
            Ok(()) => {
                info!(
                    environment_id = %id,
                    placement = placement_label(&placement),
                    "Root password rotated"
                );
                Ok(RotationOutcome {
                    message: "Root password updated".to_string(),
                })
            }
            Err(cause) => {
                let compensation = self.compensate(&env, &placement).await;
                Err(metadata_sync_failed(&env, &cause, &compensation))
            }
        }
    }

    /// Rotation needs an actually running instance. For host-local
    /// environments the container's live state wins over the record.
    async fn ensure_running(&self, env: &Environment) -> Result<(), ApiError> {
        let running = if env.is_host_local() {
            match self.exec.is_running_now(env).await {
                Some(live) => live,
                None => env.status == EnvironmentStatus::Running,
            }
        } else {
            env.status == EnvironmentStatus::Running
        };

        if running {
            Ok(())
        } else {
            Err(ApiError::env_not_running())
        }
    }

    /// Change the live credential through the placement's channel.
    async fn apply(
        &self,
        env: &Environment,
        placement: &Placement,
        password: &SecretString,
    ) -> Result<(), ApiError> {
        match placement {
            Placement::Local => self.exec.set_root_password(env, password).await,
            Placement::Remote(worker) => {
                let payload = json!({ "new_password": password.expose_secret() });
                self.workers
                    .call(
                        worker,
                        Method::POST,
                        &root_password_path(&env.id),
                        Some(payload),
                        None,
                    )
                    .await
                    .map(|_| ())
                    .map_err(ApiError::from)
            }
        }
    }

    /// Stage and commit the new ciphertext; rolls back on a failed commit.
    async fn persist(&self, env: &Environment, ciphertext: String) -> Result<(), StoreError> {
        let mut pending = self.store.begin_password_update(&env.id, ciphertext).await?;

        if let Err(e) = pending.commit().await {
            if let Err(rollback_err) = pending.rollback().await {
                warn!(
                    environment_id = %env.id,
                    error = %rollback_err,
                    "Credential rollback failed"
                );
            }
            return Err(e);
        }
        Ok(())
    }

    /// Restore the password that was current before this rotation.
    async fn compensate(&self, env: &Environment, placement: &Placement) -> Compensation {
        let Some(previous) = env.root_password_encrypted.as_deref() else {
            return Compensation::Skipped("no stored credential");
        };
        let previous = match self.crypto.decrypt_secret(previous) {
            Ok(previous) => previous,
            Err(_) => return Compensation::Skipped("stored credential could not be decrypted"),
        };

        match self.apply(env, placement, &previous).await {
            Ok(()) => Compensation::Restored,
            Err(err) => Compensation::Failed(err),
        }
    }
}

fn placement_label(placement: &Placement) -> &str {
    match placement {
        Placement::Local => "host",
        Placement::Remote(worker) => &worker.name,
    }
}

fn metadata_sync_failed(
    env: &Environment,
    cause: &StoreError,
    compensation: &Compensation,
) -> ApiError {
    const NOT_SAVED: &str = "Password was changed but could not be saved";

    let message = match compensation {
        Compensation::Restored => {
            error!(
                environment_id = %env.id,
                cause = %cause,
                "Credential not saved; previous password restored"
            );
            format!("{}; the previous password was restored", NOT_SAVED)
        }
        Compensation::Failed(err) => {
            error!(
                environment_id = %env.id,
                cause = %cause,
                code = err.code(),
                status = err.status().as_u16(),
                "Credential not saved and restoring the previous password failed; \
                 live credential diverges from the record"
            );
            format!(
                "{}; restoring the previous password also failed ({})",
                NOT_SAVED,
                err.code()
            )
        }
        Compensation::Skipped(reason) => {
            error!(
                environment_id = %env.id,
                cause = %cause,
                reason,
                "Credential not saved and the previous password could not be restored"
            );
            format!(
                "{}; the previous password could not be restored ({})",
                NOT_SAVED, reason
            )
        }
    };
    ApiError::new(ErrorCode::PasswordMetadataSyncFailed, message)
}
