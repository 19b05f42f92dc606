// Database query helpers for SurrealDB.
//
// Environment rows belong to the lifecycle manager; the only write this
// service performs on them is the credential update in
// `update_root_password`. The upserts exist for registration and seeding.

use crate::db::schema::*;
use anyhow::{anyhow, Result};
use surrealdb::{engine::any::Any, Surreal};

const ENVIRONMENT_COLUMNS: &str =
    "uid, name, status, gpu_indices, worker_server_id, root_password, root_password_encrypted";

pub struct QueryBuilder;

impl QueryBuilder {
    pub async fn find_environment(
        db: &Surreal<Any>,
        uid: &str,
    ) -> Result<Option<EnvironmentRecord>> {
        let mut res = db
            .query(format!(
                "SELECT {} FROM environment WHERE uid = $uid LIMIT 1",
                ENVIRONMENT_COLUMNS
            ))
            .bind(("uid", uid.to_string()))
            .await?;

        let env: Option<EnvironmentRecord> = res.take(0)?;
        Ok(env)
    }

    /// All environments whose status is one of `statuses`, across every
    /// placement domain. Callers scope the result to a domain.
    pub async fn list_environments_by_status(
        db: &Surreal<Any>,
        statuses: &[&str],
    ) -> Result<Vec<EnvironmentRecord>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let mut res = db
            .query(format!(
                "SELECT {} FROM environment WHERE status IN $statuses",
                ENVIRONMENT_COLUMNS
            ))
            .bind(("statuses", statuses))
            .await?;

        let envs: Vec<EnvironmentRecord> = res.take(0)?;
        Ok(envs)
    }

    pub async fn upsert_environment(
        db: &Surreal<Any>,
        data: &EnvironmentRecord,
    ) -> Result<EnvironmentRecord> {
        let mut res = db
            .query(format!(
                r#"
                UPSERT type::thing('environment', $uid) SET
                    uid = $uid,
                    name = $name,
                    status = $status,
                    gpu_indices = $gpu_indices,
                    worker_server_id = $worker_server_id,
                    root_password = $root_password,
                    root_password_encrypted = $root_password_encrypted
                RETURN {}
                "#,
                ENVIRONMENT_COLUMNS
            ))
            .bind(("uid", data.uid.clone()))
            .bind(("name", data.name.clone()))
            .bind(("status", data.status.clone()))
            .bind(("gpu_indices", data.gpu_indices.clone()))
            .bind(("worker_server_id", data.worker_server_id.clone()))
            .bind(("root_password", data.root_password.clone()))
            .bind(("root_password_encrypted", data.root_password_encrypted.clone()))
            .await?;

        let saved: Option<EnvironmentRecord> = res.take(0)?;
        saved.ok_or_else(|| anyhow!("failed to upsert environment {}", data.uid))
    }

    /// Replace the stored credential in one transaction.
    ///
    /// The ciphertext and the display field change together or not at all;
    /// a vanished row aborts the transaction.
    pub async fn update_root_password(
        db: &Surreal<Any>,
        uid: &str,
        ciphertext: &str,
        display_value: &str,
    ) -> Result<()> {
        db.query(
            r#"
            BEGIN TRANSACTION;
            LET $updated = (
                UPDATE environment SET
                    root_password_encrypted = $ciphertext,
                    root_password = $display_value
                WHERE uid = $uid
            );
            IF array::len($updated) = 0 {
                THROW "environment record missing";
            };
            COMMIT TRANSACTION;
            "#,
        )
        .bind(("uid", uid.to_string()))
        .bind(("ciphertext", ciphertext.to_string()))
        .bind(("display_value", display_value.to_string()))
        .await?
        .check()?;

        Ok(())
    }

    pub async fn find_worker(
        db: &Surreal<Any>,
        uid: &str,
    ) -> Result<Option<WorkerServerRecord>> {
        let mut res = db
            .query("SELECT uid, name, base_url FROM worker_server WHERE uid = $uid LIMIT 1")
            .bind(("uid", uid.to_string()))
            .await?;

        let worker: Option<WorkerServerRecord> = res.take(0)?;
        Ok(worker)
    }

    pub async fn list_workers(db: &Surreal<Any>) -> Result<Vec<WorkerServerRecord>> {
        let mut res = db
            .query("SELECT uid, name, base_url FROM worker_server ORDER BY name")
            .await?;

        let workers: Vec<WorkerServerRecord> = res.take(0)?;
        Ok(workers)
    }

    pub async fn upsert_worker(
        db: &Surreal<Any>,
        data: &WorkerServerRecord,
    ) -> Result<WorkerServerRecord> {
        let mut res = db
            .query(
                r#"
                UPSERT type::thing('worker_server', $uid) SET
                    uid = $uid,
                    name = $name,
                    base_url = $base_url
                RETURN uid, name, base_url
                "#,
            )
            .bind(("uid", data.uid.clone()))
            .bind(("name", data.name.clone()))
            .bind(("base_url", data.base_url.clone()))
            .await?;

        let saved: Option<WorkerServerRecord> = res.take(0)?;
        saved.ok_or_else(|| anyhow!("failed to upsert worker {}", data.uid))
    }
}
