//! The persistence seam used by the rotation and GPU code.
//!
//! Credential writes go through a [`PendingPasswordUpdate`], which is
//! committed or rolled back explicitly so the rotation saga can tell a
//! failed commit apart from everything that came before it.

use std::fmt;

use async_trait::async_trait;

use crate::db::{Db, EnvironmentRecord, QueryBuilder};
use crate::model::{Environment, EnvironmentStatus, REDACTED_PASSWORD, WorkerServer};
use crate::types::{EnvironmentId, WorkerServerId};

#[derive(Debug, Clone)]
pub enum StoreError {
    /// The backing database rejected or failed the operation.
    Database(String),
    /// A pending update was used after it was committed or rolled back.
    Finished,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Database(msg) => write!(f, "Database error: {}", msg),
            Self::Finished => write!(f, "Update already finished"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A staged credential write owned by one rotation call.
#[async_trait]
pub trait PendingPasswordUpdate: Send {
    async fn commit(&mut self) -> StoreResult<()>;
    async fn rollback(&mut self) -> StoreResult<()>;
}

#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    async fn get_environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>>;

    async fn get_worker(&self, id: &WorkerServerId) -> StoreResult<Option<WorkerServer>>;

    /// Every environment in one of `statuses`, regardless of placement.
    async fn list_environments_by_status(
        &self,
        statuses: &[EnvironmentStatus],
    ) -> StoreResult<Vec<Environment>>;

    /// Stage a new ciphertext for `id`; the display field is reset to the
    /// redaction placeholder in the same write.
    async fn begin_password_update(
        &self,
        id: &EnvironmentId,
        ciphertext: String,
    ) -> StoreResult<Box<dyn PendingPasswordUpdate>>;
}

/// [`EnvironmentStore`] backed by SurrealDB.
#[derive(Clone)]
pub struct SurrealEnvironmentStore {
    db: Db,
}

impl SurrealEnvironmentStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn save_environment(&self, env: &Environment) -> StoreResult<Environment> {
        let record = EnvironmentRecord::from(env);
        let saved = QueryBuilder::upsert_environment(&self.db, &record).await?;
        Ok(saved.into())
    }

    pub async fn save_worker(&self, worker: &WorkerServer) -> StoreResult<WorkerServer> {
        let saved = QueryBuilder::upsert_worker(&self.db, &worker.into()).await?;
        Ok(saved.into())
    }

    pub async fn list_workers(&self) -> StoreResult<Vec<WorkerServer>> {
        let workers = QueryBuilder::list_workers(&self.db).await?;
        Ok(workers.into_iter().map(WorkerServer::from).collect())
    }
}

#[async_trait]
impl EnvironmentStore for SurrealEnvironmentStore {
    async fn get_environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>> {
        let record = QueryBuilder::find_environment(&self.db, id.as_str()).await?;
        Ok(record.map(Environment::from))
    }

    async fn get_worker(&self, id: &WorkerServerId) -> StoreResult<Option<WorkerServer>> {
        let record = QueryBuilder::find_worker(&self.db, id.as_str()).await?;
        Ok(record.map(WorkerServer::from))
    }

    async fn list_environments_by_status(
        &self,
        statuses: &[EnvironmentStatus],
    ) -> StoreResult<Vec<Environment>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let records = QueryBuilder::list_environments_by_status(&self.db, &statuses).await?;
        Ok(records.into_iter().map(Environment::from).collect())
    }

    async fn begin_password_update(
        &self,
        id: &EnvironmentId,
        ciphertext: String,
    ) -> StoreResult<Box<dyn PendingPasswordUpdate>> {
        Ok(Box::new(SurrealPasswordUpdate {
            db: self.db.clone(),
            uid: id.to_string(),
            ciphertext: Some(ciphertext),
        }))
    }
}

/// Buffers the write until `commit`, which runs it as one SurrealQL
/// transaction. A failed commit leaves nothing applied, so rollback only
/// discards the buffer.
struct SurrealPasswordUpdate {
    db: Db,
    uid: String,
    ciphertext: Option<String>,
}

#[async_trait]
impl PendingPasswordUpdate for SurrealPasswordUpdate {
    async fn commit(&mut self) -> StoreResult<()> {
        let ciphertext = self.ciphertext.take().ok_or(StoreError::Finished)?;
        QueryBuilder::update_root_password(&self.db, &self.uid, &ciphertext, REDACTED_PASSWORD)
            .await?;
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.ciphertext = None;
        Ok(())
    }
}
