//! Persistence behind a single trait so handlers never see the backend.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::config::{IkuseiConfig, StoreBackend};
use crate::models::{
    KpiSnapshot, NewUser, OperationLog, RecordKind, RecordScope, SessionClosed, SessionFilter,
    SessionFinish, StoredRecord, TrainingSession, User, Worker,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// The target has ended and cannot change.
    #[error("{0}")]
    Immutable(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{what} not found"))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<SessionClosed> for StoreError {
    fn from(e: SessionClosed) -> Self {
        StoreError::Immutable(e.to_string())
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Backend description, or an error when the backend is unreachable.
    async fn health_check(&self) -> Result<String, StoreError>;

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError>;

    /// Fails with `Conflict` when the username or email is taken.
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    /// Remove `code` from the user's backup codes in one atomic step.
    /// Returns false when the code was not present (already spent or unknown).
    async fn consume_backup_code(&self, user_id: i64, code: &str) -> Result<bool, StoreError>;

    // ------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------

    /// Newest first.
    async fn list_workers(&self) -> Result<Vec<Worker>, StoreError>;

    async fn get_worker(&self, id: i64) -> Result<Worker, StoreError>;

    /// Assigns the id; the incoming `id` is ignored.
    async fn insert_worker(&self, worker: Worker) -> Result<Worker, StoreError>;

    async fn update_worker(&self, worker: Worker) -> Result<Worker, StoreError>;

    /// Removes the worker and its records. Sessions are kept but detached.
    async fn delete_worker(&self, id: i64) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Training sessions
    // ------------------------------------------------------------------

    /// Fails with `Conflict` when `session_id` already exists.
    async fn insert_session(&self, session: TrainingSession)
        -> Result<TrainingSession, StoreError>;

    async fn get_session(&self, session_id: &str) -> Result<TrainingSession, StoreError>;

    /// Ordered by start time, newest first.
    async fn list_sessions(&self, filter: SessionFilter)
        -> Result<Vec<TrainingSession>, StoreError>;

    /// Fails with `Immutable` once the session has ended.
    async fn append_to_session(
        &self,
        session_id: &str,
        logs: Vec<OperationLog>,
        snapshots: Vec<KpiSnapshot>,
    ) -> Result<TrainingSession, StoreError>;

    async fn finish_session(
        &self,
        session_id: &str,
        finish: SessionFinish,
    ) -> Result<TrainingSession, StoreError>;

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// `body` must already be normalised for `kind`.
    async fn insert_record(
        &self,
        kind: RecordKind,
        worker_id: Option<i64>,
        body: Value,
    ) -> Result<StoredRecord, StoreError>;

    async fn get_record(&self, kind: RecordKind, id: i64) -> Result<StoredRecord, StoreError>;

    /// Ordered per [`RecordKind::sort`].
    async fn list_records(
        &self,
        kind: RecordKind,
        scope: RecordScope,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    async fn update_record(
        &self,
        kind: RecordKind,
        id: i64,
        body: Value,
    ) -> Result<StoredRecord, StoreError>;

    async fn delete_record(&self, kind: RecordKind, id: i64) -> Result<(), StoreError>;
}

/// Build the store selected by `database.backend`.
pub async fn connect(config: &IkuseiConfig) -> anyhow::Result<Arc<dyn Store>> {
    match config.database.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let store = PgStore::connect(&config.database).await?;
            store.migrate().await?;
            info!("Using PostgreSQL store");
            Ok(Arc::new(store))
        }
    }
}
