use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

use super::{Store, StoreError};
use crate::models::{
    KpiSnapshot, NewUser, OperationLog, RecordKind, RecordScope, SessionFilter, SessionFinish,
    StoredRecord, TrainingSession, User, Worker,
};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    workers: BTreeMap<i64, Worker>,
    sessions: Vec<TrainingSession>,
    records: BTreeMap<i64, StoredRecord>,
    next_user_id: i64,
    next_worker_id: i64,
    next_session_id: i64,
    next_record_id: i64,
}

fn next(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

/// Process-local store for tests and the `memory` backend.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every row and restart id sequences.
    pub async fn reset(&self) {
        *self.tables.write().await = Tables::default();
    }
}

fn sort_sessions(sessions: &mut [TrainingSession]) {
    sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<String, StoreError> {
        Ok("memory".to_string())
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.users.iter().find(|u| u.username == username).cloned())
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        let t = self.tables.read().await;
        Ok(t.users.iter().any(|u| u.email.eq_ignore_ascii_case(email)))
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut t = self.tables.write().await;
        if t.users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!("username {} exists", user.username)));
        }
        if t.users.iter().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(StoreError::Conflict(format!("email {} exists", user.email)));
        }
        let id = next(&mut t.next_user_id);
        let user = user.into_user(id);
        t.users.push(user.clone());
        Ok(user)
    }

    async fn consume_backup_code(&self, user_id: i64, code: &str) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        let user = t
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| StoreError::not_found("User"))?;
        let before = user.backup_codes.len();
        user.backup_codes.retain(|c| c != code);
        Ok(user.backup_codes.len() < before)
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, StoreError> {
        let t = self.tables.read().await;
        let mut workers: Vec<Worker> = t.workers.values().cloned().collect();
        workers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(workers)
    }

    async fn get_worker(&self, id: i64) -> Result<Worker, StoreError> {
        let t = self.tables.read().await;
        t.workers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Worker"))
    }

    async fn insert_worker(&self, mut worker: Worker) -> Result<Worker, StoreError> {
        let mut t = self.tables.write().await;
        worker.id = next(&mut t.next_worker_id);
        t.workers.insert(worker.id, worker.clone());
        info!(worker_id = worker.id, "Worker created");
        Ok(worker)
    }

    async fn update_worker(&self, worker: Worker) -> Result<Worker, StoreError> {
        let mut t = self.tables.write().await;
        let slot = t
            .workers
            .get_mut(&worker.id)
            .ok_or_else(|| StoreError::not_found("Worker"))?;
        *slot = worker.clone();
        Ok(worker)
    }

    async fn delete_worker(&self, id: i64) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if t.workers.remove(&id).is_none() {
            return Err(StoreError::not_found("Worker"));
        }
        t.records.retain(|_, r| r.worker_id != Some(id));
        for s in t.sessions.iter_mut().filter(|s| s.worker_id == Some(id)) {
            s.worker_id = None;
        }
        for u in t.users.iter_mut().filter(|u| u.worker_id == Some(id)) {
            u.worker_id = None;
        }
        info!(worker_id = id, "Worker deleted");
        Ok(())
    }

    async fn insert_session(
        &self,
        mut session: TrainingSession,
    ) -> Result<TrainingSession, StoreError> {
        let mut t = self.tables.write().await;
        if t.sessions.iter().any(|s| s.session_id == session.session_id) {
            return Err(StoreError::Conflict(format!(
                "Session {} already exists",
                session.session_id
            )));
        }
        session.id = next(&mut t.next_session_id);
        t.sessions.push(session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<TrainingSession, StoreError> {
        let t = self.tables.read().await;
        t.sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Session"))
    }

    async fn list_sessions(
        &self,
        filter: SessionFilter,
    ) -> Result<Vec<TrainingSession>, StoreError> {
        let t = self.tables.read().await;
        let mut sessions: Vec<TrainingSession> =
            t.sessions.iter().filter(|s| filter.matches(s)).cloned().collect();
        sort_sessions(&mut sessions);
        Ok(sessions)
    }

    async fn append_to_session(
        &self,
        session_id: &str,
        logs: Vec<OperationLog>,
        snapshots: Vec<KpiSnapshot>,
    ) -> Result<TrainingSession, StoreError> {
        let mut t = self.tables.write().await;
        let session = t
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
            .ok_or_else(|| StoreError::not_found("Session"))?;
        session.append(logs, snapshots)?;
        Ok(session.clone())
    }

    async fn finish_session(
        &self,
        session_id: &str,
        finish: SessionFinish,
    ) -> Result<TrainingSession, StoreError> {
        let mut t = self.tables.write().await;
        let session = t
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session_id)
            .ok_or_else(|| StoreError::not_found("Session"))?;
        session.finish(finish)?;
        Ok(session.clone())
    }

    async fn insert_record(
        &self,
        kind: RecordKind,
        worker_id: Option<i64>,
        body: Value,
    ) -> Result<StoredRecord, StoreError> {
        let mut t = self.tables.write().await;
        let now = Utc::now();
        let record = StoredRecord {
            id: next(&mut t.next_record_id),
            kind,
            worker_id,
            body,
            created_at: now,
            updated_at: now,
        };
        t.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_record(&self, kind: RecordKind, id: i64) -> Result<StoredRecord, StoreError> {
        let t = self.tables.read().await;
        t.records
            .get(&id)
            .filter(|r| r.kind == kind)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind.label()))
    }

    async fn list_records(
        &self,
        kind: RecordKind,
        scope: RecordScope,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let t = self.tables.read().await;
        let mut records: Vec<StoredRecord> = t
            .records
            .values()
            .filter(|r| r.kind == kind && scope.matches(r.worker_id))
            .cloned()
            .collect();
        kind.sort(&mut records);
        Ok(records)
    }

    async fn update_record(
        &self,
        kind: RecordKind,
        id: i64,
        body: Value,
    ) -> Result<StoredRecord, StoreError> {
        let mut t = self.tables.write().await;
        let record = t
            .records
            .get_mut(&id)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| StoreError::not_found(kind.label()))?;
        record.body = body;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete_record(&self, kind: RecordKind, id: i64) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if !t.records.get(&id).is_some_and(|r| r.kind == kind) {
            return Err(StoreError::not_found(kind.label()));
        }
        t.records.remove(&id);
        Ok(())
    }
}
