use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{types::Json, PgPool};
use tracing::info;

use super::{Store, StoreError};
use crate::config::DatabaseConfig;
use crate::db;
use crate::models::{
    KpiScore, KpiSnapshot, NewUser, OperationLog, RecordKind, RecordScope, Role, SessionFilter,
    SessionFinish, SessionStatus, StoredRecord, TrainingSession, User, Worker,
};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

// ============================================================================
// Row types
// ============================================================================

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    role: String,
    worker_id: Option<i64>,
    mfa_enabled: bool,
    backup_codes: Json<Vec<String>>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        User {
            id: r.id,
            username: r.username,
            email: r.email,
            password_hash: r.password_hash,
            role: Role::parse(&r.role).unwrap_or_default(),
            worker_id: r.worker_id,
            mfa_enabled: r.mfa_enabled,
            backup_codes: r.backup_codes.0,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    session_id: String,
    worker_id: Option<i64>,
    training_menu_id: Option<i64>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
    status: String,
    kpi: Option<Json<KpiScore>>,
    operation_logs: Json<Vec<OperationLog>>,
    kpi_timeline: Json<Vec<KpiSnapshot>>,
    ai_evaluation: Value,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for TrainingSession {
    fn from(r: SessionRow) -> Self {
        TrainingSession {
            id: r.id,
            session_id: r.session_id,
            worker_id: r.worker_id,
            training_menu_id: r.training_menu_id,
            start_time: r.start_time,
            end_time: r.end_time,
            duration_seconds: r.duration_seconds,
            status: SessionStatus::parse(&r.status).unwrap_or_default(),
            kpi: r.kpi.map(|k| k.0),
            operation_logs: r.operation_logs.0,
            kpi_timeline: r.kpi_timeline.0,
            ai_evaluation: r.ai_evaluation,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    kind: String,
    worker_id: Option<i64>,
    body: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for StoredRecord {
    type Error = StoreError;

    fn try_from(r: RecordRow) -> Result<Self, Self::Error> {
        let kind = RecordKind::parse(&r.kind)
            .ok_or_else(|| StoreError::Serialization(format!("unknown record kind {}", r.kind)))?;
        Ok(StoredRecord {
            id: r.id,
            kind,
            worker_id: r.worker_id,
            body: r.body,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

const SESSION_COLUMNS: &str = "id, session_id, worker_id, training_menu_id, start_time, end_time, \
     duration_seconds, status, kpi, operation_logs, kpi_timeline, ai_evaluation, created_at";

const USER_COLUMNS: &str =
    "id, username, email, password_hash, role, worker_id, mfa_enabled, backup_codes, created_at";

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = db::create_pool(config).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema. Each version runs once, tracked in `schema_migrations`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version BIGINT PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let applied: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM schema_migrations WHERE version = 1")
                .fetch_optional(&self.pool)
                .await?;
        if applied.is_some() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for stmt in SCHEMA_V1 {
            sqlx::query(stmt).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT INTO schema_migrations (version) VALUES (1)")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!("Applied schema migration v1");
        Ok(())
    }

    async fn write_session(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        s: &TrainingSession,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE training_sessions
            SET end_time = $2, duration_seconds = $3, status = $4, kpi = $5,
                operation_logs = $6, kpi_timeline = $7, ai_evaluation = $8
            WHERE session_id = $1
            "#,
        )
        .bind(&s.session_id)
        .bind(s.end_time)
        .bind(s.duration_seconds)
        .bind(s.status.as_str())
        .bind(s.kpi.as_ref().map(Json))
        .bind(Json(&s.operation_logs))
        .bind(Json(&s.kpi_timeline))
        .bind(&s.ai_evaluation)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn lock_session(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        session_id: &str,
    ) -> Result<TrainingSession, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM training_sessions WHERE session_id = $1 FOR UPDATE"
        );
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(session_id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(TrainingSession::from)
            .ok_or_else(|| StoreError::not_found("Session"))
    }
}

const SCHEMA_V1: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS workers (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        name_kana TEXT,
        email TEXT NOT NULL,
        phone TEXT,
        nationality TEXT,
        native_language TEXT,
        visa_status TEXT,
        visa_expiry_date DATE,
        japanese_level TEXT,
        current_status TEXT NOT NULL,
        notes TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'trainee',
        worker_id BIGINT REFERENCES workers(id) ON DELETE SET NULL,
        mfa_enabled BOOLEAN NOT NULL DEFAULT TRUE,
        backup_codes JSONB NOT NULL DEFAULT '[]',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS training_sessions (
        id BIGSERIAL PRIMARY KEY,
        session_id TEXT NOT NULL UNIQUE,
        worker_id BIGINT REFERENCES workers(id) ON DELETE SET NULL,
        training_menu_id BIGINT,
        start_time TIMESTAMPTZ NOT NULL,
        end_time TIMESTAMPTZ,
        duration_seconds BIGINT,
        status TEXT NOT NULL,
        kpi JSONB,
        operation_logs JSONB NOT NULL DEFAULT '[]',
        kpi_timeline JSONB NOT NULL DEFAULT '[]',
        ai_evaluation JSONB NOT NULL DEFAULT 'null',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sessions_worker_start \
     ON training_sessions (worker_id, start_time DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS worker_records (
        id BIGSERIAL PRIMARY KEY,
        kind TEXT NOT NULL,
        worker_id BIGINT REFERENCES workers(id) ON DELETE CASCADE,
        body JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_records_kind_worker ON worker_records (kind, worker_id)",
];

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> Result<String, StoreError> {
        Ok(db::health_check(&self.pool).await?)
    }

    async fn find_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE lower(email) = lower($1))")
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            "INSERT INTO users \
             (username, email, password_hash, role, worker_id, mfa_enabled, backup_codes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {USER_COLUMNS}"
        );
        let row: UserRow = sqlx::query_as(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .bind(user.worker_id)
            .bind(user.mfa_enabled)
            .bind(Json(&user.backup_codes))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn consume_backup_code(&self, user_id: i64, code: &str) -> Result<bool, StoreError> {
        // the row lock taken by UPDATE serialises concurrent logins on the same code
        let result = sqlx::query(
            "UPDATE users SET backup_codes = backup_codes - $2 \
             WHERE id = $1 AND backup_codes ? $2",
        )
        .bind(user_id)
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_workers(&self) -> Result<Vec<Worker>, StoreError> {
        let rows: Vec<Worker> =
            sqlx::query_as("SELECT * FROM workers ORDER BY created_at DESC, id DESC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn get_worker(&self, id: i64) -> Result<Worker, StoreError> {
        let row: Option<Worker> = sqlx::query_as("SELECT * FROM workers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| StoreError::not_found("Worker"))
    }

    async fn insert_worker(&self, w: Worker) -> Result<Worker, StoreError> {
        let row: Worker = sqlx::query_as(
            r#"
            INSERT INTO workers (name, name_kana, email, phone, nationality, native_language,
                visa_status, visa_expiry_date, japanese_level, current_status, notes,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(&w.name)
        .bind(&w.name_kana)
        .bind(&w.email)
        .bind(&w.phone)
        .bind(&w.nationality)
        .bind(&w.native_language)
        .bind(&w.visa_status)
        .bind(w.visa_expiry_date)
        .bind(&w.japanese_level)
        .bind(&w.current_status)
        .bind(&w.notes)
        .bind(w.created_at)
        .bind(w.updated_at)
        .fetch_one(&self.pool)
        .await?;
        info!(worker_id = row.id, "Worker created");
        Ok(row)
    }

    async fn update_worker(&self, w: Worker) -> Result<Worker, StoreError> {
        let row: Option<Worker> = sqlx::query_as(
            r#"
            UPDATE workers
            SET name = $2, name_kana = $3, email = $4, phone = $5, nationality = $6,
                native_language = $7, visa_status = $8, visa_expiry_date = $9,
                japanese_level = $10, current_status = $11, notes = $12, updated_at = $13
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(w.id)
        .bind(&w.name)
        .bind(&w.name_kana)
        .bind(&w.email)
        .bind(&w.phone)
        .bind(&w.nationality)
        .bind(&w.native_language)
        .bind(&w.visa_status)
        .bind(w.visa_expiry_date)
        .bind(&w.japanese_level)
        .bind(&w.current_status)
        .bind(&w.notes)
        .bind(w.updated_at)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::not_found("Worker"))
    }

    async fn delete_worker(&self, id: i64) -> Result<(), StoreError> {
        // records cascade, sessions and users are detached by the foreign keys
        let result = sqlx::query("DELETE FROM workers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Worker"));
        }
        info!(worker_id = id, "Worker deleted");
        Ok(())
    }

    async fn insert_session(&self, s: TrainingSession) -> Result<TrainingSession, StoreError> {
        let sql = format!(
            "INSERT INTO training_sessions (session_id, worker_id, training_menu_id, start_time, \
             end_time, duration_seconds, status, kpi, operation_logs, kpi_timeline, \
             ai_evaluation, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING {SESSION_COLUMNS}"
        );
        let row: SessionRow = sqlx::query_as(&sql)
            .bind(&s.session_id)
            .bind(s.worker_id)
            .bind(s.training_menu_id)
            .bind(s.start_time)
            .bind(s.end_time)
            .bind(s.duration_seconds)
            .bind(s.status.as_str())
            .bind(s.kpi.as_ref().map(Json))
            .bind(Json(&s.operation_logs))
            .bind(Json(&s.kpi_timeline))
            .bind(&s.ai_evaluation)
            .bind(s.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => {
                    StoreError::Conflict(format!("Session {} already exists", s.session_id))
                }
                other => other,
            })?;
        Ok(row.into())
    }

    async fn get_session(&self, session_id: &str) -> Result<TrainingSession, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM training_sessions WHERE session_id = $1");
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TrainingSession::from)
            .ok_or_else(|| StoreError::not_found("Session"))
    }

    async fn list_sessions(
        &self,
        filter: SessionFilter,
    ) -> Result<Vec<TrainingSession>, StoreError> {
        let (clause, worker) = match filter {
            SessionFilter::All => ("TRUE", None),
            SessionFilter::Worker(id) => ("worker_id = $1", Some(id)),
            SessionFilter::WorkerOrUnassigned(id) => {
                ("(worker_id = $1 OR worker_id IS NULL)", Some(id))
            }
        };
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM training_sessions WHERE {clause} \
             ORDER BY start_time DESC, id DESC"
        );
        let mut query = sqlx::query_as::<_, SessionRow>(&sql);
        if let Some(id) = worker {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(TrainingSession::from).collect())
    }

    async fn append_to_session(
        &self,
        session_id: &str,
        logs: Vec<OperationLog>,
        snapshots: Vec<KpiSnapshot>,
    ) -> Result<TrainingSession, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut session = Self::lock_session(&mut tx, session_id).await?;
        session.append(logs, snapshots)?;
        self.write_session(&mut tx, &session).await?;
        tx.commit().await?;
        Ok(session)
    }

    async fn finish_session(
        &self,
        session_id: &str,
        finish: SessionFinish,
    ) -> Result<TrainingSession, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut session = Self::lock_session(&mut tx, session_id).await?;
        session.finish(finish)?;
        self.write_session(&mut tx, &session).await?;
        tx.commit().await?;
        info!(session_id, status = session.status.as_str(), "Session finished");
        Ok(session)
    }

    async fn insert_record(
        &self,
        kind: RecordKind,
        worker_id: Option<i64>,
        body: Value,
    ) -> Result<StoredRecord, StoreError> {
        let row: RecordRow = sqlx::query_as(
            "INSERT INTO worker_records (kind, worker_id, body) VALUES ($1, $2, $3) \
             RETURNING id, kind, worker_id, body, created_at, updated_at",
        )
        .bind(kind.as_str())
        .bind(worker_id)
        .bind(&body)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_record(&self, kind: RecordKind, id: i64) -> Result<StoredRecord, StoreError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT id, kind, worker_id, body, created_at, updated_at \
             FROM worker_records WHERE id = $1 AND kind = $2",
        )
        .bind(id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::not_found(kind.label()))?
            .try_into()
    }

    async fn list_records(
        &self,
        kind: RecordKind,
        scope: RecordScope,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let (clause, worker) = match scope {
            RecordScope::All => ("TRUE", None),
            RecordScope::Worker(id) => ("worker_id = $2", Some(id)),
            RecordScope::Unassigned => ("worker_id IS NULL", None),
            RecordScope::WorkerOrUnassigned(id) => {
                ("(worker_id = $2 OR worker_id IS NULL)", Some(id))
            }
        };
        let sql = format!(
            "SELECT id, kind, worker_id, body, created_at, updated_at \
             FROM worker_records WHERE kind = $1 AND {clause}"
        );
        let mut query = sqlx::query_as::<_, RecordRow>(&sql).bind(kind.as_str());
        if let Some(id) = worker {
            query = query.bind(id);
        }
        let mut records = query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(StoredRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        kind.sort(&mut records);
        Ok(records)
    }

    async fn update_record(
        &self,
        kind: RecordKind,
        id: i64,
        body: Value,
    ) -> Result<StoredRecord, StoreError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "UPDATE worker_records SET body = $3, updated_at = now() \
             WHERE id = $1 AND kind = $2 \
             RETURNING id, kind, worker_id, body, created_at, updated_at",
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(&body)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| StoreError::not_found(kind.label()))?
            .try_into()
    }

    async fn delete_record(&self, kind: RecordKind, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM worker_records WHERE id = $1 AND kind = $2")
            .bind(id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(kind.label()));
        }
        Ok(())
    }
}
