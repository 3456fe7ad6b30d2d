use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IkuseiError;

pub const DEFAULT_WORKER_STATUS: &str = "登録中";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Worker {
    pub id: i64,
    pub name: String,
    pub name_kana: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    pub nationality: Option<String>,
    pub native_language: Option<String>,
    pub visa_status: Option<String>,
    pub visa_expiry_date: Option<NaiveDate>,
    pub japanese_level: Option<String>,
    pub current_status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create/update payload. Absent fields are left untouched on update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerInput {
    pub name: Option<String>,
    pub name_kana: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub nationality: Option<String>,
    pub native_language: Option<String>,
    pub visa_status: Option<String>,
    #[serde(default, deserialize_with = "crate::models::lenient::opt_date::deserialize")]
    pub visa_expiry_date: Option<NaiveDate>,
    pub japanese_level: Option<String>,
    pub current_status: Option<String>,
    pub notes: Option<String>,
}

fn non_blank(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl WorkerInput {
    /// Build a new worker; `id` is assigned by the store.
    pub fn into_worker(self) -> Result<Worker, IkuseiError> {
        let (Some(name), Some(email)) = (non_blank(&self.name), non_blank(&self.email)) else {
            return Err(IkuseiError::validation("Name and email are required"));
        };
        let now = Utc::now();
        Ok(Worker {
            id: 0,
            name: name.to_string(),
            email: email.to_string(),
            name_kana: self.name_kana,
            phone: self.phone,
            nationality: self.nationality,
            native_language: self.native_language,
            visa_status: self.visa_status,
            visa_expiry_date: self.visa_expiry_date,
            japanese_level: self.japanese_level,
            current_status: non_blank(&self.current_status)
                .unwrap_or(DEFAULT_WORKER_STATUS)
                .to_string(),
            notes: self.notes,
            created_at: now,
            updated_at: now,
        })
    }

    /// Overlay the supplied fields onto an existing worker.
    pub fn apply_to(self, worker: &mut Worker) -> Result<(), IkuseiError> {
        if self.name.is_some() {
            worker.name = non_blank(&self.name)
                .ok_or_else(|| IkuseiError::validation("Name cannot be empty"))?
                .to_string();
        }
        if self.email.is_some() {
            worker.email = non_blank(&self.email)
                .ok_or_else(|| IkuseiError::validation("Email cannot be empty"))?
                .to_string();
        }
        if let Some(status) = non_blank(&self.current_status) {
            worker.current_status = status.to_string();
        }
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if self.$field.is_some() { worker.$field = self.$field; })*
            };
        }
        overlay!(
            name_kana,
            phone,
            nationality,
            native_language,
            visa_status,
            visa_expiry_date,
            japanese_level,
            notes
        );
        worker.updated_at = Utc::now();
        Ok(())
    }
}
