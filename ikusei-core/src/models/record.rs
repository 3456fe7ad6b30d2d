//! Worker-scoped records and training menus.
//!
//! These entities carry no behaviour beyond validation, so they are stored as
//! JSON bodies tagged with a [`RecordKind`]. Each kind has a typed struct that
//! defines its schema: bodies are normalised by round-tripping through it.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IkuseiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Milestone,
    Progress,
    JapaneseProficiency,
    SkillTraining,
    Document,
    CalendarEvent,
    Notification,
    TrainingMenu,
}

enum SortOrder {
    Desc(&'static str),
    Asc(&'static str),
}

impl RecordKind {
    pub const ALL: [RecordKind; 8] = [
        RecordKind::Milestone,
        RecordKind::Progress,
        RecordKind::JapaneseProficiency,
        RecordKind::SkillTraining,
        RecordKind::Document,
        RecordKind::CalendarEvent,
        RecordKind::Notification,
        RecordKind::TrainingMenu,
    ];

    /// Storage tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Milestone => "milestone",
            RecordKind::Progress => "progress",
            RecordKind::JapaneseProficiency => "japanese_proficiency",
            RecordKind::SkillTraining => "skill_training",
            RecordKind::Document => "document",
            RecordKind::CalendarEvent => "calendar_event",
            RecordKind::Notification => "notification",
            RecordKind::TrainingMenu => "training_menu",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// URL segment under `/api/workers/{id}/`.
    pub fn path_segment(&self) -> &'static str {
        match self {
            RecordKind::Milestone => "milestones",
            RecordKind::Progress => "progress",
            RecordKind::JapaneseProficiency => "japanese-proficiency",
            RecordKind::SkillTraining => "skill-training",
            RecordKind::Document => "documents",
            RecordKind::CalendarEvent => "calendar",
            RecordKind::Notification => "notifications",
            RecordKind::TrainingMenu => "training-menus",
        }
    }

    pub fn from_path_segment(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .filter(|k| k.is_worker_scoped())
            .find(|k| k.path_segment() == s)
    }

    /// Human label used in error messages.
    pub fn label(&self) -> &'static str {
        match self {
            RecordKind::Milestone => "Milestone",
            RecordKind::Progress => "Progress record",
            RecordKind::JapaneseProficiency => "Japanese proficiency record",
            RecordKind::SkillTraining => "Skill training",
            RecordKind::Document => "Document",
            RecordKind::CalendarEvent => "Calendar event",
            RecordKind::Notification => "Notification",
            RecordKind::TrainingMenu => "Training menu",
        }
    }

    pub fn is_worker_scoped(&self) -> bool {
        !matches!(self, RecordKind::TrainingMenu)
    }

    /// Kinds that may be addressed to everyone (no worker).
    pub fn allows_unassigned(&self) -> bool {
        matches!(self, RecordKind::CalendarEvent | RecordKind::Notification)
    }

    /// Scope used when listing a worker's records of this kind.
    pub fn worker_scope(&self, worker_id: i64) -> RecordScope {
        match self {
            RecordKind::CalendarEvent => RecordScope::WorkerOrUnassigned(worker_id),
            _ => RecordScope::Worker(worker_id),
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            RecordKind::Milestone => Milestone::REQUIRED,
            RecordKind::Progress => ProgressRecord::REQUIRED,
            RecordKind::JapaneseProficiency => JapaneseProficiency::REQUIRED,
            RecordKind::SkillTraining => SkillTraining::REQUIRED,
            RecordKind::Document => Document::REQUIRED,
            RecordKind::CalendarEvent => CalendarEvent::REQUIRED,
            RecordKind::Notification => Notification::REQUIRED,
            RecordKind::TrainingMenu => TrainingMenu::REQUIRED,
        }
    }

    fn sort_order(&self) -> SortOrder {
        match self {
            RecordKind::Milestone => SortOrder::Desc("target_date"),
            RecordKind::Progress => SortOrder::Desc("progress_date"),
            RecordKind::JapaneseProficiency => SortOrder::Desc("test_date"),
            RecordKind::SkillTraining => SortOrder::Desc("training_start_date"),
            RecordKind::CalendarEvent => SortOrder::Asc("start_datetime"),
            RecordKind::Document | RecordKind::Notification | RecordKind::TrainingMenu => {
                SortOrder::Desc("created_at")
            }
        }
    }

    /// Order records the way listings present them. Records without the sort
    /// field go last; ties fall back to newest id first.
    pub fn sort(&self, records: &mut [StoredRecord]) {
        let order = self.sort_order();
        let key = |r: &StoredRecord, field: &str| -> Option<String> {
            if field == "created_at" {
                return Some(r.created_at.to_rfc3339());
            }
            r.body.get(field).and_then(Value::as_str).map(str::to_string)
        };
        records.sort_by(|a, b| {
            let (field, desc) = match order {
                SortOrder::Desc(f) => (f, true),
                SortOrder::Asc(f) => (f, false),
            };
            let ord = match (key(a, field), key(b, field)) {
                (Some(x), Some(y)) if desc => y.cmp(&x),
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            ord.then_with(|| b.id.cmp(&a.id))
        });
    }

    /// Validate a create body and bring it into canonical form.
    pub fn normalize(&self, body: Value) -> Result<Value, IkuseiError> {
        let Value::Object(mut map) = body else {
            return Err(IkuseiError::validation("Request body must be a JSON object"));
        };
        for reserved in ["id", "worker_id", "created_at", "updated_at"] {
            map.remove(reserved);
        }

        let missing: Vec<&str> = self
            .required_fields()
            .iter()
            .copied()
            .filter(|f| match map.get(*f) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                _ => false,
            })
            .collect();
        if !missing.is_empty() {
            return Err(IkuseiError::validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let value = Value::Object(map);
        match self {
            RecordKind::Milestone => round_trip::<Milestone>(self, value),
            RecordKind::Progress => round_trip::<ProgressRecord>(self, value),
            RecordKind::JapaneseProficiency => round_trip::<JapaneseProficiency>(self, value),
            RecordKind::SkillTraining => round_trip::<SkillTraining>(self, value),
            RecordKind::Document => round_trip::<Document>(self, value),
            RecordKind::CalendarEvent => round_trip::<CalendarEvent>(self, value),
            RecordKind::Notification => round_trip::<Notification>(self, value),
            RecordKind::TrainingMenu => round_trip::<TrainingMenu>(self, value),
        }
    }

    /// Apply a partial update on top of an existing canonical body.
    pub fn merge(&self, existing: &Value, patch: Value) -> Result<Value, IkuseiError> {
        let Value::Object(patch) = patch else {
            return Err(IkuseiError::validation("Request body must be a JSON object"));
        };
        let mut merged: Map<String, Value> = existing.as_object().cloned().unwrap_or_default();
        merged.extend(patch);
        self.normalize(Value::Object(merged))
    }
}

fn round_trip<T: RecordBody>(kind: &RecordKind, value: Value) -> Result<Value, IkuseiError> {
    let typed: T = serde_json::from_value(value)
        .map_err(|e| IkuseiError::validation(format!("Invalid {}: {e}", kind.label())))?;
    serde_json::to_value(typed).map_err(|e| IkuseiError::Other(e.to_string()))
}

/// Which owner a record listing should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordScope {
    All,
    Worker(i64),
    Unassigned,
    WorkerOrUnassigned(i64),
}

impl RecordScope {
    pub fn matches(&self, worker_id: Option<i64>) -> bool {
        match self {
            RecordScope::All => true,
            RecordScope::Worker(id) => worker_id == Some(*id),
            RecordScope::Unassigned => worker_id.is_none(),
            RecordScope::WorkerOrUnassigned(id) => worker_id.is_none() || worker_id == Some(*id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: i64,
    pub kind: RecordKind,
    pub worker_id: Option<i64>,
    pub body: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Flattened API representation: body fields plus the bookkeeping columns.
    pub fn to_json(&self) -> Value {
        let mut map = self.body.as_object().cloned().unwrap_or_default();
        map.insert("id".into(), Value::from(self.id));
        map.insert(
            "worker_id".into(),
            self.worker_id.map(Value::from).unwrap_or(Value::Null),
        );
        map.insert("created_at".into(), Value::from(self.created_at.to_rfc3339()));
        map.insert("updated_at".into(), Value::from(self.updated_at.to_rfc3339()));
        Value::Object(map)
    }

    /// Decode the body into its typed form.
    pub fn parse<T: RecordBody>(&self) -> Option<T> {
        if self.kind != T::KIND {
            return None;
        }
        serde_json::from_value(self.body.clone()).ok()
    }
}

/// Typed schema of a record kind.
pub trait RecordBody: Serialize + DeserializeOwned {
    const KIND: RecordKind;
    const REQUIRED: &'static [&'static str];
}

// ============================================================================
// Milestone
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    #[serde(alias = "達成")]
    Achieved,
    #[serde(alias = "保留", alias = "in-progress")]
    InProgress,
    #[default]
    #[serde(alias = "未達成", alias = "not-achieved")]
    NotAchieved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub milestone_name: String,
    pub milestone_type: String,
    #[serde(default, deserialize_with = "super::lenient::opt_date::deserialize")]
    pub target_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "super::lenient::opt_date::deserialize")]
    pub achieved_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: MilestoneStatus,
    #[serde(default)]
    pub certificate_number: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecordBody for Milestone {
    const KIND: RecordKind = RecordKind::Milestone;
    const REQUIRED: &'static [&'static str] = &["milestone_name", "milestone_type"];
}

impl Milestone {
    pub fn is_achieved(&self) -> bool {
        self.status == MilestoneStatus::Achieved
    }
}

// ============================================================================
// Progress
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(deserialize_with = "super::lenient::date::deserialize")]
    pub progress_date: NaiveDate,
    pub progress_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_progress_status")]
    pub status: String,
    #[serde(default)]
    pub support_content: Option<String>,
    #[serde(default)]
    pub next_action: Option<String>,
    #[serde(default, deserialize_with = "super::lenient::opt_date::deserialize")]
    pub next_action_date: Option<NaiveDate>,
    #[serde(default)]
    pub support_staff: Option<String>,
}

fn default_progress_status() -> String {
    "実施中".to_string()
}

impl RecordBody for ProgressRecord {
    const KIND: RecordKind = RecordKind::Progress;
    const REQUIRED: &'static [&'static str] = &["progress_date", "progress_type"];
}

// ============================================================================
// Japanese proficiency
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JapaneseProficiency {
    #[serde(deserialize_with = "super::lenient::date::deserialize")]
    pub test_date: NaiveDate,
    pub test_type: String,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub reading_score: Option<i64>,
    #[serde(default)]
    pub listening_score: Option<i64>,
    #[serde(default)]
    pub writing_score: Option<i64>,
    #[serde(default)]
    pub speaking_score: Option<i64>,
    #[serde(default)]
    pub total_score: Option<i64>,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub certificate_number: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RecordBody for JapaneseProficiency {
    const KIND: RecordKind = RecordKind::JapaneseProficiency;
    const REQUIRED: &'static [&'static str] = &["test_date", "test_type"];
}

// ============================================================================
// Skill training
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillTraining {
    pub skill_category: String,
    pub skill_name: String,
    #[serde(deserialize_with = "super::lenient::date::deserialize")]
    pub training_start_date: NaiveDate,
    #[serde(default, deserialize_with = "super::lenient::opt_date::deserialize")]
    pub training_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub training_hours: i64,
    #[serde(default)]
    pub training_location: Option<String>,
    #[serde(default)]
    pub instructor: Option<String>,
    #[serde(default)]
    pub training_method: Option<String>,
    #[serde(default = "default_skill_status")]
    pub status: String,
    #[serde(default)]
    pub completion_rate: Option<f64>,
    #[serde(default)]
    pub evaluation_score: Option<f64>,
    #[serde(default)]
    pub certificate_issued: bool,
    #[serde(default)]
    pub certificate_number: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_skill_status() -> String {
    "受講中".to_string()
}

impl RecordBody for SkillTraining {
    const KIND: RecordKind = RecordKind::SkillTraining;
    const REQUIRED: &'static [&'static str] =
        &["skill_category", "skill_name", "training_start_date"];
}

// ============================================================================
// Document
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_type: String,
    pub title: String,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "super::lenient::opt_date::deserialize")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub uploaded_by: Option<String>,
}

impl RecordBody for Document {
    const KIND: RecordKind = RecordKind::Document;
    const REQUIRED: &'static [&'static str] = &["document_type", "title"];
}

// ============================================================================
// Calendar event
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub event_type: String,
    #[serde(deserialize_with = "super::lenient::datetime::deserialize")]
    pub start_datetime: NaiveDateTime,
    #[serde(deserialize_with = "super::lenient::datetime::deserialize")]
    pub end_datetime: NaiveDateTime,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Option<String>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub reminder_minutes: Option<i64>,
    #[serde(default = "default_event_color")]
    pub color: String,
}

fn default_event_color() -> String {
    "blue".to_string()
}

impl RecordBody for CalendarEvent {
    const KIND: RecordKind = RecordKind::CalendarEvent;
    const REQUIRED: &'static [&'static str] =
        &["title", "event_type", "start_datetime", "end_datetime"];
}

// ============================================================================
// Notification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub notification_type: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, deserialize_with = "super::lenient::opt_datetime::deserialize")]
    pub read_at: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "super::lenient::opt_datetime::deserialize")]
    pub scheduled_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub related_type: Option<String>,
    #[serde(default)]
    pub related_id: Option<i64>,
}

fn default_priority() -> String {
    "normal".to_string()
}

impl RecordBody for Notification {
    const KIND: RecordKind = RecordKind::Notification;
    const REQUIRED: &'static [&'static str] = &["title", "message", "notification_type"];
}

// ============================================================================
// Training menu
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMenu {
    pub menu_name: String,
    pub scenario_id: String,
    #[serde(default)]
    pub scenario_description: Option<String>,
    #[serde(default)]
    pub target_safety_score: Option<f64>,
    #[serde(default)]
    pub target_error_count: Option<i64>,
    #[serde(default)]
    pub target_procedure_compliance: Option<f64>,
    #[serde(default)]
    pub target_work_time: Option<i64>,
    #[serde(default)]
    pub target_achievement_rate: Option<f64>,
    pub equipment_type: String,
    pub difficulty_level: String,
    #[serde(default)]
    pub time_limit: Option<i64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_true() -> bool {
    true
}

impl RecordBody for TrainingMenu {
    const KIND: RecordKind = RecordKind::TrainingMenu;
    const REQUIRED: &'static [&'static str] =
        &["menu_name", "scenario_id", "equipment_type", "difficulty_level"];
}
