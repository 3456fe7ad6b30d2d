use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a training session. Only `InProgress` sessions accept appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[serde(alias = "in-progress", alias = "実施中")]
    InProgress,
    #[default]
    #[serde(alias = "完了")]
    Completed,
    #[serde(alias = "中断")]
    Interrupted,
    #[serde(alias = "エラー")]
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }

    pub fn is_ended(&self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

/// A single operator input recorded by the simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationLog {
    pub timestamp: DateTime<Utc>,
    pub operation_type: String,
    #[serde(default)]
    pub operation_value: Option<f64>,
    #[serde(default)]
    pub error_event: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equipment_state: Option<serde_json::Value>,
}

/// Point-in-time scorecard on the KPI timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub safety_score: Option<f64>,
    #[serde(default)]
    pub error_count: Option<i64>,
    #[serde(default)]
    pub procedure_compliance_rate: Option<f64>,
    #[serde(default)]
    pub achievement_rate: Option<f64>,
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub error_event: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Final scorecard of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiScore {
    pub safety_score: Option<f64>,
    pub error_count: Option<i64>,
    pub procedure_compliance_rate: Option<f64>,
    pub work_time_seconds: Option<i64>,
    pub achievement_rate: Option<f64>,
    pub accuracy_score: Option<f64>,
    pub efficiency_score: Option<f64>,
    pub overall_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSession {
    /// Store-assigned row id; 0 until inserted.
    #[serde(default)]
    pub id: i64,
    /// Session id sent by the simulator, used in URLs.
    pub session_id: String,
    pub worker_id: Option<i64>,
    #[serde(default)]
    pub training_menu_id: Option<i64>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub kpi: Option<KpiScore>,
    #[serde(default)]
    pub operation_logs: Vec<OperationLog>,
    #[serde(default)]
    pub kpi_timeline: Vec<KpiSnapshot>,
    #[serde(default)]
    pub ai_evaluation: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("session {0} has ended and can no longer be modified")]
pub struct SessionClosed(pub String);

impl TrainingSession {
    /// A fresh in-progress session.
    pub fn start(
        session_id: impl Into<String>,
        worker_id: Option<i64>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            session_id: session_id.into(),
            worker_id,
            training_menu_id: None,
            start_time,
            end_time: None,
            duration_seconds: None,
            status: SessionStatus::InProgress,
            kpi: None,
            operation_logs: Vec::new(),
            kpi_timeline: Vec::new(),
            ai_evaluation: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn is_ended(&self) -> bool {
        self.status.is_ended()
    }

    /// Playback length in milliseconds. Negative or missing durations count as zero.
    pub fn duration_ms(&self) -> u64 {
        (self.duration_seconds.unwrap_or(0).max(0) as u64).saturating_mul(1000)
    }

    /// Milliseconds between session start and `ts` (negative if before start).
    pub fn offset_ms(&self, ts: DateTime<Utc>) -> i64 {
        (ts - self.start_time).num_milliseconds()
    }

    pub fn overall_score(&self) -> Option<f64> {
        self.kpi.as_ref().and_then(|k| k.overall_score)
    }

    /// Append logs and KPI snapshots while the session is running.
    pub fn append(
        &mut self,
        logs: Vec<OperationLog>,
        snapshots: Vec<KpiSnapshot>,
    ) -> Result<(), SessionClosed> {
        if self.is_ended() {
            return Err(SessionClosed(self.session_id.clone()));
        }
        self.operation_logs.extend(logs);
        self.kpi_timeline.extend(snapshots);
        Ok(())
    }

    /// Close the session. Duration is derived from the end time unless given.
    pub fn finish(&mut self, finish: SessionFinish) -> Result<(), SessionClosed> {
        if self.is_ended() {
            return Err(SessionClosed(self.session_id.clone()));
        }
        let end = finish.end_time.unwrap_or_else(Utc::now);
        self.end_time = Some(end);
        self.duration_seconds = Some(
            finish
                .duration_seconds
                .unwrap_or_else(|| (end - self.start_time).num_seconds().max(0)),
        );
        self.status = match finish.status {
            Some(s) if s.is_ended() => s,
            _ => SessionStatus::Completed,
        };
        if finish.kpi.is_some() {
            self.kpi = finish.kpi;
        }
        if let Some(eval) = finish.ai_evaluation {
            self.ai_evaluation = eval;
        }
        Ok(())
    }
}

/// Fields supplied when a running session is closed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFinish {
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub kpi: Option<KpiScore>,
    #[serde(default)]
    pub ai_evaluation: Option<serde_json::Value>,
}

/// Which sessions a listing should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFilter {
    All,
    Worker(i64),
    /// A worker's sessions plus sessions with no worker attached.
    WorkerOrUnassigned(i64),
}

impl SessionFilter {
    pub fn matches(&self, session: &TrainingSession) -> bool {
        match self {
            SessionFilter::All => true,
            SessionFilter::Worker(id) => session.worker_id == Some(*id),
            SessionFilter::WorkerOrUnassigned(id) => {
                session.worker_id.is_none() || session.worker_id == Some(*id)
            }
        }
    }
}
