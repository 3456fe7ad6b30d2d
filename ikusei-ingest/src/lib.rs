//! Simulator upload payloads and their conversion into [`TrainingSession`]s.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use ikusei_core::models::{
    parse_datetime, KpiScore, KpiSnapshot, OperationLog, Position, SessionStatus, TrainingSession,
};

#[derive(Error, Debug, PartialEq)]
pub enum IngestError {
    #[error("sessionId is required")]
    MissingSessionId,

    #[error("Invalid timestamp for {field}: {value}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("Invalid status: {0}")]
    InvalidStatus(String),
}

impl From<IngestError> for ikusei_core::IkuseiError {
    fn from(e: IngestError) -> Self {
        ikusei_core::IkuseiError::Validation(e.to_string())
    }
}

/// Final scorecard as sent by the simulator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnityKpi {
    pub safety_score: Option<f64>,
    pub error_count: Option<i64>,
    pub procedure_compliance_rate: Option<f64>,
    pub work_time_seconds: Option<i64>,
    pub achievement_rate: Option<f64>,
    pub accuracy_score: Option<f64>,
    pub efficiency_score: Option<f64>,
    pub overall_score: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnityOperationLog {
    pub timestamp: Option<String>,
    pub operation_type: Option<String>,
    pub operation_value: Option<f64>,
    pub equipment_state: Option<Value>,
    pub position_x: Option<f64>,
    pub position_y: Option<f64>,
    pub position_z: Option<f64>,
    pub velocity: Option<f64>,
    pub error_event: Option<bool>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnityKpiSnapshot {
    pub timestamp: Option<String>,
    pub safety_score: Option<f64>,
    pub error_count: Option<i64>,
    pub procedure_compliance_rate: Option<f64>,
    pub achievement_rate: Option<f64>,
    pub overall_score: Option<f64>,
    pub error_event: Option<bool>,
    pub error_description: Option<String>,
}

/// Upload body of `POST /api/training-sessions`.
///
/// Mostly camelCase; the timing fields and `training_menu_id` arrive in
/// snake_case.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnityUpload {
    pub session_id: Option<String>,
    pub trainee_id: Option<i64>,
    #[serde(rename = "training_menu_id")]
    pub training_menu_id: Option<i64>,
    #[serde(rename = "session_start_time")]
    pub session_start_time: Option<String>,
    #[serde(rename = "session_end_time")]
    pub session_end_time: Option<String>,
    #[serde(rename = "duration_seconds")]
    pub duration_seconds: Option<i64>,
    pub status: Option<String>,
    pub kpi: Option<UnityKpi>,
    #[serde(default)]
    pub operation_logs: Vec<UnityOperationLog>,
    pub kpi_timeline: Option<Vec<UnityKpiSnapshot>>,
    pub ai_evaluation: Option<Value>,
}

fn timestamp(
    field: &'static str,
    raw: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, IngestError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(now),
        Some(s) => parse_datetime(s)
            .map(|dt: NaiveDateTime| dt.and_utc())
            .ok_or_else(|| IngestError::InvalidTimestamp {
                field,
                value: s.to_string(),
            }),
    }
}

impl From<UnityKpi> for KpiScore {
    fn from(k: UnityKpi) -> Self {
        KpiScore {
            safety_score: k.safety_score,
            error_count: Some(k.error_count.unwrap_or(0)),
            procedure_compliance_rate: k.procedure_compliance_rate,
            work_time_seconds: k.work_time_seconds,
            achievement_rate: k.achievement_rate,
            accuracy_score: k.accuracy_score,
            efficiency_score: k.efficiency_score,
            overall_score: k.overall_score,
            notes: k.notes,
        }
    }
}

impl UnityOperationLog {
    fn into_log(self, now: DateTime<Utc>) -> Result<OperationLog, IngestError> {
        let position = if self.position_x.is_some()
            || self.position_y.is_some()
            || self.position_z.is_some()
        {
            Some(Position {
                x: self.position_x,
                y: self.position_y,
                z: self.position_z,
            })
        } else {
            None
        };
        Ok(OperationLog {
            timestamp: timestamp("operationLogs.timestamp", self.timestamp.as_deref(), now)?,
            operation_type: self.operation_type.unwrap_or_default(),
            operation_value: self.operation_value,
            error_event: self.error_event.unwrap_or(false),
            error_description: self.error_description,
            position,
            velocity: self.velocity,
            equipment_state: self.equipment_state,
        })
    }
}

impl UnityKpiSnapshot {
    fn into_snapshot(self, now: DateTime<Utc>) -> Result<KpiSnapshot, IngestError> {
        Ok(KpiSnapshot {
            timestamp: timestamp("kpiTimeline.timestamp", self.timestamp.as_deref(), now)?,
            safety_score: self.safety_score,
            error_count: self.error_count,
            procedure_compliance_rate: self.procedure_compliance_rate,
            achievement_rate: self.achievement_rate,
            overall_score: self.overall_score,
            error_event: self.error_event.unwrap_or(false),
            error_description: self.error_description,
        })
    }
}

/// One snapshot per log carrying the final scores, with a running error count.
fn derive_timeline(logs: &[OperationLog], kpi: &KpiScore) -> Vec<KpiSnapshot> {
    let mut errors = 0;
    logs.iter()
        .map(|log| {
            if log.error_event {
                errors += 1;
            }
            KpiSnapshot {
                timestamp: log.timestamp,
                safety_score: kpi.safety_score,
                error_count: Some(errors),
                procedure_compliance_rate: kpi.procedure_compliance_rate,
                achievement_rate: kpi.achievement_rate,
                overall_score: kpi.overall_score,
                error_event: log.error_event,
                error_description: log.error_description.clone(),
            }
        })
        .collect()
}

impl UnityUpload {
    pub fn into_session(self) -> Result<TrainingSession, IngestError> {
        self.into_session_at(Utc::now())
    }

    /// Convert using `now` for every missing timestamp.
    pub fn into_session_at(self, now: DateTime<Utc>) -> Result<TrainingSession, IngestError> {
        let session_id = self
            .session_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(IngestError::MissingSessionId)?;

        let start = timestamp("session_start_time", self.session_start_time.as_deref(), now)?;
        let end = timestamp("session_end_time", self.session_end_time.as_deref(), now)?;
        let duration = self
            .duration_seconds
            .unwrap_or_else(|| (end - start).num_seconds())
            .max(0);

        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => SessionStatus::Completed,
            Some(s) => SessionStatus::parse(s)
                .ok_or_else(|| IngestError::InvalidStatus(s.to_string()))?,
        };

        let mut logs = self
            .operation_logs
            .into_iter()
            .map(|l| l.into_log(now))
            .collect::<Result<Vec<_>, _>>()?;
        logs.sort_by_key(|l| l.timestamp);

        let kpi: Option<KpiScore> = self.kpi.map(Into::into);

        let kpi_timeline = match self.kpi_timeline {
            Some(snaps) => {
                let mut snaps = snaps
                    .into_iter()
                    .map(|s| s.into_snapshot(now))
                    .collect::<Result<Vec<_>, _>>()?;
                snaps.sort_by_key(|s| s.timestamp);
                snaps
            }
            None => kpi.as_ref().map(|k| derive_timeline(&logs, k)).unwrap_or_default(),
        };

        tracing::debug!(
            session_id = %session_id,
            logs = logs.len(),
            snapshots = kpi_timeline.len(),
            "Converted simulator upload"
        );

        let mut session = TrainingSession::start(session_id, self.trainee_id, start);
        session.training_menu_id = self.training_menu_id;
        session.end_time = Some(end);
        session.duration_seconds = Some(duration);
        session.status = status;
        session.kpi = kpi;
        session.operation_logs = logs;
        session.kpi_timeline = kpi_timeline;
        session.ai_evaluation = self.ai_evaluation.unwrap_or(Value::Null);
        Ok(session)
    }
}
