//! Derived views over a worker's sessions and records. Everything here is pure
//! and recomputed on every request.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::config::{AlertConfig, DashboardConfig};
use crate::models::{
    JapaneseProficiency, Milestone, MilestoneStatus, ProgressRecord, StoredRecord, TrainingSession,
    Worker,
};

/// Round half away from zero.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Clamp into `[0, 100]`; NaN becomes 0.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

fn achievement_rate(achieved: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    clamp_percent(round_to(achieved as f64 / total as f64 * 100.0, 1))
}

// ============================================================================
// Worker summary
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSummary {
    pub total_sessions: usize,
    pub total_training_hours: f64,
    pub average_overall_score: Option<f64>,
    pub latest_overall_score: Option<f64>,
    pub total_milestones: usize,
    pub achieved_milestones: usize,
    pub milestone_achievement_rate: f64,
}

impl WorkerSummary {
    pub fn empty() -> Self {
        summarize(&[], &[])
    }
}

pub fn summarize(sessions: &[TrainingSession], milestones: &[Milestone]) -> WorkerSummary {
    let total_seconds = sessions
        .iter()
        .map(|s| s.duration_seconds.unwrap_or(0).max(0))
        .fold(0i64, i64::saturating_add);

    let scores: Vec<f64> = sessions.iter().filter_map(|s| s.overall_score()).collect();
    let average = if scores.is_empty() {
        None
    } else {
        Some(round_to(scores.iter().sum::<f64>() / scores.len() as f64, 1))
    };

    let latest = sessions
        .iter()
        .filter_map(|s| s.overall_score().map(|score| (s.start_time, score)))
        .max_by_key(|(start, _)| *start)
        .map(|(_, score)| round_to(score, 1));

    let achieved = milestones.iter().filter(|m| m.is_achieved()).count();

    WorkerSummary {
        total_sessions: sessions.len(),
        total_training_hours: round_to(total_seconds as f64 / 3600.0, 2),
        average_overall_score: average,
        latest_overall_score: latest,
        total_milestones: milestones.len(),
        achieved_milestones: achieved,
        milestone_achievement_rate: achievement_rate(achieved, milestones.len()),
    }
}

// ============================================================================
// Integrated dashboard
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiPoint {
    pub date: DateTime<Utc>,
    pub session_id: String,
    pub safety_score: Option<f64>,
    pub error_count: Option<i64>,
    pub procedure_compliance_rate: Option<f64>,
    pub achievement_rate: Option<f64>,
    pub overall_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProficiencyPoint {
    pub date: NaiveDate,
    pub test_type: String,
    pub level: Option<String>,
    pub total_score: Option<i64>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MilestoneDigest {
    pub id: i64,
    pub milestone_name: String,
    pub milestone_type: String,
    pub target_date: Option<NaiveDate>,
    pub achieved_date: Option<NaiveDate>,
    pub status: MilestoneStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressDigest {
    pub id: i64,
    pub progress_date: NaiveDate,
    pub progress_type: String,
    pub title: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegratedDashboard {
    pub worker_id: i64,
    pub worker_name: Option<String>,
    pub kpi_timeline: Vec<KpiPoint>,
    pub japanese_proficiency: Vec<ProficiencyPoint>,
    pub summary: WorkerSummary,
    pub recent_milestones: Vec<MilestoneDigest>,
    pub recent_progress: Vec<ProgressDigest>,
}

impl IntegratedDashboard {
    /// Placeholder returned for worker id 0.
    pub fn empty() -> Self {
        Self {
            worker_id: 0,
            worker_name: None,
            kpi_timeline: Vec::new(),
            japanese_proficiency: Vec::new(),
            summary: WorkerSummary::empty(),
            recent_milestones: Vec::new(),
            recent_progress: Vec::new(),
        }
    }
}

/// Newest-first typed view over stored records of one kind.
fn recent<T: crate::models::RecordBody>(records: &[StoredRecord], limit: usize) -> Vec<(i64, T)> {
    let mut sorted: Vec<StoredRecord> = records
        .iter()
        .filter(|r| r.kind == T::KIND)
        .cloned()
        .collect();
    T::KIND.sort(&mut sorted);
    sorted
        .iter()
        .filter_map(|r| r.parse::<T>().map(|t| (r.id, t)))
        .take(limit)
        .collect()
}

/// Build the integrated dashboard. `records` may hold any mix of the
/// worker's record kinds; the summary covers every session and milestone
/// while the lists are capped by `limits`.
pub fn integrated_dashboard(
    worker: &Worker,
    sessions: &[TrainingSession],
    records: &[StoredRecord],
    limits: &DashboardConfig,
) -> IntegratedDashboard {
    let mut ordered: Vec<&TrainingSession> = sessions.iter().collect();
    ordered.sort_by(|a, b| b.start_time.cmp(&a.start_time));

    let kpi_timeline = ordered
        .iter()
        .take(limits.session_limit)
        .filter_map(|s| {
            s.kpi.as_ref().map(|k| KpiPoint {
                date: s.start_time,
                session_id: s.session_id.clone(),
                safety_score: k.safety_score,
                error_count: k.error_count,
                procedure_compliance_rate: k.procedure_compliance_rate,
                achievement_rate: k.achievement_rate,
                overall_score: k.overall_score,
            })
        })
        .collect();

    let japanese_proficiency = recent::<JapaneseProficiency>(records, limits.proficiency_limit)
        .into_iter()
        .map(|(_, p)| ProficiencyPoint {
            date: p.test_date,
            test_type: p.test_type,
            level: p.level,
            total_score: p.total_score,
            passed: p.passed,
        })
        .collect();

    let all_milestones: Vec<Milestone> = records.iter().filter_map(|r| r.parse()).collect();
    let recent_milestones = recent::<Milestone>(records, limits.milestone_limit)
        .into_iter()
        .map(|(id, m)| MilestoneDigest {
            id,
            milestone_name: m.milestone_name,
            milestone_type: m.milestone_type,
            target_date: m.target_date,
            achieved_date: m.achieved_date,
            status: m.status,
        })
        .collect();

    let recent_progress = recent::<ProgressRecord>(records, limits.progress_limit)
        .into_iter()
        .map(|(id, p)| ProgressDigest {
            id,
            progress_date: p.progress_date,
            progress_type: p.progress_type,
            title: p.title,
            status: p.status,
        })
        .collect();

    IntegratedDashboard {
        worker_id: worker.id,
        worker_name: Some(worker.name.clone()),
        kpi_timeline,
        japanese_proficiency,
        summary: summarize(sessions, &all_milestones),
        recent_milestones,
        recent_progress,
    }
}

// ============================================================================
// Admin summary
// ============================================================================

/// Everything the admin summary needs about one worker.
#[derive(Debug, Clone)]
pub struct WorkerRecords {
    pub worker: Worker,
    pub sessions: Vec<TrainingSession>,
    pub proficiencies: Vec<StoredRecord>,
    pub milestones: Vec<StoredRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestKpi {
    pub safety_score: Option<f64>,
    pub error_count: Option<i64>,
    pub overall_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestProficiency {
    pub test_type: String,
    pub level: Option<String>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MilestoneTally {
    pub achieved: usize,
    pub total: usize,
    pub achievement_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerDigest {
    pub worker_id: i64,
    pub worker_name: String,
    pub japanese_level: Option<String>,
    pub current_status: String,
    pub latest_kpi: Option<LatestKpi>,
    pub latest_proficiency: Option<LatestProficiency>,
    pub milestones: MilestoneTally,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowKpi,
    HighError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub worker_id: i64,
    pub worker_name: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub message: String,
    pub priority: AlertPriority,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminSummary {
    pub summary: Vec<WorkerDigest>,
    pub alerts: Vec<Alert>,
    pub total_workers: usize,
    pub workers_with_low_kpi: usize,
    pub workers_with_high_errors: usize,
}

fn digest(data: &WorkerRecords) -> WorkerDigest {
    // the latest session decides the KPI even when it was not scored
    let latest_kpi = data
        .sessions
        .iter()
        .max_by_key(|s| s.start_time)
        .and_then(|s| s.kpi.as_ref())
        .map(|k| LatestKpi {
            safety_score: k.safety_score,
            error_count: k.error_count,
            overall_score: k.overall_score,
        });

    let latest_proficiency = recent::<JapaneseProficiency>(&data.proficiencies, 1)
        .into_iter()
        .next()
        .map(|(_, p)| LatestProficiency {
            test_type: p.test_type,
            level: p.level,
            passed: p.passed,
        });

    let milestones: Vec<Milestone> = data.milestones.iter().filter_map(|r| r.parse()).collect();
    let achieved = milestones.iter().filter(|m| m.is_achieved()).count();

    WorkerDigest {
        worker_id: data.worker.id,
        worker_name: data.worker.name.clone(),
        japanese_level: data.worker.japanese_level.clone(),
        current_status: data.worker.current_status.clone(),
        latest_kpi,
        latest_proficiency,
        milestones: MilestoneTally {
            achieved,
            total: milestones.len(),
            achievement_rate: achievement_rate(achieved, milestones.len()),
        },
    }
}

fn alerts_for(d: &WorkerDigest, thresholds: &AlertConfig) -> Vec<Alert> {
    let Some(kpi) = &d.latest_kpi else {
        return Vec::new();
    };
    let mut alerts = Vec::new();
    if let Some(score) = kpi.overall_score.filter(|s| *s < thresholds.low_score_threshold) {
        alerts.push(Alert {
            worker_id: d.worker_id,
            worker_name: d.worker_name.clone(),
            kind: AlertKind::LowKpi,
            message: format!("総合スコアが低いです ({score:.1})"),
            priority: AlertPriority::High,
        });
    }
    if let Some(errors) = kpi.error_count.filter(|e| *e >= thresholds.high_error_threshold) {
        alerts.push(Alert {
            worker_id: d.worker_id,
            worker_name: d.worker_name.clone(),
            kind: AlertKind::HighError,
            message: format!("エラー件数が多いです ({errors}件)"),
            priority: AlertPriority::Medium,
        });
    }
    alerts
}

pub fn admin_summary(workers: &[WorkerRecords], thresholds: &AlertConfig) -> AdminSummary {
    let summary: Vec<WorkerDigest> = workers.iter().map(digest).collect();
    let alerts: Vec<Alert> = summary
        .iter()
        .flat_map(|d| alerts_for(d, thresholds))
        .collect();
    let count = |kind: AlertKind| alerts.iter().filter(|a| a.kind == kind).count();

    AdminSummary {
        total_workers: workers.len(),
        workers_with_low_kpi: count(AlertKind::LowKpi),
        workers_with_high_errors: count(AlertKind::HighError),
        summary,
        alerts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KpiScore, RecordKind, WorkerInput};
    use chrono::TimeZone;
    use serde_json::json;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, day, 9, 0, 0).unwrap()
    }

    fn session(id: &str, day: u32, secs: Option<i64>, score: Option<f64>) -> TrainingSession {
        let mut s = TrainingSession::start(id, Some(1), at(day));
        s.duration_seconds = secs;
        s.kpi = score.map(|o| KpiScore {
            overall_score: Some(o),
            error_count: Some(2),
            ..KpiScore::default()
        });
        s
    }

    fn milestone(status: MilestoneStatus) -> Milestone {
        Milestone {
            milestone_name: "m".into(),
            milestone_type: "t".into(),
            target_date: None,
            achieved_date: None,
            status,
            certificate_number: None,
            notes: None,
        }
    }

    fn record(id: i64, kind: RecordKind, body: serde_json::Value) -> StoredRecord {
        StoredRecord {
            id,
            kind,
            worker_id: Some(1),
            body: kind.normalize(body).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn worker() -> Worker {
        let mut w = serde_json::from_value::<WorkerInput>(json!({
            "name": "Tran Thi B", "email": "b@example.com", "japanese_level": "N4"
        }))
        .unwrap()
        .into_worker()
        .unwrap();
        w.id = 1;
        w
    }

    #[test]
    fn test_summary_of_nothing() {
        let s = summarize(&[], &[]);
        assert_eq!(s.total_sessions, 0);
        assert_eq!(s.total_training_hours, 0.0);
        assert_eq!(s.average_overall_score, None);
        assert_eq!(s.latest_overall_score, None);
        assert_eq!(s.milestone_achievement_rate, 0.0);
    }

    #[test]
    fn test_summary_hours_and_scores() {
        let sessions = vec![
            session("a", 1, Some(1800), Some(70.0)),
            session("b", 3, Some(2700), None),
            session("c", 2, Some(-50), Some(85.4)),
        ];
        let s = summarize(&sessions, &[]);
        assert_eq!(s.total_sessions, 3);
        // 4500s = 1.25h, negative duration ignored
        assert_eq!(s.total_training_hours, 1.25);
        assert_eq!(s.average_overall_score, Some(77.7));
        // newest session is unscored so the next scored one wins
        assert_eq!(s.latest_overall_score, Some(85.4));
    }

    #[test]
    fn test_summary_hours_saturate_on_huge_durations() {
        let sessions = vec![
            session("a", 1, Some(i64::MAX), None),
            session("b", 2, Some(100_000_000_000_000_000), None),
        ];
        let s = summarize(&sessions, &[]);
        assert_eq!(s.total_sessions, 2);
        assert!(s.total_training_hours.is_finite());
        assert!(s.total_training_hours >= 100_000_000_000_000_000.0 / 3600.0);
    }

    #[test]
    fn test_milestone_rate() {
        let ms = vec![
            milestone(MilestoneStatus::Achieved),
            milestone(MilestoneStatus::InProgress),
            milestone(MilestoneStatus::NotAchieved),
        ];
        let s = summarize(&[], &ms);
        assert_eq!(s.achieved_milestones, 1);
        assert_eq!(s.milestone_achievement_rate, 33.3);
    }

    #[test]
    fn test_rate_stays_within_bounds() {
        for total in 1..20usize {
            for achieved in 0..=total {
                let r = achievement_rate(achieved, total);
                assert!((0.0..=100.0).contains(&r), "{achieved}/{total} -> {r}");
            }
        }
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_percent(140.0), 100.0);
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_to(2.25, 1), 2.3);
        assert_eq!(round_to(-2.25, 1), -2.3);
        assert_eq!(round_to(1.005_1, 2), 1.01);
    }

    #[test]
    fn test_integrated_dashboard_caps_lists() {
        let sessions: Vec<TrainingSession> = (1..=5)
            .map(|d| session(&format!("s{d}"), d, Some(600), Some(60.0 + d as f64)))
            .collect();
        let mut records = Vec::new();
        for (i, day) in (1..=7).enumerate() {
            records.push(record(
                i as i64 + 1,
                RecordKind::Progress,
                json!({"progress_date": format!("2025-05-0{day}"), "progress_type": "面談"}),
            ));
        }
        records.push(record(
            20,
            RecordKind::Milestone,
            json!({"milestone_name": "N4", "milestone_type": "jlpt", "status": "達成"}),
        ));
        records.push(record(
            21,
            RecordKind::JapaneseProficiency,
            json!({"test_date": "2025-04-01", "test_type": "JLPT", "level": "N4", "passed": true}),
        ));

        let limits = DashboardConfig {
            session_limit: 3,
            ..DashboardConfig::default()
        };
        let d = integrated_dashboard(&worker(), &sessions, &records, &limits);

        assert_eq!(d.kpi_timeline.len(), 3);
        assert_eq!(d.kpi_timeline[0].session_id, "s5");
        assert_eq!(d.summary.total_sessions, 5);
        assert_eq!(d.recent_progress.len(), 5);
        assert_eq!(d.recent_progress[0].progress_date.to_string(), "2025-05-07");
        assert_eq!(d.recent_milestones.len(), 1);
        assert_eq!(d.summary.milestone_achievement_rate, 100.0);
        assert_eq!(d.japanese_proficiency[0].level.as_deref(), Some("N4"));
    }

    #[test]
    fn test_empty_dashboard_serializes_nulls() {
        let v = serde_json::to_value(IntegratedDashboard::empty()).unwrap();
        assert_eq!(v["summary"]["average_overall_score"], serde_json::Value::Null);
        assert_eq!(v["kpi_timeline"], json!([]));
    }

    #[test]
    fn test_admin_summary_alerts() {
        let mut low = session("low", 9, Some(600), Some(45.0));
        if let Some(k) = low.kpi.as_mut() {
            k.error_count = Some(12);
        }
        let data = WorkerRecords {
            worker: worker(),
            sessions: vec![session("old", 1, Some(600), Some(90.0)), low],
            proficiencies: vec![record(
                1,
                RecordKind::JapaneseProficiency,
                json!({"test_date": "2025-04-01", "test_type": "JFT-Basic", "passed": true}),
            )],
            milestones: vec![record(
                2,
                RecordKind::Milestone,
                json!({"milestone_name": "a", "milestone_type": "b"}),
            )],
        };

        let out = admin_summary(&[data], &AlertConfig::default());
        assert_eq!(out.total_workers, 1);
        assert_eq!(out.workers_with_low_kpi, 1);
        assert_eq!(out.workers_with_high_errors, 1);
        assert_eq!(out.alerts[0].message, "総合スコアが低いです (45.0)");
        assert_eq!(out.alerts[1].message, "エラー件数が多いです (12件)");

        let digest = &out.summary[0];
        assert_eq!(digest.milestones.total, 1);
        assert_eq!(digest.milestones.achievement_rate, 0.0);
        assert_eq!(
            digest.latest_proficiency.as_ref().map(|p| p.test_type.as_str()),
            Some("JFT-Basic")
        );

        let json = serde_json::to_value(&out.alerts[0]).unwrap();
        assert_eq!(json["type"], "low_kpi");
        assert_eq!(json["priority"], "high");
    }

    #[test]
    fn test_admin_summary_unscored_latest_session_has_no_kpi() {
        let data = WorkerRecords {
            worker: worker(),
            sessions: vec![session("scored", 1, None, Some(20.0)), session("bare", 2, None, None)],
            proficiencies: vec![],
            milestones: vec![],
        };
        let out = admin_summary(&[data], &AlertConfig::default());
        assert!(out.summary[0].latest_kpi.is_none());
        assert!(out.alerts.is_empty());
    }
}
