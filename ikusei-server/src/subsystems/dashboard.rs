//! Integrated worker dashboard and the admin summary.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use ikusei_core::aggregate::{self, IntegratedDashboard, WorkerRecords};
use ikusei_core::models::{RecordKind, RecordScope, SessionFilter, StoredRecord, TrainingSession};

use super::auth;
use crate::http::{ok, ApiPath, ApiResult, HttpState};

pub async fn integrated_inner(state: &HttpState, headers: &HeaderMap, worker_id: i64) -> ApiResult {
    if worker_id == 0 {
        return ok(serde_json::to_value(IntegratedDashboard::empty())?);
    }
    let user = auth::caller(state, headers).await?;
    auth::ensure_can_view_worker(user.as_ref(), Some(worker_id))?;

    let worker = state.store.get_worker(worker_id).await?;
    let sessions = state.store.list_sessions(SessionFilter::Worker(worker_id)).await?;
    let mut records = Vec::new();
    for kind in [
        RecordKind::JapaneseProficiency,
        RecordKind::Milestone,
        RecordKind::Progress,
    ] {
        records.extend(state.store.list_records(kind, RecordScope::Worker(worker_id)).await?);
    }

    let dashboard =
        aggregate::integrated_dashboard(&worker, &sessions, &records, &state.config.dashboard);
    ok(serde_json::to_value(dashboard)?)
}

fn group_by_worker<T>(
    items: Vec<T>,
    worker_of: impl Fn(&T) -> Option<i64>,
) -> HashMap<i64, Vec<T>> {
    let mut grouped: HashMap<i64, Vec<T>> = HashMap::new();
    for item in items {
        if let Some(id) = worker_of(&item) {
            grouped.entry(id).or_default().push(item);
        }
    }
    grouped
}

pub async fn admin_summary_inner(state: &HttpState, headers: &HeaderMap) -> ApiResult {
    let user = auth::caller(state, headers).await?;
    auth::ensure_not_trainee(user.as_ref())?;

    let workers = state.store.list_workers().await?;
    let mut sessions = group_by_worker(
        state.store.list_sessions(SessionFilter::All).await?,
        |s: &TrainingSession| s.worker_id,
    );
    let mut proficiencies = group_by_worker(
        state
            .store
            .list_records(RecordKind::JapaneseProficiency, RecordScope::All)
            .await?,
        |r: &StoredRecord| r.worker_id,
    );
    let mut milestones = group_by_worker(
        state
            .store
            .list_records(RecordKind::Milestone, RecordScope::All)
            .await?,
        |r: &StoredRecord| r.worker_id,
    );

    let per_worker: Vec<WorkerRecords> = workers
        .into_iter()
        .map(|worker| {
            let id = worker.id;
            WorkerRecords {
                worker,
                sessions: sessions.remove(&id).unwrap_or_default(),
                proficiencies: proficiencies.remove(&id).unwrap_or_default(),
                milestones: milestones.remove(&id).unwrap_or_default(),
            }
        })
        .collect();

    let summary = aggregate::admin_summary(&per_worker, &state.config.alerts);
    tracing::debug!(
        workers = summary.total_workers,
        alerts = summary.alerts.len(),
        "Admin summary computed"
    );
    ok(serde_json::to_value(summary)?)
}

pub async fn integrated_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    ApiPath(worker_id): ApiPath<i64>,
) -> Response {
    state.respond(integrated_inner(&state, &headers, worker_id).await)
}

pub async fn admin_summary_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> Response {
    state.respond(admin_summary_inner(&state, &headers).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use ikusei_core::models::{KpiScore, WorkerInput};
    use ikusei_core::{IkuseiConfig, MemoryStore};
    use serde_json::json;

    async fn seeded() -> (HttpState, i64) {
        let state = HttpState::new(Arc::new(MemoryStore::new()), IkuseiConfig::default());
        let input: WorkerInput =
            serde_json::from_value(json!({"name": "Le", "email": "le@example.com"})).unwrap();
        let worker = state
            .store
            .insert_worker(input.into_worker().unwrap())
            .await
            .unwrap();

        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        for (i, (score, errors)) in [(70.0, 2), (45.0, 12)].into_iter().enumerate() {
            let mut s = TrainingSession::start(format!("S{i}"), Some(worker.id), t0 + Duration::days(i as i64));
            s.duration_seconds = Some(1800);
            s.status = ikusei_core::models::SessionStatus::Completed;
            s.kpi = Some(KpiScore {
                overall_score: Some(score),
                error_count: Some(errors),
                ..KpiScore::default()
            });
            state.store.insert_session(s).await.unwrap();
        }
        let body = RecordKind::Milestone
            .normalize(json!({"milestone_name": "N4", "milestone_type": "language", "status": "achieved"}))
            .unwrap();
        state
            .store
            .insert_record(RecordKind::Milestone, Some(worker.id), body)
            .await
            .unwrap();
        (state, worker.id)
    }

    // ========================================================================
    // TEST 1: Integrated dashboard summary
    // ========================================================================
    #[tokio::test]
    async fn test_integrated_dashboard() {
        let (state, wid) = seeded().await;
        let (_, body) = integrated_inner(&state, &HeaderMap::new(), wid).await.unwrap();
        let summary = &body["data"]["summary"];
        assert_eq!(summary["total_sessions"], 2);
        assert_eq!(summary["total_training_hours"], 1.0);
        assert_eq!(summary["average_overall_score"], 57.5);
        assert_eq!(summary["latest_overall_score"], 45.0);
        assert_eq!(summary["milestone_achievement_rate"], 100.0);
        assert_eq!(body["data"]["kpi_timeline"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["recent_milestones"][0]["milestone_name"], "N4");
    }

    // ========================================================================
    // TEST 2: Worker 0 gets an empty dashboard, unknown worker 404
    // ========================================================================
    #[tokio::test]
    async fn test_integrated_dashboard_edge_ids() {
        let (state, _) = seeded().await;
        let (_, body) = integrated_inner(&state, &HeaderMap::new(), 0).await.unwrap();
        assert_eq!(body["data"]["summary"]["total_sessions"], 0);
        assert!(body["data"]["summary"]["average_overall_score"].is_null());

        let err = integrated_inner(&state, &HeaderMap::new(), 77).await.unwrap_err();
        assert_eq!(err.to_string(), "Worker not found");
    }

    // ========================================================================
    // TEST 3: Admin summary raises both alerts for the latest session
    // ========================================================================
    #[tokio::test]
    async fn test_admin_summary_alerts() {
        let (state, wid) = seeded().await;
        let (_, body) = admin_summary_inner(&state, &HeaderMap::new()).await.unwrap();
        let data = &body["data"];
        assert_eq!(data["total_workers"], 1);
        assert_eq!(data["workers_with_low_kpi"], 1);
        assert_eq!(data["workers_with_high_errors"], 1);
        assert_eq!(data["summary"][0]["worker_id"], wid);
        assert_eq!(data["summary"][0]["latest_kpi"]["overall_score"], 45.0);

        let kinds: Vec<&str> = data["alerts"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|a| a["type"].as_str())
            .collect();
        assert!(kinds.contains(&"low_kpi"));
        assert!(kinds.contains(&"high_error"));
    }
}
