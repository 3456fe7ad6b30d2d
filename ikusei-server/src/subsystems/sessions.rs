//! Training sessions: simulator ingest, listings, live appends and replay data.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use ikusei_core::models::{KpiSnapshot, OperationLog, SessionFilter, SessionFinish, TrainingSession};
use ikusei_ingest::UnityUpload;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::auth;
use crate::http::{ok, ApiJson, ApiPath, ApiResult, HttpState};

/// Logs included in a session detail response.
pub const DETAIL_LOG_LIMIT: usize = 100;

/// Listing representation without the log payload.
pub fn session_summary(s: &TrainingSession) -> Value {
    json!({
        "id": s.id,
        "session_id": s.session_id,
        "worker_id": s.worker_id,
        "training_menu_id": s.training_menu_id,
        "session_start_time": s.start_time.to_rfc3339(),
        "session_end_time": s.end_time.map(|t| t.to_rfc3339()),
        "duration_seconds": s.duration_seconds,
        "status": s.status,
        "kpi": s.kpi.as_ref().map(|k| json!({
            "safety_score": k.safety_score,
            "error_count": k.error_count,
            "procedure_compliance_rate": k.procedure_compliance_rate,
            "work_time_seconds": k.work_time_seconds,
            "achievement_rate": k.achievement_rate,
            "overall_score": k.overall_score,
        })),
        "operation_logs_count": s.operation_logs.len(),
        "created_at": s.created_at.to_rfc3339(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct AppendRequest {
    #[serde(default)]
    pub operation_logs: Vec<OperationLog>,
    #[serde(default)]
    pub kpi_timeline: Vec<KpiSnapshot>,
}

// ============================================================================
// Inner functions
// ============================================================================

pub async fn list_inner(state: &HttpState, filter: SessionFilter) -> ApiResult {
    let sessions = state.store.list_sessions(filter).await?;
    ok(Value::Array(sessions.iter().map(session_summary).collect()))
}

/// Worker 0 stands for "no worker" and also lists unassigned sessions.
pub async fn worker_sessions_inner(state: &HttpState, worker_id: i64) -> ApiResult {
    if worker_id == 0 {
        return list_inner(state, SessionFilter::WorkerOrUnassigned(0)).await;
    }
    state.store.get_worker(worker_id).await?;
    list_inner(state, SessionFilter::Worker(worker_id)).await
}

pub async fn ingest_inner(state: &HttpState, upload: UnityUpload) -> ApiResult {
    let session = upload.into_session()?;
    let session = state.store.insert_session(session).await?;
    info!(
        session_id = %session.session_id,
        worker_id = ?session.worker_id,
        logs = session.operation_logs.len(),
        status = session.status.as_str(),
        "Training session saved"
    );
    Ok((
        StatusCode::CREATED,
        json!({
            "success": true,
            "message": "Training session saved",
            "data": { "session_id": session.session_id },
            "session_id": session.session_id,
        }),
    ))
}

pub async fn detail_inner(state: &HttpState, session_id: &str) -> ApiResult {
    let session = state.store.get_session(session_id).await?;
    let mut data = session_summary(&session);
    data["operation_logs"] = json!(session
        .operation_logs
        .iter()
        .take(DETAIL_LOG_LIMIT)
        .collect::<Vec<_>>());
    ok(data)
}

pub async fn append_inner(state: &HttpState, session_id: &str, req: AppendRequest) -> ApiResult {
    let (logs, snaps) = (req.operation_logs.len(), req.kpi_timeline.len());
    let session = state
        .store
        .append_to_session(session_id, req.operation_logs, req.kpi_timeline)
        .await?;
    tracing::debug!(session_id, logs, snapshots = snaps, "Appended to session");
    ok(json!({
        "session_id": session.session_id,
        "operation_logs_count": session.operation_logs.len(),
        "kpi_snapshots_count": session.kpi_timeline.len(),
    }))
}

pub async fn finish_inner(state: &HttpState, session_id: &str, finish: SessionFinish) -> ApiResult {
    let session = state.store.finish_session(session_id, finish).await?;
    info!(
        session_id,
        status = session.status.as_str(),
        duration_seconds = ?session.duration_seconds,
        "Training session finished"
    );
    ok(session_summary(&session))
}

/// Everything the replay player needs: the full session plus its length in ms.
pub async fn replay_inner(state: &HttpState, headers: &HeaderMap, session_id: &str) -> ApiResult {
    let session = state.store.get_session(session_id).await?;
    let user = auth::caller(state, headers).await?;
    auth::ensure_can_view_worker(user.as_ref(), session.worker_id)?;

    let mut data = serde_json::to_value(&session)?;
    data["duration_ms"] = json!(session.duration_ms());
    ok(data)
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn list_handler(State(state): State<Arc<HttpState>>) -> Response {
    state.respond(list_inner(&state, SessionFilter::All).await)
}

pub async fn worker_sessions_handler(
    State(state): State<Arc<HttpState>>,
    ApiPath(worker_id): ApiPath<i64>,
) -> Response {
    state.respond(worker_sessions_inner(&state, worker_id).await)
}

pub async fn ingest_handler(
    State(state): State<Arc<HttpState>>,
    ApiJson(upload): ApiJson<UnityUpload>,
) -> Response {
    state.respond(ingest_inner(&state, upload).await)
}

pub async fn detail_handler(
    State(state): State<Arc<HttpState>>,
    ApiPath(session_id): ApiPath<String>,
) -> Response {
    state.respond(detail_inner(&state, &session_id).await)
}

pub async fn append_handler(
    State(state): State<Arc<HttpState>>,
    ApiPath(session_id): ApiPath<String>,
    ApiJson(req): ApiJson<AppendRequest>,
) -> Response {
    state.respond(append_inner(&state, &session_id, req).await)
}

pub async fn finish_handler(
    State(state): State<Arc<HttpState>>,
    ApiPath(session_id): ApiPath<String>,
    ApiJson(finish): ApiJson<SessionFinish>,
) -> Response {
    state.respond(finish_inner(&state, &session_id, finish).await)
}

pub async fn replay_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    ApiPath(session_id): ApiPath<String>,
) -> Response {
    state.respond(replay_inner(&state, &headers, &session_id).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ikusei_core::{IkuseiConfig, MemoryStore};

    fn make_state() -> HttpState {
        HttpState::new(Arc::new(MemoryStore::new()), IkuseiConfig::default())
    }

    fn upload(v: Value) -> UnityUpload {
        serde_json::from_value(v).unwrap()
    }

    // ========================================================================
    // TEST 1: Ingest then fetch the detail
    // ========================================================================
    #[tokio::test]
    async fn test_ingest_and_detail() {
        let state = make_state();
        let (status, body) = ingest_inner(
            &state,
            upload(json!({
                "sessionId": "U-1",
                "session_start_time": "2025-06-01T09:00:00Z",
                "session_end_time": "2025-06-01T09:05:00Z",
                "kpi": {"overallScore": 88.0},
                "operationLogs": [{"timestamp": "2025-06-01T09:01:00Z", "operationType": "lift"}]
            })),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Training session saved");
        assert_eq!(body["session_id"], "U-1");

        let (_, body) = detail_inner(&state, "U-1").await.unwrap();
        assert_eq!(body["data"]["duration_seconds"], 300);
        assert_eq!(body["data"]["operation_logs_count"], 1);
        assert_eq!(body["data"]["kpi"]["overall_score"], 88.0);
        assert_eq!(body["data"]["status"], "completed");
        assert_eq!(body["data"]["operation_logs"][0]["operation_type"], "lift");
    }

    // ========================================================================
    // TEST 2: Missing session and duplicate ingest
    // ========================================================================
    #[tokio::test]
    async fn test_not_found_and_duplicate() {
        let state = make_state();
        let err = detail_inner(&state, "nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Session not found");

        ingest_inner(&state, upload(json!({"sessionId": "D"}))).await.unwrap();
        let err = ingest_inner(&state, upload(json!({"sessionId": "D"}))).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    // ========================================================================
    // TEST 3: Append while running, reject after finish
    // ========================================================================
    #[tokio::test]
    async fn test_append_then_finish() {
        let state = make_state();
        ingest_inner(
            &state,
            upload(json!({"sessionId": "LIVE", "status": "in_progress",
                          "session_start_time": "2025-06-01T09:00:00Z"})),
        )
        .await
        .unwrap();

        let req: AppendRequest = serde_json::from_value(json!({
            "operation_logs": [{"timestamp": "2025-06-01T09:00:05Z", "operation_type": "swing"}],
            "kpi_timeline": [{"timestamp": "2025-06-01T09:00:05Z", "overall_score": 50.0}]
        }))
        .unwrap();
        let (_, body) = append_inner(&state, "LIVE", req).await.unwrap();
        assert_eq!(body["data"]["operation_logs_count"], 1);
        assert_eq!(body["data"]["kpi_snapshots_count"], 1);

        let finish: SessionFinish =
            serde_json::from_value(json!({"end_time": "2025-06-01T09:02:00Z"})).unwrap();
        let (_, body) = finish_inner(&state, "LIVE", finish).await.unwrap();
        assert_eq!(body["data"]["status"], "completed");
        assert_eq!(body["data"]["duration_seconds"], 120);

        let err = append_inner(&state, "LIVE", AppendRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    // ========================================================================
    // TEST 4: Replay data deserializes back into a session
    // ========================================================================
    #[tokio::test]
    async fn test_replay_round_trips_session() {
        let state = make_state();
        ingest_inner(
            &state,
            upload(json!({
                "sessionId": "R",
                "duration_seconds": 30,
                "kpi": {"overallScore": 60.0},
                "operationLogs": [{"operationType": "a"}]
            })),
        )
        .await
        .unwrap();

        let (_, body) = replay_inner(&state, &HeaderMap::new(), "R").await.unwrap();
        assert_eq!(body["data"]["duration_ms"], 30_000);
        let session: TrainingSession = serde_json::from_value(body["data"].clone()).unwrap();
        assert_eq!(session.session_id, "R");
        assert_eq!(session.operation_logs.len(), 1);
        assert_eq!(session.kpi_timeline.len(), 1);
    }

    // ========================================================================
    // TEST 5: Worker 0 lists unassigned sessions
    // ========================================================================
    #[tokio::test]
    async fn test_worker_zero_lists_unassigned() {
        let state = make_state();
        ingest_inner(&state, upload(json!({"sessionId": "free"}))).await.unwrap();
        let (_, body) = worker_sessions_inner(&state, 0).await.unwrap();
        assert_eq!(body["data"][0]["session_id"], "free");

        let err = worker_sessions_inner(&state, 42).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
