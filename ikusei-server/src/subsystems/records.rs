//! CRUD for the plain record kinds: worker-scoped records under
//! `/api/workers/{id}/{kind}` and the shared lists (training menus,
//! notifications and calendar entries addressed to everyone).

use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use ikusei_core::models::{RecordKind, RecordScope, StoredRecord};
use serde_json::Value;
use tracing::info;

use crate::error::ApiError;
use crate::http::{created, done, ok, ApiJson, ApiPath, ApiResult, HttpState};

fn listing(records: &[StoredRecord]) -> Value {
    Value::Array(records.iter().map(StoredRecord::to_json).collect())
}

/// Load a record and check it belongs to `owner`.
async fn owned_record(
    state: &HttpState,
    kind: RecordKind,
    id: i64,
    owner: Option<i64>,
) -> Result<StoredRecord, ApiError> {
    let record = state.store.get_record(kind, id).await?;
    if owner.is_some() && record.worker_id != owner {
        return Err(ApiError::not_found(format!("{} not found", kind.label())));
    }
    Ok(record)
}

// ============================================================================
// Inner functions
// ============================================================================

pub async fn list_inner(state: &HttpState, kind: RecordKind, scope: RecordScope) -> ApiResult {
    let records = state.store.list_records(kind, scope).await?;
    ok(listing(&records))
}

pub async fn list_for_worker_inner(
    state: &HttpState,
    kind: RecordKind,
    worker_id: i64,
) -> ApiResult {
    state.store.get_worker(worker_id).await?;
    list_inner(state, kind, kind.worker_scope(worker_id)).await
}

pub async fn create_inner(
    state: &HttpState,
    kind: RecordKind,
    worker_id: Option<i64>,
    body: Value,
) -> ApiResult {
    if let Some(id) = worker_id {
        state.store.get_worker(id).await?;
    }
    let body = kind.normalize(body)?;
    let record = state.store.insert_record(kind, worker_id, body).await?;
    info!(kind = kind.as_str(), id = record.id, worker_id = ?worker_id, "Record created");
    created(record.to_json())
}

pub async fn get_inner(
    state: &HttpState,
    kind: RecordKind,
    id: i64,
    owner: Option<i64>,
) -> ApiResult {
    let record = owned_record(state, kind, id, owner).await?;
    ok(record.to_json())
}

pub async fn update_inner(
    state: &HttpState,
    kind: RecordKind,
    id: i64,
    owner: Option<i64>,
    patch: Value,
) -> ApiResult {
    let existing = owned_record(state, kind, id, owner).await?;
    let body = kind.merge(&existing.body, patch)?;
    let record = state.store.update_record(kind, id, body).await?;
    info!(kind = kind.as_str(), id, "Record updated");
    ok(record.to_json())
}

pub async fn delete_inner(
    state: &HttpState,
    kind: RecordKind,
    id: i64,
    owner: Option<i64>,
) -> ApiResult {
    owned_record(state, kind, id, owner).await?;
    state.store.delete_record(kind, id).await?;
    info!(kind = kind.as_str(), id, "Record deleted");
    done(&format!("{} deleted", kind.label()))
}

// ============================================================================
// Routes
// ============================================================================

type AppState = State<Arc<HttpState>>;

/// Mount `/api/workers/:id/{segment}` and `/api/workers/:id/{segment}/:record_id`.
pub fn mount_worker_kind(
    router: Router<Arc<HttpState>>,
    kind: RecordKind,
) -> Router<Arc<HttpState>> {
    let base = format!("/api/workers/:id/{}", kind.path_segment());
    router
        .route(
            &base,
            get(move |State(state): AppState, ApiPath(worker_id): ApiPath<i64>| async move {
                state.respond(list_for_worker_inner(&state, kind, worker_id).await)
            })
            .post(
                move |State(state): AppState,
                      ApiPath(worker_id): ApiPath<i64>,
                      ApiJson(body): ApiJson<Value>| async move {
                    state.respond(create_inner(&state, kind, Some(worker_id), body).await)
                },
            ),
        )
        .route(
            &format!("{base}/:record_id"),
            get(
                move |State(state): AppState,
                      ApiPath((worker_id, id)): ApiPath<(i64, i64)>| async move {
                    state.respond(get_inner(&state, kind, id, Some(worker_id)).await)
                },
            )
            .put(
                move |State(state): AppState,
                      ApiPath((worker_id, id)): ApiPath<(i64, i64)>,
                      ApiJson(body): ApiJson<Value>| async move {
                    state.respond(update_inner(&state, kind, id, Some(worker_id), body).await)
                },
            )
            .delete(
                move |State(state): AppState,
                      ApiPath((worker_id, id)): ApiPath<(i64, i64)>| async move {
                    state.respond(delete_inner(&state, kind, id, Some(worker_id)).await)
                },
            ),
        )
}

/// Mount the lists that are not tied to one worker.
pub fn mount_shared(router: Router<Arc<HttpState>>) -> Router<Arc<HttpState>> {
    let menus = RecordKind::TrainingMenu;
    let router = router
        .route(
            "/api/training-menus",
            get(training_menus_handler).post(
                move |State(state): AppState, ApiJson(body): ApiJson<Value>| async move {
                    state.respond(create_inner(&state, menus, None, body).await)
                },
            ),
        )
        .route(
            "/api/training-menus/:id",
            get(move |State(state): AppState, ApiPath(id): ApiPath<i64>| async move {
                state.respond(get_inner(&state, menus, id, None).await)
            })
            .put(
                move |State(state): AppState,
                      ApiPath(id): ApiPath<i64>,
                      ApiJson(body): ApiJson<Value>| async move {
                    state.respond(update_inner(&state, menus, id, None, body).await)
                },
            )
            .delete(move |State(state): AppState, ApiPath(id): ApiPath<i64>| async move {
                state.respond(delete_inner(&state, menus, id, None).await)
            }),
        );

    [
        ("/api/notifications", RecordKind::Notification),
        ("/api/calendar", RecordKind::CalendarEvent),
    ]
    .into_iter()
    .fold(router, |router, (path, kind)| {
        router.route(
            path,
            get(move |State(state): AppState| async move {
                state.respond(list_inner(&state, kind, RecordScope::Unassigned).await)
            })
            .post(move |State(state): AppState, ApiJson(body): ApiJson<Value>| async move {
                state.respond(create_inner(&state, kind, None, body).await)
            }),
        )
    })
}

async fn training_menus_handler(State(state): AppState) -> Response {
    state.respond(list_inner(&state, RecordKind::TrainingMenu, RecordScope::All).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use ikusei_core::models::WorkerInput;
    use ikusei_core::{IkuseiConfig, MemoryStore};
    use serde_json::json;

    async fn state_with_worker() -> (HttpState, i64) {
        let state = HttpState::new(Arc::new(MemoryStore::new()), IkuseiConfig::default());
        let input: WorkerInput =
            serde_json::from_value(json!({"name": "Tran", "email": "t@example.com"})).unwrap();
        let worker = state
            .store
            .insert_worker(input.into_worker().unwrap())
            .await
            .unwrap();
        (state, worker.id)
    }

    // ========================================================================
    // TEST 1: Milestone lifecycle under a worker
    // ========================================================================
    #[tokio::test]
    async fn test_milestone_lifecycle() {
        let (state, wid) = state_with_worker().await;
        let kind = RecordKind::Milestone;

        let (status, body) = create_inner(
            &state,
            kind,
            Some(wid),
            json!({"milestone_name": "N4 pass", "milestone_type": "language", "status": "達成",
                   "target_date": "2025-03-01"}),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "achieved");
        assert_eq!(body["data"]["worker_id"], wid);
        let id = body["data"]["id"].as_i64().unwrap();

        let (_, body) = update_inner(&state, kind, id, Some(wid), json!({"status": "not_achieved"}))
            .await
            .unwrap();
        assert_eq!(body["data"]["status"], "not_achieved");
        assert_eq!(body["data"]["milestone_name"], "N4 pass");

        let (_, body) = list_for_worker_inner(&state, kind, wid).await.unwrap();
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        delete_inner(&state, kind, id, Some(wid)).await.unwrap();
        let err = get_inner(&state, kind, id, Some(wid)).await.unwrap_err();
        assert_eq!(err.to_string(), "Milestone not found");
    }

    // ========================================================================
    // TEST 2: Records are not reachable through another worker's path
    // ========================================================================
    #[tokio::test]
    async fn test_foreign_owner_is_not_found() {
        let (state, wid) = state_with_worker().await;
        let (_, body) = create_inner(
            &state,
            RecordKind::Progress,
            Some(wid),
            json!({"progress_date": "2025-05-01", "progress_type": "training"}),
        )
        .await
        .unwrap();
        let id = body["data"]["id"].as_i64().unwrap();
        let err = get_inner(&state, RecordKind::Progress, id, Some(wid + 1))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    // ========================================================================
    // TEST 3: Validation and unknown worker
    // ========================================================================
    #[tokio::test]
    async fn test_create_rejections() {
        let (state, wid) = state_with_worker().await;
        let err = create_inner(&state, RecordKind::Milestone, Some(wid), json!({"milestone_name": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().starts_with("Missing required fields"));

        let err = create_inner(&state, RecordKind::Milestone, Some(999), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    // ========================================================================
    // TEST 4: Shared notifications appear in every worker's list
    // ========================================================================
    #[tokio::test]
    async fn test_shared_notification_visible_to_worker() {
        let (state, wid) = state_with_worker().await;
        create_inner(
            &state,
            RecordKind::Notification,
            None,
            json!({"title": "Holiday", "message": "Office closed", "notification_type": "info"}),
        )
        .await
        .unwrap();

        let (_, shared) = list_inner(&state, RecordKind::Notification, RecordScope::Unassigned)
            .await
            .unwrap();
        assert_eq!(shared["data"].as_array().unwrap().len(), 1);

        let (_, mine) = list_for_worker_inner(&state, RecordKind::Notification, wid)
            .await
            .unwrap();
        assert_eq!(mine["data"][0]["title"], "Holiday");
        assert!(mine["data"][0]["worker_id"].is_null());
    }
}
