//! Worker CRUD.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use ikusei_core::models::WorkerInput;
use serde_json::json;
use tracing::info;

use crate::http::{created, done, ok, ApiJson, ApiPath, ApiResult, HttpState};

pub async fn list_inner(state: &HttpState) -> ApiResult {
    let workers = state.store.list_workers().await?;
    ok(json!(workers))
}

pub async fn get_inner(state: &HttpState, id: i64) -> ApiResult {
    let worker = state.store.get_worker(id).await?;
    ok(json!(worker))
}

pub async fn create_inner(state: &HttpState, input: WorkerInput) -> ApiResult {
    let worker = input.into_worker()?;
    let worker = state.store.insert_worker(worker).await?;
    info!(worker_id = worker.id, name = %worker.name, "Worker created");
    created(json!(worker))
}

pub async fn update_inner(state: &HttpState, id: i64, input: WorkerInput) -> ApiResult {
    let mut worker = state.store.get_worker(id).await?;
    input.apply_to(&mut worker)?;
    let worker = state.store.update_worker(worker).await?;
    info!(worker_id = worker.id, "Worker updated");
    ok(json!(worker))
}

pub async fn delete_inner(state: &HttpState, id: i64) -> ApiResult {
    state.store.delete_worker(id).await?;
    info!(worker_id = id, "Worker deleted");
    done("Worker deleted")
}

pub async fn list_handler(State(state): State<Arc<HttpState>>) -> Response {
    state.respond(list_inner(&state).await)
}

pub async fn get_handler(
    State(state): State<Arc<HttpState>>,
    ApiPath(id): ApiPath<i64>,
) -> Response {
    state.respond(get_inner(&state, id).await)
}

pub async fn create_handler(
    State(state): State<Arc<HttpState>>,
    ApiJson(input): ApiJson<WorkerInput>,
) -> Response {
    state.respond(create_inner(&state, input).await)
}

pub async fn update_handler(
    State(state): State<Arc<HttpState>>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<WorkerInput>,
) -> Response {
    state.respond(update_inner(&state, id, input).await)
}

pub async fn delete_handler(
    State(state): State<Arc<HttpState>>,
    ApiPath(id): ApiPath<i64>,
) -> Response {
    state.respond(delete_inner(&state, id).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use ikusei_core::{IkuseiConfig, MemoryStore};

    fn make_state() -> HttpState {
        HttpState::new(Arc::new(MemoryStore::new()), IkuseiConfig::default())
    }

    fn input(name: Option<&str>, email: Option<&str>) -> WorkerInput {
        serde_json::from_value(json!({"name": name, "email": email})).unwrap()
    }

    #[tokio::test]
    async fn test_create_requires_name_and_email() {
        let state = make_state();
        let err = create_inner(&state, input(Some("Nguyen"), None)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Name and email are required");
    }

    #[tokio::test]
    async fn test_crud_cycle() {
        let state = make_state();
        let (status, body) = create_inner(&state, input(Some("Nguyen"), Some("n@example.com")))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        let id = body["data"]["id"].as_i64().unwrap();
        assert_eq!(body["data"]["current_status"], "登録中");

        let patch: WorkerInput = serde_json::from_value(json!({"japanese_level": "N3"})).unwrap();
        let (_, body) = update_inner(&state, id, patch).await.unwrap();
        assert_eq!(body["data"]["japanese_level"], "N3");
        assert_eq!(body["data"]["name"], "Nguyen");

        let (_, body) = list_inner(&state).await.unwrap();
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        delete_inner(&state, id).await.unwrap();
        let err = get_inner(&state, id).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "Worker not found");
    }
}
