//! Screenshot uploads and file retrieval under the storage root.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use ikusei_core::models::RecordKind;
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::info;

use super::auth;
use crate::error::ApiError;
use crate::http::{created, ApiJson, ApiPath, ApiResult, HttpState};

pub const SCREENSHOT_DIR: &str = "screenshots";

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotUpload {
    #[serde(default)]
    pub filename: Option<String>,
    /// Base64 payload, optionally as a `data:<mime>;base64,` URL.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Keep ASCII letters, digits, `.`, `-` and `_`; spaces become `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            ' ' => Some('_'),
            _ => None,
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

/// Split an optional data-URL prefix from the payload. Returns `(mime, base64)`.
fn split_data_url(content: &str) -> (Option<&str>, &str) {
    match content.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
        Some((meta, data)) => (meta.strip_suffix(";base64"), data),
        None => (None, content),
    }
}

/// Resolve a client-supplied relative path inside `root`.
pub fn resolve_file_path(root: &Path, requested: &str) -> Result<PathBuf, ApiError> {
    let rel = Path::new(requested);
    if requested.is_empty() || rel.is_absolute() || requested.starts_with(['/', '\\']) {
        return Err(ApiError::validation("Invalid file path"));
    }
    if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(ApiError::validation("Invalid file path"));
    }
    Ok(root.join(rel))
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" | "log" => "text/plain; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// Inner functions
// ============================================================================

pub async fn screenshot_inner(
    state: &HttpState,
    headers: &HeaderMap,
    worker_id: i64,
    upload: ScreenshotUpload,
) -> ApiResult {
    let filename = upload
        .filename
        .as_deref()
        .map(sanitize_filename)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::validation("filename is required"))?;
    let content = upload
        .content
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::validation("content is required"))?;

    state.store.get_worker(worker_id).await?;

    let (data_url_mime, encoded) = split_data_url(content);
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| ApiError::validation("Invalid base64 content"))?;
    if bytes.len() > state.config.storage.max_upload_bytes {
        return Err(ApiError::validation("File too large"));
    }

    let now = Utc::now();
    let stored_name = format!("{worker_id}_{}_{filename}", now.format("%Y%m%d_%H%M%S"));
    let dir = state.config.storage.root_path().join(SCREENSHOT_DIR);
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join(&stored_name), &bytes).await?;

    let uploaded_by = auth::caller(state, headers)
        .await?
        .map(|u| u.username)
        .unwrap_or_else(|| "system".to_string());
    let mime_type = upload
        .mime_type
        .as_deref()
        .or(data_url_mime)
        .unwrap_or_else(|| content_type_for(Path::new(&filename)))
        .to_string();

    let body = RecordKind::Document.normalize(json!({
        "document_type": "screenshot",
        "title": upload
            .title
            .unwrap_or_else(|| format!("Screenshot {}", now.format("%Y-%m-%d %H:%M:%S"))),
        "file_path": format!("{SCREENSHOT_DIR}/{stored_name}"),
        "file_name": filename,
        "file_size": bytes.len(),
        "mime_type": mime_type,
        "description": upload.description.unwrap_or_else(|| "Screen capture".to_string()),
        "is_required": false,
        "is_verified": false,
        "uploaded_by": uploaded_by,
    }))?;
    let record = state
        .store
        .insert_record(RecordKind::Document, Some(worker_id), body)
        .await?;

    info!(worker_id, file = %stored_name, size = bytes.len(), "Screenshot uploaded");
    created(record.to_json())
}

pub async fn file_inner(state: &HttpState, requested: &str) -> Result<Response, ApiError> {
    let path = resolve_file_path(&state.config.storage.root_path(), requested)?;
    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("File not found"))
        }
        Err(e) => return Err(e.into()),
    };
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(ApiError::not_found("File not found"));
    }

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&path).to_string()),
            (header::CONTENT_LENGTH, meta.len().to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn screenshot_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    ApiPath(worker_id): ApiPath<i64>,
    ApiJson(upload): ApiJson<ScreenshotUpload>,
) -> Response {
    state.respond(screenshot_inner(&state, &headers, worker_id, upload).await)
}

pub async fn file_handler(
    State(state): State<Arc<HttpState>>,
    ApiPath(path): ApiPath<String>,
) -> Response {
    match file_inner(&state, &path).await {
        Ok(res) => res,
        Err(err) => state.respond(Err(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("shot 1.png"), "shot_1.png");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\tmp\\a.png"), "a.png");
        assert_eq!(sanitize_filename("画面.png"), "png");
        assert_eq!(sanitize_filename("..."), "");
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = Path::new("/srv/uploads");
        assert!(resolve_file_path(root, "../secret").is_err());
        assert!(resolve_file_path(root, "screenshots/../../x").is_err());
        assert!(resolve_file_path(root, "/etc/passwd").is_err());
        assert!(resolve_file_path(root, "").is_err());
        assert_eq!(
            resolve_file_path(root, "screenshots/a.png").unwrap(),
            root.join("screenshots/a.png")
        );
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("report.pdf")), "application/pdf");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_split_data_url() {
        assert_eq!(split_data_url("data:image/png;base64,AAAA"), (Some("image/png"), "AAAA"));
        assert_eq!(split_data_url("AAAA"), (None, "AAAA"));
    }
}
