//! Login, registration and bearer-token sessions.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Utc};
use ikusei_core::auth::{self, Credentials, LoginOutcome, Registration};
use ikusei_core::models::{Role, User};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::http::{done, ok, ApiJson, ApiResult, HttpState};

/// A logged-in bearer token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub username: String,
    pub csrf_token: String,
    pub issued_at: DateTime<Utc>,
}

impl AuthSession {
    fn is_expired(&self, now: DateTime<Utc>, ttl_secs: i64) -> bool {
        now.signed_duration_since(self.issued_at).num_seconds() >= ttl_secs
    }
}

/// Bearer tokens issued at login. Entries older than the TTL are pruned
/// whenever a token is issued or resolved.
#[derive(Debug)]
pub struct TokenRegistry {
    sessions: RwLock<HashMap<String, AuthSession>>,
    ttl_secs: i64,
}

impl TokenRegistry {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
        }
    }

    /// Issue a token for `username`. Returns `(token, session)`.
    pub async fn issue(&self, username: &str) -> (String, AuthSession) {
        self.issue_at(username, Utc::now()).await
    }

    pub async fn issue_at(&self, username: &str, now: DateTime<Utc>) -> (String, AuthSession) {
        let token = Uuid::new_v4().simple().to_string();
        let session = AuthSession {
            username: username.to_string(),
            csrf_token: Uuid::new_v4().simple().to_string(),
            issued_at: now,
        };
        let mut sessions = self.sessions.write().await;
        self.prune(&mut sessions, now);
        sessions.insert(token.clone(), session.clone());
        (token, session)
    }

    pub async fn resolve(&self, token: &str) -> Option<AuthSession> {
        self.resolve_at(token, Utc::now()).await
    }

    pub async fn resolve_at(&self, token: &str, now: DateTime<Utc>) -> Option<AuthSession> {
        let mut sessions = self.sessions.write().await;
        self.prune(&mut sessions, now);
        sessions.get(token).cloned()
    }

    fn prune(&self, sessions: &mut HashMap<String, AuthSession>, now: DateTime<Utc>) {
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now, self.ttl_secs));
        let expired = before - sessions.len();
        if expired > 0 {
            debug!(expired, "Pruned expired tokens");
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The user behind the request's bearer token, if any.
pub async fn caller(state: &HttpState, headers: &HeaderMap) -> Result<Option<User>, ApiError> {
    let Some(token) = bearer_token(headers) else {
        return Ok(None);
    };
    let Some(session) = state.tokens.resolve(token).await else {
        return Ok(None);
    };
    Ok(state.store.find_user(&session.username).await?)
}

/// Trainees may only see their own worker's data.
pub fn ensure_can_view_worker(user: Option<&User>, worker_id: Option<i64>) -> Result<(), ApiError> {
    match (user, worker_id) {
        (Some(u), Some(w)) if u.role == Role::Trainee && u.worker_id != Some(w) => {
            Err(ApiError::forbidden())
        }
        _ => Ok(()),
    }
}

pub fn ensure_not_trainee(user: Option<&User>) -> Result<(), ApiError> {
    match user {
        Some(u) if u.role == Role::Trainee => Err(ApiError::forbidden()),
        _ => Ok(()),
    }
}

// ============================================================================
// Inner functions
// ============================================================================

pub async fn login_inner(state: &HttpState, creds: Credentials) -> ApiResult {
    let outcome = auth::authenticate(state.store.as_ref(), &state.config.auth, &creds).await?;
    let user = match outcome {
        LoginOutcome::Authenticated(user) => user,
        LoginOutcome::MfaRequired => return Err(ApiError::mfa_required()),
        LoginOutcome::InvalidSecondFactor => {
            return Err(ApiError::auth(auth::MSG_INVALID_SECOND_FACTOR))
        }
        LoginOutcome::InvalidCredentials => {
            return Err(ApiError::auth(auth::MSG_INVALID_CREDENTIALS))
        }
    };

    let (token, session) = state.tokens.issue(&user.username).await;
    info!(username = %user.username, role = user.role.as_str(), "User logged in");
    let body = json!({
        "success": true,
        "data": user,
        "csrf_token": session.csrf_token,
        "token": token,
    });
    Ok((StatusCode::OK, body))
}

pub async fn register_inner(state: &HttpState, reg: Registration) -> ApiResult {
    let registered = auth::register(state.store.as_ref(), &state.config.auth, &reg).await?;
    let body = json!({
        "success": true,
        "message": "User registered. Store the backup codes now; they are not shown again",
        "data": {
            "mfa_enabled": registered.user.mfa_enabled,
            "user": registered.user,
            "backup_codes": registered.backup_codes,
        },
    });
    Ok((StatusCode::CREATED, body))
}

pub async fn logout_inner(state: &HttpState, headers: &HeaderMap) -> ApiResult {
    if let Some(token) = bearer_token(headers) {
        if state.tokens.revoke(token).await {
            info!("Token revoked");
        }
    }
    done("Logged out")
}

pub async fn current_inner(state: &HttpState, headers: &HeaderMap) -> ApiResult {
    match caller(state, headers).await? {
        Some(user) => ok(json!(user)),
        None => Err(ApiError::auth("Not authenticated")),
    }
}

// ============================================================================
// Axum handler wrappers
// ============================================================================

pub async fn login_handler(
    State(state): State<Arc<HttpState>>,
    ApiJson(creds): ApiJson<Credentials>,
) -> Response {
    state.respond(login_inner(&state, creds).await)
}

pub async fn register_handler(
    State(state): State<Arc<HttpState>>,
    ApiJson(reg): ApiJson<Registration>,
) -> Response {
    state.respond(register_inner(&state, reg).await)
}

pub async fn logout_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    state.respond(logout_inner(&state, &headers).await)
}

pub async fn current_handler(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    state.respond(current_inner(&state, &headers).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use ikusei_core::{IkuseiConfig, MemoryStore};

    async fn make_state() -> HttpState {
        let state = HttpState::new(Arc::new(MemoryStore::new()), IkuseiConfig::default());
        auth::seed_admin(state.store.as_ref(), &state.config.auth)
            .await
            .unwrap();
        state
    }

    fn creds(mfa: Option<&str>) -> Credentials {
        Credentials {
            username: "admin".into(),
            password: "admin123".into(),
            mfa_code: mfa.map(String::from),
            backup_code: None,
        }
    }

    // ========================================================================
    // TEST 1: Correct password without a second factor asks for MFA
    // ========================================================================
    #[tokio::test]
    async fn test_login_requires_mfa() {
        let state = make_state().await;
        let err = login_inner(&state, creds(None)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.body()["mfa_required"], true);
    }

    // ========================================================================
    // TEST 2: Every configured MFA code logs in and issues a usable token
    // ========================================================================
    #[tokio::test]
    async fn test_login_with_mfa_issues_token() {
        let state = make_state().await;
        for code in ["000000", "123456", "999999"] {
            let (status, body) = login_inner(&state, creds(Some(code))).await.unwrap();
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
            assert_eq!(body["data"]["username"], "admin");
            assert!(body["data"].get("password_hash").is_none());
            assert!(body["csrf_token"].is_string());

            let token = body["token"].as_str().unwrap().to_string();
            let mut headers = HeaderMap::new();
            headers.insert(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
            );
            let (_, me) = current_inner(&state, &headers).await.unwrap();
            assert_eq!(me["data"]["role"], "administrator");

            logout_inner(&state, &headers).await.unwrap();
            assert!(current_inner(&state, &headers).await.is_err());
        }
    }

    // ========================================================================
    // TEST 3: Wrong MFA code and wrong password
    // ========================================================================
    #[tokio::test]
    async fn test_login_rejections() {
        let state = make_state().await;
        let err = login_inner(&state, creds(Some("111111"))).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid MFA code or backup code");

        let mut bad = creds(Some("000000"));
        bad.password = "nope".into();
        let err = login_inner(&state, bad).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid username or password");
    }

    // ========================================================================
    // TEST 4: Tokens expire after the configured TTL and are pruned
    // ========================================================================
    #[tokio::test]
    async fn test_tokens_expire_after_ttl() {
        let registry = TokenRegistry::new(60);
        let t0 = Utc::now();
        let (old, _) = registry.issue_at("admin", t0).await;
        let (fresh, _) = registry.issue_at("admin", t0 + chrono::Duration::seconds(30)).await;
        assert_eq!(registry.len().await, 2);

        let at_59 = t0 + chrono::Duration::seconds(59);
        assert_eq!(registry.resolve_at(&old, at_59).await.unwrap().username, "admin");

        let at_60 = t0 + chrono::Duration::seconds(60);
        assert!(registry.resolve_at(&old, at_60).await.is_none());
        assert!(registry.resolve_at(&fresh, at_60).await.is_some());
        assert_eq!(registry.len().await, 1);

        // issuing also prunes
        let at_200 = t0 + chrono::Duration::seconds(200);
        registry.issue_at("other", at_200).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.resolve_at(&fresh, at_200).await.is_none());
    }

    // ========================================================================
    // TEST 5: An expired token no longer identifies the caller
    // ========================================================================
    #[tokio::test]
    async fn test_expired_token_is_not_authenticated() {
        let mut config = IkuseiConfig::default();
        config.auth.token_ttl_secs = 0;
        let state = HttpState::new(Arc::new(MemoryStore::new()), config);
        auth::seed_admin(state.store.as_ref(), &state.config.auth)
            .await
            .unwrap();

        let (_, body) = login_inner(&state, creds(Some("000000"))).await.unwrap();
        let token = body["token"].as_str().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        let err = current_inner(&state, &headers).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.tokens.len().await, 0);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }

    #[test]
    fn test_trainee_scoping() {
        let trainee = User {
            id: 2,
            username: "t".into(),
            email: "t@example.com".into(),
            password_hash: String::new(),
            role: Role::Trainee,
            worker_id: Some(5),
            mfa_enabled: true,
            backup_codes: Vec::new(),
            created_at: Utc::now(),
        };
        assert!(ensure_can_view_worker(Some(&trainee), Some(5)).is_ok());
        assert!(ensure_can_view_worker(Some(&trainee), Some(6)).is_err());
        assert!(ensure_can_view_worker(Some(&trainee), None).is_ok());
        assert!(ensure_can_view_worker(None, Some(6)).is_ok());
        assert!(ensure_not_trainee(Some(&trainee)).is_err());
        assert!(ensure_not_trainee(None).is_ok());
    }
}
