//! Credential checks, registration rules and the seeded administrator.

use std::sync::OnceLock;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::IkuseiError;
use crate::models::{NewUser, Role, User};
use crate::store::{Store, StoreError};

pub const BACKUP_CODE_COUNT: usize = 10;

pub const MSG_MFA_REQUIRED: &str = "MFA code or backup code is required";
pub const MSG_INVALID_SECOND_FACTOR: &str = "Invalid MFA code or backup code";
pub const MSG_INVALID_CREDENTIALS: &str = "Invalid username or password";
pub const MSG_FIELDS_REQUIRED: &str = "Username, email, and password are required";
pub const MSG_INVALID_EMAIL: &str = "Invalid email address format";
pub const MSG_USERNAME_TAKEN: &str = "このユーザー名は既に使用されています。ログインしてください。";
pub const MSG_EMAIL_TAKEN: &str = "このメールアドレスは既に使用されています。ログインしてください。";

// ============================================================================
// Password hashing
// ============================================================================

/// Argon2id in PHC string form (`$argon2id$v=19$...`).
pub fn hash_password(password: &str) -> Result<String, IkuseiError> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| IkuseiError::Other(format!("password salt: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| IkuseiError::Other(format!("password hashing: {e}")))
}

/// False for a wrong password and for anything that is not a PHC hash.
pub fn verify_password(stored: &str, password: &str) -> bool {
    PasswordHash::new(stored)
        .and_then(|parsed| Argon2::default().verify_password(password.as_bytes(), &parsed))
        .is_ok()
}

/// `XXXX-XXXX` single-use recovery codes.
pub fn generate_backup_codes(count: usize) -> Vec<String> {
    (0..count)
        .map(|_| {
            let raw = Uuid::new_v4().simple().to_string().to_uppercase();
            format!("{}-{}", &raw[..4], &raw[4..8])
        })
        .collect()
}

// ============================================================================
// Login
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub mfa_code: Option<String>,
    #[serde(default)]
    pub backup_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    Authenticated(User),
    /// Password accepted but no second factor was supplied.
    MfaRequired,
    InvalidSecondFactor,
    InvalidCredentials,
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub async fn authenticate(
    store: &dyn Store,
    config: &AuthConfig,
    creds: &Credentials,
) -> Result<LoginOutcome, StoreError> {
    let Some(user) = store.find_user(creds.username.trim()).await? else {
        return Ok(LoginOutcome::InvalidCredentials);
    };
    if !verify_password(&user.password_hash, &creds.password) {
        warn!(username = %user.username, "Rejected login: bad password");
        return Ok(LoginOutcome::InvalidCredentials);
    }
    if !user.mfa_enabled {
        return Ok(LoginOutcome::Authenticated(user));
    }

    let mfa_code = present(&creds.mfa_code);
    let backup_code = present(&creds.backup_code);
    if mfa_code.is_none() && backup_code.is_none() {
        return Ok(LoginOutcome::MfaRequired);
    }

    if mfa_code.is_some_and(|code| config.mfa_codes.iter().any(|c| c == code)) {
        return Ok(LoginOutcome::Authenticated(user));
    }

    if let Some(code) = backup_code {
        let normalized = code.to_uppercase();
        if store.consume_backup_code(user.id, &normalized).await? {
            let mut user = user;
            user.backup_codes.retain(|c| *c != normalized);
            info!(
                username = %user.username,
                remaining = user.backup_codes.len(),
                "Backup code consumed"
            );
            return Ok(LoginOutcome::Authenticated(user));
        }
    }

    warn!(username = %user.username, "Rejected login: bad second factor");
    Ok(LoginOutcome::InvalidSecondFactor)
}

// ============================================================================
// Registration
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

pub fn is_valid_email(email: &str) -> bool {
    static EMAIL_RE: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_RE
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(email))
}

/// Field checks that need no store access, in the order they are reported.
pub fn validate_registration<'a>(
    reg: &'a Registration,
    config: &AuthConfig,
) -> Result<(&'a str, &'a str, &'a str), IkuseiError> {
    let (Some(username), Some(email), Some(password)) = (
        present(&reg.username),
        present(&reg.email),
        reg.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(IkuseiError::validation(MSG_FIELDS_REQUIRED));
    };
    if username.chars().count() < config.min_username_len {
        return Err(IkuseiError::validation(format!(
            "Username must be at least {} characters",
            config.min_username_len
        )));
    }
    if !is_valid_email(email) {
        return Err(IkuseiError::validation(MSG_INVALID_EMAIL));
    }
    if password.chars().count() < config.min_password_len {
        return Err(IkuseiError::validation(format!(
            "Password must be at least {} characters long",
            config.min_password_len
        )));
    }
    Ok((username, email, password))
}

/// A created account together with its one-time backup codes.
#[derive(Debug, Clone)]
pub struct Registered {
    pub user: User,
    pub backup_codes: Vec<String>,
}

pub async fn register(
    store: &dyn Store,
    config: &AuthConfig,
    reg: &Registration,
) -> Result<Registered, IkuseiError> {
    let (username, email, password) = validate_registration(reg, config)?;

    if store.find_user(username).await?.is_some() {
        return Err(IkuseiError::validation(MSG_USERNAME_TAKEN));
    }
    if store.email_exists(email).await? {
        return Err(IkuseiError::validation(MSG_EMAIL_TAKEN));
    }

    let backup_codes = generate_backup_codes(BACKUP_CODE_COUNT);
    let user = store
        .insert_user(NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
            role: Role::Trainee,
            worker_id: None,
            mfa_enabled: true,
            backup_codes: backup_codes.clone(),
        })
        .await
        .map_err(|e| match e {
            // lost a race with a concurrent registration
            StoreError::Conflict(_) => IkuseiError::validation(MSG_USERNAME_TAKEN),
            other => other.into(),
        })?;
    info!(username = %user.username, "User registered");
    Ok(Registered { user, backup_codes })
}

/// Ensure the configured administrator exists. Safe to call on every start.
pub async fn seed_admin(store: &dyn Store, config: &AuthConfig) -> Result<(), IkuseiError> {
    if store.find_user(&config.admin_username).await?.is_some() {
        return Ok(());
    }
    store
        .insert_user(NewUser {
            username: config.admin_username.clone(),
            email: config.admin_email.clone(),
            password_hash: hash_password(&config.admin_password)?,
            role: Role::Administrator,
            worker_id: None,
            mfa_enabled: true,
            backup_codes: Vec::new(),
        })
        .await?;
    info!(username = %config.admin_username, "Seeded administrator account");
    Ok(())
}
