use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Trainee,
    Administrator,
    Auditor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Trainee => "trainee",
            Role::Administrator => "administrator",
            Role::Auditor => "auditor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trainee" => Some(Role::Trainee),
            "administrator" => Some(Role::Administrator),
            "auditor" => Some(Role::Auditor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub worker_id: Option<i64>,
    pub mfa_enabled: bool,
    /// Unused single-use backup codes.
    #[serde(skip_serializing)]
    pub backup_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A user ready to be inserted; the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub worker_id: Option<i64>,
    pub mfa_enabled: bool,
    pub backup_codes: Vec<String>,
}

impl NewUser {
    pub fn into_user(self, id: i64) -> User {
        User {
            id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            role: self.role,
            worker_id: self.worker_id,
            mfa_enabled: self.mfa_enabled,
            backup_codes: self.backup_codes,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_json_hides_secrets() {
        let user = NewUser {
            username: "admin".into(),
            email: "admin@example.com".into(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".into(),
            role: Role::Administrator,
            worker_id: None,
            mfa_enabled: true,
            backup_codes: vec!["ABCD-1234".into()],
        }
        .into_user(1);
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["role"], "administrator");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("backup_codes").is_none());
    }

    #[test]
    fn test_role_parse_round_trip() {
        for role in [Role::Trainee, Role::Administrator, Role::Auditor] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("root"), None);
    }
}
