//! Authentication data structures: users, roles, claims, and the auth DTOs.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed role set. Using an enum instead of free-form strings means a typo
/// in a required-role declaration fails to compile instead of silently
/// granting nothing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "editor")]
    Editor,
    #[serde(rename = "viewer")]
    Viewer,
}

/// Role a freshly registered account receives.
pub const DEFAULT_REGISTER_ROLE: Role = Role::Viewer;

pub const ALL_ROLES: [Role; 3] = [Role::Admin, Role::Editor, Role::Viewer];

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "editor" => Some(Role::Editor),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Admin => "Full administrative access",
            Role::Editor => "Manage content but no user administration",
            Role::Viewer => "Read-only access to catalog resources",
        }
    }
}

/// User account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub active: bool,
    pub roles: Vec<Role>,
    pub created_at: String,
    pub updated_at: String,
}

/// Access-token claims. Roles are a snapshot taken at issuance; they are not
/// re-checked against the store until the next refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject (user id)
    pub roles: Vec<Role>,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

/// Refresh-token claims, signed with a separate secret. The `jti` is the
/// registry row identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: String,
}

/// Token pair handed out by login and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
        }
    }
}

/// User response (sanitized)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub active: bool,
    pub roles: Vec<Role>,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            active: user.active,
            roles: user.roles.clone(),
            created_at: user.created_at.clone(),
        }
    }
}

/// Admin user update: role reassignment and activation toggle.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<Role>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

/// Role catalog entry returned by the admin listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoleInfo {
    pub name: Role,
    pub description: String,
}

/// Normalize an email for the uniqueness check: trimmed, lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serialization() {
        let admin = Role::Admin;
        let json = serde_json::to_string(&admin).unwrap();
        assert_eq!(json, r#""admin""#);

        let editor: Role = serde_json::from_str(r#""editor""#).unwrap();
        assert_eq!(editor, Role::Editor);
    }

    #[test]
    fn test_role_string_conversion() {
        assert_eq!(Role::Admin.as_str(), "admin");
        assert_eq!(Role::from_str("EDITOR"), Some(Role::Editor));
        assert_eq!(Role::from_str("superuser"), None);
    }

    #[test]
    fn test_email_normalization() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            password_hash: "secret-hash".to_string(),
            active: true,
            roles: vec![Role::Viewer],
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("a@example.com"));
    }
}
