//! Token issuer: signed access tokens and rotating refresh tokens.
//!
//! Access tokens are short-lived and verified purely from signature and
//! clock, with no store lookup. Refresh tokens are signed with a separate
//! secret and carry a `jti` that keys the refresh registry.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use tracing::debug;
use uuid::Uuid;

use crate::auth::models::{Claims, RefreshClaims, User};
use crate::config::AuthConfig;

/// Verification failure kinds. Expiry is never conflated with a signature
/// problem: the session client relies on the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Invalid,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Expired => write!(f, "token expired"),
            TokenError::Invalid => write!(f, "invalid token"),
        }
    }
}

impl std::error::Error for TokenError {}

pub struct TokenIssuer {
    access_secret: String,
    refresh_secret: String,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(cfg: &AuthConfig) -> Self {
        Self {
            access_secret: cfg.access_secret.clone(),
            refresh_secret: cfg.refresh_secret.clone(),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::minutes(cfg.access_ttl_minutes),
            refresh_ttl: Duration::days(cfg.refresh_ttl_days),
        }
    }

    /// Generate an access token for a user. Role claims are snapshotted at
    /// issuance time.
    pub fn issue_access(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(self.access_ttl)
            .context("Invalid timestamp")?;

        let claims = Claims {
            sub: user.id.to_string(),
            roles: user.roles.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: expiration.timestamp() as usize,
        };

        debug!("Issuing access token for user {}", user.id);

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.access_secret.as_bytes()),
        )
        .context("Failed to sign access token")
    }

    /// Generate a refresh token. Returns the token and its expiry so the
    /// registry can record the row.
    pub fn issue_refresh(&self, user_id: Uuid, jti: Uuid) -> Result<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(self.refresh_ttl)
            .context("Invalid timestamp")?;

        let claims = RefreshClaims {
            sub: user_id.to_string(),
            jti: jti.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: expiration.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.refresh_secret.as_bytes()),
        )
        .context("Failed to sign refresh token")?;

        Ok((token, expiration))
    }

    /// Validate an access token. Pure function of signature + current time.
    pub fn verify_access(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.access_secret.as_bytes()),
            &self.validation(),
        )
        .map(|data| data.claims)
        .map_err(classify)
    }

    /// Validate a refresh token's signature and expiry. Registry state is
    /// checked separately at redemption.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        decode::<RefreshClaims>(
            token,
            &DecodingKey::from_secret(self.refresh_secret.as_bytes()),
            &self.validation(),
        )
        .map(|data| data.claims)
        .map_err(classify)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::{now_rfc3339, Role};

    fn test_config() -> AuthConfig {
        AuthConfig {
            access_secret: "test-secret-key-12345".to_string(),
            refresh_secret: "test-refresh-secret-67890".to_string(),
            issuer: "profrate".to_string(),
            audience: "profrate-api".to_string(),
            access_ttl_minutes: 15,
            refresh_ttl_days: 7,
            password_min_length: 12,
            max_sessions_per_user: 5,
            revoke_family_on_reuse: true,
        }
    }

    fn test_user(roles: Vec<Role>) -> User {
        User {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            password_hash: "hash".to_string(),
            active: true,
            roles,
            created_at: now_rfc3339(),
            updated_at: now_rfc3339(),
        }
    }

    #[test]
    fn test_access_token_round_trip() {
        let issuer = TokenIssuer::new(&test_config());
        let user = test_user(vec![Role::Admin, Role::Viewer]);

        let token = issuer.issue_access(&user).unwrap();
        let claims = issuer.verify_access(&token).unwrap();

        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.roles, vec![Role::Admin, Role::Viewer]);
        assert!(claims.exp > Utc::now().timestamp() as usize);
    }

    #[test]
    fn test_refresh_token_round_trip() {
        let issuer = TokenIssuer::new(&test_config());
        let user_id = Uuid::new_v4();
        let jti = Uuid::new_v4();

        let (token, expires_at) = issuer.issue_refresh(user_id, jti).unwrap();
        let claims = issuer.verify_refresh(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.jti, jti.to_string());
        assert_eq!(claims.exp, expires_at.timestamp() as usize);
    }

    #[test]
    fn test_expired_access_token_fails_with_expired() {
        let mut cfg = test_config();
        cfg.access_ttl_minutes = -5; // already in the past
        let issuer = TokenIssuer::new(&cfg);
        let user = test_user(vec![Role::Viewer]);

        let token = issuer.issue_access(&user).unwrap();
        assert_eq!(issuer.verify_access(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_garbage_token_fails_with_invalid() {
        let issuer = TokenIssuer::new(&test_config());
        assert_eq!(
            issuer.verify_access("not.a.token"),
            Err(TokenError::Invalid)
        );
    }

    #[test]
    fn test_access_and_refresh_secrets_are_isolated() {
        let issuer = TokenIssuer::new(&test_config());
        let user = test_user(vec![Role::Viewer]);

        // An access token must not verify as a refresh token and vice versa.
        let access = issuer.issue_access(&user).unwrap();
        assert!(issuer.verify_refresh(&access).is_err());

        let (refresh, _) = issuer.issue_refresh(user.id, Uuid::new_v4()).unwrap();
        assert!(issuer.verify_access(&refresh).is_err());
    }

    #[test]
    fn test_different_secrets_reject() {
        let issuer1 = TokenIssuer::new(&test_config());
        let mut cfg2 = test_config();
        cfg2.access_secret = "completely-different-secret".to_string();
        let issuer2 = TokenIssuer::new(&cfg2);

        let user = test_user(vec![Role::Viewer]);
        let token = issuer1.issue_access(&user).unwrap();
        assert_eq!(issuer2.verify_access(&token), Err(TokenError::Invalid));
    }
}
