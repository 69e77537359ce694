//! Runtime configuration, sourced from the environment.

use std::env;
use std::fmt::Debug;
use std::str::FromStr;

use tracing::warn;

/// Everything the token lifecycle needs to know, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret for signing access tokens.
    pub access_secret: String,
    /// Separate secret for refresh tokens, so one leak never compromises both.
    pub refresh_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub password_min_length: usize,
    /// Oldest sessions beyond this cap are pruned at each new login.
    pub max_sessions_per_user: usize,
    /// Whether redeeming an already-revoked token burns its whole lineage.
    pub revoke_family_on_reuse: bool,
}

fn parse_env<T>(var: &str, default: T) -> T
where
    T: FromStr + Debug,
{
    match env::var(var) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {var}={raw}, using {default:?}");
                default
            }
        },
        Err(_) => default,
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_secret: "dev-access-secret-change-in-production-min-32-chars".to_string(),
            refresh_secret: "dev-refresh-secret-change-in-production-min-32-chars".to_string(),
            issuer: "profrate".to_string(),
            audience: "profrate-api".to_string(),
            access_ttl_minutes: 15,
            refresh_ttl_days: 7,
            password_min_length: 12,
            max_sessions_per_user: 5,
            revoke_family_on_reuse: true,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            access_secret: env::var("JWT_ACCESS_SECRET").unwrap_or(defaults.access_secret),
            refresh_secret: env::var("JWT_REFRESH_SECRET").unwrap_or(defaults.refresh_secret),
            issuer: env::var("JWT_ISSUER").unwrap_or(defaults.issuer),
            audience: env::var("JWT_AUDIENCE").unwrap_or(defaults.audience),
            access_ttl_minutes: parse_env("ACCESS_TTL_MINUTES", defaults.access_ttl_minutes),
            refresh_ttl_days: parse_env("REFRESH_TTL_DAYS", defaults.refresh_ttl_days),
            password_min_length: parse_env("PASSWORD_MIN_LENGTH", defaults.password_min_length),
            max_sessions_per_user: parse_env(
                "MAX_ACTIVE_SESSIONS_PER_USER",
                defaults.max_sessions_per_user,
            ),
            revoke_family_on_reuse: parse_env(
                "REVOKE_FAMILY_ON_REUSE",
                defaults.revoke_family_on_reuse,
            ),
        }
    }
}
