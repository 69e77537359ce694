//! Refresh-token registry: single-use rotation, revocation, and lineage.
//!
//! Tokens are tracked by SHA-256 hash; plaintext is never stored. Redemption
//! is serialized by a compare-and-swap on the revoked flag, so two concurrent
//! redemptions of the same token produce exactly one success.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Redemption failures, surfaced to the auth API layer.
#[derive(Debug)]
pub enum RedeemError {
    NotFound,
    Revoked,
    Expired,
    Storage(anyhow::Error),
}

impl std::fmt::Display for RedeemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedeemError::NotFound => write!(f, "refresh token not found"),
            RedeemError::Revoked => write!(f, "refresh token revoked"),
            RedeemError::Expired => write!(f, "refresh token expired"),
            RedeemError::Storage(e) => write!(f, "registry storage error: {e}"),
        }
    }
}

impl std::error::Error for RedeemError {}

/// One outstanding refresh token.
#[derive(Debug, Clone)]
pub struct RefreshRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Root of the rotation chain this token descends from.
    pub family_id: Uuid,
    pub token_hash: String,
    pub issued_at: String,
    pub expires_at: String,
    pub revoked: bool,
}

pub struct RefreshRegistry {
    db_path: String,
    max_sessions_per_user: usize,
    revoke_family_on_reuse: bool,
}

/// Hash a refresh token for storage and lookup.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl RefreshRegistry {
    pub fn new(
        db_path: &str,
        max_sessions_per_user: usize,
        revoke_family_on_reuse: bool,
    ) -> Result<Self> {
        let registry = Self {
            db_path: db_path.to_string(),
            max_sessions_per_user,
            revoke_family_on_reuse,
        };
        registry.init_db()?;
        Ok(registry)
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS refresh_tokens (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                family_id TEXT NOT NULL,
                token_hash TEXT UNIQUE NOT NULL,
                issued_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_refresh_user ON refresh_tokens(user_id)",
            [],
        )?;
        Ok(())
    }

    /// Record a freshly issued refresh token. For a login, `family_id` equals
    /// the token id (a new lineage); for a rotation it is inherited from the
    /// redeemed predecessor.
    pub fn register(
        &self,
        user_id: Uuid,
        token_id: Uuid,
        family_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO refresh_tokens (id, user_id, family_id, token_hash, issued_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                token_id.to_string(),
                user_id.to_string(),
                family_id.to_string(),
                hash_token(token),
                Utc::now().to_rfc3339(),
                expires_at.to_rfc3339(),
            ],
        )?;

        self.prune_user_sessions(&conn, user_id)?;
        debug!("Registered refresh token {token_id} for user {user_id}");
        Ok(())
    }

    /// Atomically consume a refresh token: exactly one of any number of
    /// concurrent calls for the same token succeeds; the rest observe
    /// `Revoked`. Reuse of an already-spent token is flagged as a possible
    /// replay and, by default, burns the whole lineage.
    pub fn consume(&self, token: &str) -> Result<RefreshRecord, RedeemError> {
        let conn = self.conn().map_err(RedeemError::Storage)?;
        let token_hash = hash_token(token);

        let record = self
            .find_by_hash(&conn, &token_hash)
            .map_err(RedeemError::Storage)?
            .ok_or(RedeemError::NotFound)?;

        if record.revoked {
            warn!(
                user_id = %record.user_id,
                family_id = %record.family_id,
                "🚨 Reuse of revoked refresh token, possible theft"
            );
            if self.revoke_family_on_reuse {
                self.revoke_family(&record.family_id)
                    .map_err(RedeemError::Storage)?;
            }
            return Err(RedeemError::Revoked);
        }

        // Lazy expiry: no background sweep is needed for correctness.
        let expired = DateTime::parse_from_rfc3339(&record.expires_at)
            .map(|t| t.with_timezone(&Utc) < Utc::now())
            .unwrap_or(true);
        if expired {
            conn.execute(
                "DELETE FROM refresh_tokens WHERE id = ?1",
                params![record.id.to_string()],
            )
            .map_err(|e| RedeemError::Storage(e.into()))?;
            return Err(RedeemError::Expired);
        }

        // The CAS: only one caller flips revoked 0 -> 1.
        let rows = conn
            .execute(
                "UPDATE refresh_tokens SET revoked = 1 WHERE id = ?1 AND revoked = 0",
                params![record.id.to_string()],
            )
            .map_err(|e| RedeemError::Storage(e.into()))?;

        if rows == 0 {
            // Lost the race to a concurrent redemption.
            return Err(RedeemError::Revoked);
        }

        Ok(record)
    }

    /// Revoke a single token. Idempotent: revoking an unknown or
    /// already-revoked token is a no-op.
    pub fn revoke(&self, token: &str) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE refresh_tokens SET revoked = 1 WHERE token_hash = ?1",
            params![hash_token(token)],
        )?;
        if rows > 0 {
            info!("Revoked refresh token");
        }
        Ok(())
    }

    /// Revoke every token in a lineage. Used when a spent token resurfaces.
    pub fn revoke_family(&self, family_id: &Uuid) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE refresh_tokens SET revoked = 1 WHERE family_id = ?1",
            params![family_id.to_string()],
        )?;
        warn!("Revoked {rows} token(s) in family {family_id}");
        Ok(())
    }

    /// Delete expired rows. Storage reclamation only.
    pub fn prune_expired(&self) -> Result<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM refresh_tokens WHERE expires_at < ?1",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(rows)
    }

    /// Count of non-revoked tokens for a user. Exposed for tests and the
    /// admin surface.
    pub fn active_count(&self, user_id: &Uuid) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ?1 AND revoked = 0",
            params![user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Total rows for a user, spent ones included.
    pub fn session_count(&self, user_id: &Uuid) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ?1",
            params![user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn find_by_hash(&self, conn: &Connection, token_hash: &str) -> Result<Option<RefreshRecord>> {
        let record = conn
            .query_row(
                "SELECT id, user_id, family_id, token_hash, issued_at, expires_at, revoked
                 FROM refresh_tokens WHERE token_hash = ?1",
                params![token_hash],
                |row| {
                    Ok(RefreshRecord {
                        id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
                        user_id: Uuid::parse_str(&row.get::<_, String>(1)?).unwrap_or_default(),
                        family_id: Uuid::parse_str(&row.get::<_, String>(2)?).unwrap_or_default(),
                        token_hash: row.get(3)?,
                        issued_at: row.get(4)?,
                        expires_at: row.get(5)?,
                        revoked: row.get::<_, i64>(6)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// Cap live lineages per user, pruning the oldest non-revoked rows.
    fn prune_user_sessions(&self, conn: &Connection, user_id: Uuid) -> Result<()> {
        if self.max_sessions_per_user == 0 {
            return Ok(());
        }
        conn.execute(
            "DELETE FROM refresh_tokens WHERE user_id = ?1 AND revoked = 0 AND id NOT IN (
                SELECT id FROM refresh_tokens
                WHERE user_id = ?1 AND revoked = 0
                ORDER BY issued_at DESC LIMIT ?2
            )",
            params![user_id.to_string(), self.max_sessions_per_user as i64],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn create_test_registry(max_sessions: usize) -> (RefreshRegistry, NamedTempFile) {
        let temp_file = NamedTempFile::new().unwrap();
        let registry =
            RefreshRegistry::new(temp_file.path().to_str().unwrap(), max_sessions, true).unwrap();
        (registry, temp_file)
    }

    fn far_future() -> DateTime<Utc> {
        Utc::now() + ChronoDuration::days(7)
    }

    #[test]
    fn test_register_and_consume() {
        let (registry, _temp) = create_test_registry(5);
        let user_id = Uuid::new_v4();
        let jti = Uuid::new_v4();

        registry
            .register(user_id, jti, jti, "token-1", far_future())
            .unwrap();

        let record = registry.consume("token-1").unwrap();
        assert_eq!(record.user_id, user_id);
        assert_eq!(record.family_id, jti);
    }

    #[test]
    fn test_unknown_token_is_not_found() {
        let (registry, _temp) = create_test_registry(5);
        assert!(matches!(
            registry.consume("never-issued"),
            Err(RedeemError::NotFound)
        ));
    }

    #[test]
    fn test_double_consume_single_success() {
        let (registry, _temp) = create_test_registry(5);
        let user_id = Uuid::new_v4();
        let jti = Uuid::new_v4();
        registry
            .register(user_id, jti, jti, "token-1", far_future())
            .unwrap();

        assert!(registry.consume("token-1").is_ok());
        assert!(matches!(
            registry.consume("token-1"),
            Err(RedeemError::Revoked)
        ));
    }

    #[test]
    fn test_concurrent_consume_exactly_one_success() {
        let (registry, _temp) = create_test_registry(5);
        let registry = Arc::new(registry);
        let user_id = Uuid::new_v4();
        let jti = Uuid::new_v4();
        registry
            .register(user_id, jti, jti, "contested", far_future())
            .unwrap();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.consume("contested").is_ok())
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn test_expired_token_lazily_rejected_and_deleted() {
        let (registry, _temp) = create_test_registry(5);
        let user_id = Uuid::new_v4();
        let jti = Uuid::new_v4();
        registry
            .register(
                user_id,
                jti,
                jti,
                "stale",
                Utc::now() - ChronoDuration::hours(1),
            )
            .unwrap();

        assert!(matches!(
            registry.consume("stale"),
            Err(RedeemError::Expired)
        ));
        // The row is reclaimed; a second attempt no longer finds it.
        assert!(matches!(
            registry.consume("stale"),
            Err(RedeemError::NotFound)
        ));
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let (registry, _temp) = create_test_registry(5);
        let user_id = Uuid::new_v4();
        let jti = Uuid::new_v4();
        registry
            .register(user_id, jti, jti, "to-revoke", far_future())
            .unwrap();

        registry.revoke("to-revoke").unwrap();
        registry.revoke("to-revoke").unwrap();
        registry.revoke("never-issued").unwrap();

        assert!(matches!(
            registry.consume("to-revoke"),
            Err(RedeemError::Revoked)
        ));
    }

    #[test]
    fn test_reuse_burns_whole_family() {
        let (registry, _temp) = create_test_registry(5);
        let user_id = Uuid::new_v4();
        let root = Uuid::new_v4();
        registry
            .register(user_id, root, root, "gen-1", far_future())
            .unwrap();

        // Legitimate rotation: gen-1 spent, gen-2 issued in the same family.
        let record = registry.consume("gen-1").unwrap();
        let child = Uuid::new_v4();
        registry
            .register(user_id, child, record.family_id, "gen-2", far_future())
            .unwrap();

        // Stolen gen-1 resurfaces: the whole lineage dies.
        assert!(matches!(
            registry.consume("gen-1"),
            Err(RedeemError::Revoked)
        ));
        assert!(matches!(
            registry.consume("gen-2"),
            Err(RedeemError::Revoked)
        ));
        assert_eq!(registry.active_count(&user_id).unwrap(), 0);
    }

    #[test]
    fn test_session_cap_prunes_oldest() {
        let (registry, _temp) = create_test_registry(2);
        let user_id = Uuid::new_v4();

        for i in 0..3 {
            let jti = Uuid::new_v4();
            registry
                .register(user_id, jti, jti, &format!("login-{i}"), far_future())
                .unwrap();
            // Distinct issued_at ordering.
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        assert_eq!(registry.active_count(&user_id).unwrap(), 2);
        assert!(matches!(
            registry.consume("login-0"),
            Err(RedeemError::NotFound)
        ));
        assert!(registry.consume("login-2").is_ok());
    }

    #[test]
    fn test_prune_expired_reclaims_rows() {
        let (registry, _temp) = create_test_registry(5);
        let user_id = Uuid::new_v4();
        let jti = Uuid::new_v4();
        registry
            .register(
                user_id,
                jti,
                jti,
                "old",
                Utc::now() - ChronoDuration::days(1),
            )
            .unwrap();

        assert_eq!(registry.prune_expired().unwrap(), 1);
        assert_eq!(registry.session_count(&user_id).unwrap(), 0);
    }
}
