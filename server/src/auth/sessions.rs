use chrono::{TimeDelta, Utc};
use rand::Rng;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::auth::SessionStore;
use crate::db::models::UserProfile;
use crate::db::{self, SqliteStore};
use crate::error::StoreError;

/// Generate a random 256-bit session token, hex-encoded.
/// Returns (token, sha256_hex). Only the hash is stored.
pub fn generate_session_token() -> (String, String) {
    let token_bytes: [u8; 32] = rand::rng().random();
    let token = hex::encode(token_bytes);
    let hash = hash_session_token(&token);
    (token, hash)
}

/// SHA-256 hash of a session token for storage comparison.
pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Delete sessions whose expiry has passed. Returns the number removed.
pub fn delete_expired_sessions(store: &SqliteStore) -> Result<usize, StoreError> {
    let conn = store.conn()?;
    let now = db::format_timestamp(&Utc::now());
    let removed = conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])?;
    Ok(removed)
}

/// Spawn a background task that periodically purges expired sessions.
pub fn spawn_session_cleanup(store: SqliteStore, interval_secs: u64) {
    let interval = std::time::Duration::from_secs(interval_secs.max(1));

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let store_clone = store.clone();
            match db::blocking(move || delete_expired_sessions(&store_clone)).await {
                Ok(count) if count > 0 => {
                    tracing::info!("Session cleanup: purged {} expired sessions", count);
                }
                Ok(_) => {
                    tracing::debug!("Session cleanup: no expired sessions");
                }
                Err(e) => {
                    tracing::error!("Session cleanup error: {}", e);
                }
            }
        }
    });
}

/// Session lifetime for `ttl_hours`, or `None` when it does not fit a `TimeDelta`.
pub fn session_ttl(ttl_hours: u64) -> Option<TimeDelta> {
    i64::try_from(ttl_hours).ok().and_then(TimeDelta::try_hours)
}

/// SQLite sessions with a fixed time-to-live.
#[derive(Clone)]
pub struct SqliteSessions {
    store: SqliteStore,
    ttl: TimeDelta,
}

impl SqliteSessions {
    /// An out-of-range TTL saturates; issuing then fails with a validation error.
    pub fn new(store: SqliteStore, ttl_hours: u64) -> Self {
        Self {
            store,
            ttl: session_ttl(ttl_hours).unwrap_or(TimeDelta::MAX),
        }
    }
}

impl SessionStore for SqliteSessions {
    fn validate_session(&self, token: &str) -> Result<UserProfile, StoreError> {
        if token.is_empty() {
            return Err(StoreError::NotFound);
        }

        let conn = self.store.conn()?;
        let token_hash = hash_session_token(token);
        let now = db::format_timestamp(&Utc::now());

        conn.query_row(
            "SELECT u.user_id, u.nickname, u.first_name, u.last_name, u.email, u.age, u.gender
             FROM sessions s
             JOIN users u ON u.user_id = s.user_id
             WHERE s.token_hash = ?1 AND s.expires_at > ?2",
            rusqlite::params![token_hash, now],
            crate::auth::accounts::profile_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound)
    }

    fn issue_session(&self, user_id: &str) -> Result<String, StoreError> {
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| StoreError::Validation("session lifetime out of range".to_string()))?;

        let conn = self.store.conn()?;
        let (token, token_hash) = generate_session_token();

        conn.execute(
            "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                Uuid::now_v7().to_string(),
                user_id,
                token_hash,
                db::format_timestamp(&expires_at),
                db::format_timestamp(&now),
            ],
        )?;

        Ok(token)
    }
}
