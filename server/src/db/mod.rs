pub mod migrations;
pub mod models;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::StoreError;

/// Type alias for the shared database connection.
/// rusqlite is synchronous; callers go through `blocking` below.
pub type DbPool = Arc<Mutex<Connection>>;

/// bcrypt cost used for new password hashes.
const DEFAULT_HASH_COST: u32 = bcrypt::DEFAULT_COST;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("forum.db");
    let mut conn = Connection::open(&db_path)?;

    // WAL lets history reads proceed while a message insert is in flight
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    let migrations = migrations::migrations();
    migrations.to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// SQLite-backed implementation of the session, account and message stores.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
    hash_cost: u32,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            hash_cost: DEFAULT_HASH_COST,
        }
    }

    /// Override the bcrypt cost (tests use the minimum to stay fast).
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    pub(crate) fn hash_cost(&self) -> u32 {
        self.hash_cost
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

/// Run a synchronous store call on the blocking pool.
pub async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

/// Format a timestamp for storage. Fixed precision keeps text order equal to time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp inside a row mapper.
pub fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}
