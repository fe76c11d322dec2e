//! Usage: Durable credential storage (SQLite-backed key/value with an in-memory variant for tests).

use crate::shared::error::{store_err, AppResult};
use crate::shared::mutex_ext::MutexExt;
use crate::shared::time::now_unix_seconds;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub const KEY_ACCESS_TOKEN: &str = "access_token";
pub const KEY_REFRESH_TOKEN: &str = "refresh_token";
pub const KEY_CURRENT_USER: &str = "current_user";

const BUSY_TIMEOUT: Duration = Duration::from_millis(2000);
const POOL_MAX_SIZE: u32 = 4;
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable key/value store for session credentials. Implementations must be
/// safe to call from concurrent requests.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
}

/// SQLite-backed store. One row per credential key; writes upsert in place.
pub struct SqliteTokenStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteTokenStore {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            configure_connection(conn)
        });
        Self::build(manager)
    }

    /// Private per-process store, handy for tests and throwaway sessions.
    pub fn open_in_memory() -> AppResult<Self> {
        // A single connection keeps every reader on the same in-memory db.
        let manager =
            SqliteConnectionManager::memory().with_init(|conn| configure_connection(conn));
        let store = Self::build_with_pool_size(manager, 1)?;
        Ok(store)
    }

    fn build(manager: SqliteConnectionManager) -> AppResult<Self> {
        Self::build_with_pool_size(manager, POOL_MAX_SIZE)
    }

    fn build_with_pool_size(manager: SqliteConnectionManager, max_size: u32) -> AppResult<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .build(manager)
            .map_err(|e| store_err!("failed to create credential pool: {e}"))?;

        let conn = pool
            .get()
            .map_err(|e| store_err!("failed to get startup connection: {e}"))?;
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS credentials (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
"#,
        )
        .map_err(|e| store_err!("failed to init credentials schema: {e}"))?;

        Ok(Self { pool })
    }

    fn open_connection(&self) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| store_err!("failed to get connection from pool: {e}"))
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;
"#,
    )
}

impl TokenStore for SqliteTokenStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.open_connection()?;
        conn.query_row(
            "SELECT value FROM credentials WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(|e| store_err!("failed to read credential {key}: {e}"))
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.open_connection()?;
        conn.execute(
            r#"
INSERT INTO credentials (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
"#,
            params![key, value, now_unix_seconds()],
        )
        .map_err(|e| store_err!("failed to write credential {key}: {e}"))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let conn = self.open_connection()?;
        conn.execute("DELETE FROM credentials WHERE key = ?1", params![key])
            .map_err(|e| store_err!("failed to remove credential {key}: {e}"))?;
        Ok(())
    }
}

/// Volatile store for unit tests and embedders that manage persistence
/// themselves.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        let entries = self.entries.lock_or_recover();
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut entries = self.entries.lock_or_recover();
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let mut entries = self.entries.lock_or_recover();
        entries.remove(key);
        Ok(())
    }
}
