// Durable token storage

use anyhow::{Context, Result};
use dashmap::DashMap;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Password-flow access token
pub const ACCESS_TOKEN: &str = "access_token";
/// Password-flow refresh token
pub const REFRESH_TOKEN: &str = "refresh_token";
/// Token from the external identity provider redirect
pub const GOOGLE_ACCESS_TOKEN: &str = "google_access_token";

/// Every key `logout` must clear
pub const CREDENTIAL_KEYS: [&str; 3] = [ACCESS_TOKEN, REFRESH_TOKEN, GOOGLE_ACCESS_TOKEN];

/// Key-value storage for credentials that survives restarts
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: DashMap<String, String>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// SQLite-backed store using a single `auth_kv` table
pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
}

impl SqliteTokenStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create token store directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        tracing::debug!("Opened token store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Token store lock poisoned"))
    }
}

impl TokenStore for SqliteTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.lock()?
            .query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()
            .with_context(|| format!("Failed to read {} from token store", key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, value],
            )
            .with_context(|| format!("Failed to write {} to token store", key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?
            .execute("DELETE FROM auth_kv WHERE key = ?", [key])
            .with_context(|| format!("Failed to remove {} from token store", key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn TokenStore) {
        assert_eq!(store.get(ACCESS_TOKEN).unwrap(), None);

        store.set(ACCESS_TOKEN, "a1").unwrap();
        store.set(REFRESH_TOKEN, "r1").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN).unwrap().as_deref(), Some("a1"));

        // Last write wins
        store.set(ACCESS_TOKEN, "a2").unwrap();
        assert_eq!(store.get(ACCESS_TOKEN).unwrap().as_deref(), Some("a2"));

        for key in CREDENTIAL_KEYS {
            store.remove(key).unwrap();
        }
        // Removing an absent key is fine
        store.remove(GOOGLE_ACCESS_TOKEN).unwrap();

        for key in CREDENTIAL_KEYS {
            assert_eq!(store.get(key).unwrap(), None);
        }
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::new();
        exercise(&store);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sqlite_store() {
        let store = SqliteTokenStore::open_in_memory().unwrap();
        exercise(&store);
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("storefront-session-{}", std::process::id()));
        let path = dir.join("tokens.sqlite3");

        {
            let store = SqliteTokenStore::open(&path).unwrap();
            store.set(GOOGLE_ACCESS_TOKEN, "g").unwrap();
        }

        let store = SqliteTokenStore::open(&path).unwrap();
        assert_eq!(store.get(GOOGLE_ACCESS_TOKEN).unwrap().as_deref(), Some("g"));

        drop(store);
        std::fs::remove_dir_all(&dir).ok();
    }
}
