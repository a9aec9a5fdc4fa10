// Backing storage for credentials
// The store addresses two fixed keys; backends only need get/set/remove

use anyhow::{Context, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};

/// Key/value medium behind the [`CredentialStore`](super::CredentialStore)
pub trait TokenStorage: Send + Sync {
    /// Read a value, `Ok(None)` when the key is not present
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `entries` and remove `removals` as one unit
    fn apply(&self, entries: &[(&str, &str)], removals: &[&str]) -> Result<()>;

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
        self.apply(entries, &[])
    }

    fn remove_many(&self, keys: &[&str]) -> Result<()> {
        self.apply(&[], keys)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value)])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.remove_many(&[key])
    }
}

/// Process-local storage, nothing survives a restart
#[derive(Default)]
pub struct MemoryStorage {
    entries: DashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn apply(&self, entries: &[(&str, &str)], removals: &[&str]) -> Result<()> {
        for (key, value) in entries {
            self.entries.insert(key.to_string(), value.to_string());
        }
        for key in removals {
            self.entries.remove(*key);
        }
        Ok(())
    }
}

/// SQLite-backed storage used by the CLI
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteStorage {
    /// Open (or create) the database and its `auth_kv` table
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::init(conn, path.to_path_buf())
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn, PathBuf::from(":memory:"))
    }

    fn init(conn: Connection, path: PathBuf) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        tracing::debug!("Credential storage ready: {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStorage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()
        .with_context(|| format!("Failed to read '{}' from credential storage", key))
    }

    fn apply(&self, entries: &[(&str, &str)], removals: &[&str]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("Failed to begin transaction")?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [key, value],
            )
            .with_context(|| format!("Failed to write '{}' to credential storage", key))?;
        }
        for key in removals {
            tx.execute("DELETE FROM auth_kv WHERE key = ?", [key])
                .with_context(|| format!("Failed to remove '{}' from credential storage", key))?;
        }
        tx.commit().context("Failed to commit credential write")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &dyn TokenStorage) {
        assert_eq!(storage.get("token").unwrap(), None);

        storage
            .set_many(&[("token", "access-1"), ("refreshToken", "renew-1")])
            .unwrap();
        assert_eq!(storage.get("token").unwrap().as_deref(), Some("access-1"));
        assert_eq!(
            storage.get("refreshToken").unwrap().as_deref(),
            Some("renew-1")
        );

        storage.set("token", "access-2").unwrap();
        assert_eq!(storage.get("token").unwrap().as_deref(), Some("access-2"));

        storage.remove_many(&["token", "refreshToken"]).unwrap();
        assert_eq!(storage.get("token").unwrap(), None);
        assert_eq!(storage.get("refreshToken").unwrap(), None);

        // Removing a missing key is not an error
        storage.remove("token").unwrap();

        storage
            .set_many(&[("token", "access-3"), ("refreshToken", "renew-3")])
            .unwrap();
        storage
            .apply(&[("token", "access-4")], &["refreshToken"])
            .unwrap();
        assert_eq!(storage.get("token").unwrap().as_deref(), Some("access-4"));
        assert_eq!(storage.get("refreshToken").unwrap(), None);
    }

    #[test]
    fn test_memory_storage() {
        exercise(&MemoryStorage::new());
    }

    #[test]
    fn test_sqlite_storage_in_memory() {
        exercise(&SqliteStorage::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_storage_persists() {
        let dir = std::env::temp_dir().join(format!("mc-storage-{}", uuid::Uuid::new_v4()));
        let path = dir.join("credentials.sqlite3");

        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.set("token", "persisted").unwrap();
        }

        let reopened = SqliteStorage::open(&path).unwrap();
        assert_eq!(reopened.get("token").unwrap().as_deref(), Some("persisted"));
        assert_eq!(reopened.path(), path.as_path());

        drop(reopened);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_sqlite_apply_is_one_transaction() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .set_many(&[("token", "access-1"), ("refreshToken", "renew-1")])
            .unwrap();

        // Fails on the removal after the write: nothing may be committed
        storage
            .conn
            .lock()
            .execute_batch(
                "CREATE TRIGGER keep_renewal BEFORE DELETE ON auth_kv
                 BEGIN SELECT RAISE(ABORT, 'locked'); END;",
            )
            .unwrap();

        let err = storage.apply(&[("token", "access-2")], &["refreshToken"]);
        assert!(err.is_err());
        assert_eq!(storage.get("token").unwrap().as_deref(), Some("access-1"));
        assert_eq!(
            storage.get("refreshToken").unwrap().as_deref(),
            Some("renew-1")
        );
    }
}
