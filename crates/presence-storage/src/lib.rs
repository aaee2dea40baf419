mod session;

pub use session::{SessionError, SessionStore, NOTIFICATION_SETTINGS_KEY, USER_KEY};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

pub const HOST_SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage lock poisoned")]
    Poisoned,
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

/// Durable string key-value storage provided by the host.
pub trait HostStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        schema_version(&conn)
    }
}

fn schema_version(conn: &Connection) -> Result<i64, StorageError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn migrate(conn: &Connection) -> Result<(), StorageError> {
    let current = schema_version(conn)?;
    if current > HOST_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchemaVersion {
            found: current,
            supported: HOST_SCHEMA_VERSION,
        });
    }

    if current < 1 {
        let sql = include_str!("../migrations/0001_host_kv.sql");
        conn.execute_batch(sql)?;
        conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
    }

    Ok(())
}

impl HostStorage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        conn.execute(
            "
            INSERT INTO kv (key, value, updated_at_ms)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at_ms = excluded.updated_at_ms
            ",
            params![key, value, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn sqlite_set_get_overwrite_remove() {
        let storage = SqliteStorage::open_in_memory().expect("open");
        assert_eq!(storage.get("user").expect("get"), None);

        storage.set("user", "{\"id\":\"u1\"}").expect("set");
        storage.set("user", "{\"id\":\"u2\"}").expect("overwrite");
        assert_eq!(
            storage.get("user").expect("get"),
            Some("{\"id\":\"u2\"}".to_string())
        );

        storage.remove("user").expect("remove");
        storage.remove("user").expect("remove twice");
        assert_eq!(storage.get("user").expect("get"), None);
    }

    #[test]
    fn sqlite_values_survive_reopen() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let storage = SqliteStorage::open(file.path()).expect("open");
            storage.set("notificationSettings", "{}").expect("set");
            assert_eq!(storage.schema_version().expect("version"), HOST_SCHEMA_VERSION);
        }

        let reopened = SqliteStorage::open(file.path()).expect("reopen");
        assert_eq!(
            reopened.get("notificationSettings").expect("get"),
            Some("{}".to_string())
        );
    }

    #[test]
    fn newer_schema_is_rejected() {
        let file = NamedTempFile::new().expect("temp file");
        {
            let conn = Connection::open(file.path()).expect("open raw");
            conn.execute("PRAGMA user_version = 9", []).expect("bump version");
        }

        let result = SqliteStorage::open(file.path());
        assert!(matches!(
            result,
            Err(StorageError::UnsupportedSchemaVersion { found: 9, .. })
        ));
    }

    #[test]
    fn memory_storage_behaves_like_sqlite() {
        let storage = MemoryStorage::new();
        storage.set("k", "v").expect("set");
        assert_eq!(storage.get("k").expect("get"), Some("v".to_string()));
        storage.remove("k").expect("remove");
        assert_eq!(storage.get("k").expect("get"), None);
    }
}
