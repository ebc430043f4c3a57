//! SQLite-backed storage.
//!
//! One database file holds both the durable key-value namespaces used by the
//! engine (`kv` table) and a local copy of the recycling entry history
//! (`recycling_entries` table) that stands in for the hosted backend.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::data_dir;
use crate::error::{CoreError, FetchError, StorageError};
use crate::history::{EntryOrder, EntryQuery, RecyclingEntry};
use crate::ports::{DurableStore, RemoteStore};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open `<data_dir>/ecotale.db`, creating tables as needed.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("ecotale.db");
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(StorageError::from)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory().map_err(StorageError::from)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn().execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS recycling_entries (
                id            TEXT PRIMARY KEY,
                material_type TEXT NOT NULL,
                weight_kg     REAL NOT NULL,
                co2_saved_kg  REAL NOT NULL DEFAULT 0,
                created_at    TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_created_at ON recycling_entries(created_at);
            CREATE INDEX IF NOT EXISTS idx_entries_material ON recycling_entries(material_type);",
        )?;
        Ok(())
    }

    /// Store a recycling entry.
    pub fn insert_entry(&self, entry: &RecyclingEntry) -> Result<(), StorageError> {
        self.conn().execute(
            "INSERT INTO recycling_entries (id, material_type, weight_kg, co2_saved_kg, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id.to_string(),
                entry.material_type,
                entry.weight_kg,
                entry.co2_saved_kg,
                entry.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )?;
        Ok(())
    }

    /// Delete a recycling entry. Returns whether it existed.
    pub fn delete_entry(&self, id: Uuid) -> Result<bool, StorageError> {
        let affected = self.conn().execute(
            "DELETE FROM recycling_entries WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Query the entry history.
    pub fn list_entries(&self, query: &EntryQuery) -> Result<Vec<RecyclingEntry>, StorageError> {
        let column = match query.order_by {
            EntryOrder::CreatedAt => "created_at",
            EntryOrder::WeightKg => "weight_kg",
            EntryOrder::Co2SavedKg => "co2_saved_kg",
        };
        let direction = if query.descending { "DESC" } else { "ASC" };
        let limit = query.limit.map(|n| n as i64).unwrap_or(-1);
        let sql = format!(
            "SELECT id, material_type, weight_kg, co2_saved_kg, created_at
             FROM recycling_entries
             ORDER BY {column} {direction}, id ASC
             LIMIT ?1"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, material_type, weight_kg, co2_saved_kg, created_at) = row?;
            let id = Uuid::parse_str(&id).map_err(|e| StorageError::Corrupt {
                namespace: "recycling_entries".into(),
                message: e.to_string(),
            })?;
            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| StorageError::Corrupt {
                    namespace: "recycling_entries".into(),
                    message: e.to_string(),
                })?
                .with_timezone(&Utc);
            entries.push(RecyclingEntry {
                id,
                material_type,
                weight_kg,
                co2_saved_kg,
                created_at,
            });
        }
        Ok(entries)
    }
}

impl DurableStore for Database {
    fn load_namespace(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![name], |row| row.get::<_, Vec<u8>>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_namespace(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![name, bytes],
            )
            .map_err(|e| match StorageError::from(e) {
                StorageError::QuotaExceeded { .. } => StorageError::QuotaExceeded {
                    namespace: name.to_string(),
                },
                other => other,
            })?;
        Ok(())
    }

    fn remove_namespace(&self, name: &str) -> Result<(), StorageError> {
        self.conn()
            .execute("DELETE FROM kv WHERE key = ?1", params![name])?;
        Ok(())
    }

    fn list_namespaces(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

#[async_trait]
impl RemoteStore for Database {
    type Query = EntryQuery;
    type Record = RecyclingEntry;

    async fn read(&self, query: &EntryQuery) -> Result<Vec<RecyclingEntry>, FetchError> {
        self.list_entries(query)
            .map_err(|e| FetchError::Loader(e.to_string()))
    }
}
