//! SQLite-based persistent cache storage.

use super::traits::{
    CacheStorage, CachedEntry, DynStoreHandle, EntryMeta, StoreHandle, StoreName,
};
use crate::error::{Error, Result};
use crate::request::{RequestKey, Response};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// SQLite-backed storage.
///
/// All stores share one database; each store name is a namespace.
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database at `db_path`.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::io_with_path(e, parent))?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| Error::Database {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        // WAL lets a serving instance read while a new instance warms up
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| Error::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        Self::from_connection(conn)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                store TEXT NOT NULL,
                key TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                stored_at TEXT NOT NULL,
                tag TEXT,
                UNIQUE (store, key)
            );

            CREATE INDEX IF NOT EXISTS idx_entries_store_age
                ON cache_entries(store, stored_at);
            "#,
        )
        .map_err(|e| Error::Database {
            message: format!("Failed to initialize cache schema: {}", e),
            source: Some(e),
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn lock<'a>(conn: &'a Mutex<Connection>, store: &str) -> Result<MutexGuard<'a, Connection>> {
    conn.lock().map_err(|e| Error::StoreUnavailable {
        store: store.to_string(),
        message: format!("Failed to lock database: {}", e),
    })
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl CacheStorage for SqliteStorage {
    async fn open(&self, name: &StoreName) -> Result<DynStoreHandle> {
        Ok(Arc::new(SqliteStore {
            name: name.clone(),
            conn: Arc::clone(&self.conn),
        }))
    }

    async fn store_names(&self) -> Result<Vec<StoreName>> {
        let conn = lock(&self.conn, "*")?;
        let mut stmt = conn.prepare("SELECT DISTINCT store FROM cache_entries ORDER BY store")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names.into_iter().map(StoreName::new).collect())
    }

    async fn delete_store(&self, name: &StoreName) -> Result<bool> {
        let conn = lock(&self.conn, name.as_str())?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE store = ?1",
            params![name.as_str()],
        )?;
        debug!("Deleted store '{}' ({} entries)", name, deleted);
        Ok(deleted > 0)
    }
}

/// One named namespace inside a [`SqliteStorage`] database.
pub struct SqliteStore {
    name: StoreName,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    fn write(&self, conn: &Connection, entry: &CachedEntry) -> Result<()> {
        let headers = serde_json::to_string(&entry.response.headers)?;
        // REPLACE removes the old row, so the new one gets a fresh sequence number
        conn.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries (store, key, status, headers, body, stored_at, tag)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                self.name.as_str(),
                entry.key.as_str(),
                entry.response.status,
                headers,
                entry.response.body.as_ref(),
                entry.stored_at.to_rfc3339(),
                entry.tag,
            ],
        )
        .map_err(|e| Error::Database {
            message: format!("Failed to store entry {}: {}", entry.key, e),
            source: Some(e),
        })?;
        Ok(())
    }
}

#[async_trait]
impl StoreHandle for SqliteStore {
    fn name(&self) -> &StoreName {
        &self.name
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
        let conn = lock(&self.conn, self.name.as_str())?;

        let row: Option<(u16, String, Vec<u8>, String, Option<String>)> = conn
            .query_row(
                r#"
                SELECT status, headers, body, stored_at, tag
                FROM cache_entries
                WHERE store = ?1 AND key = ?2
                "#,
                params![self.name.as_str(), key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()
            .map_err(|e| Error::Database {
                message: format!("Failed to query cache entry: {}", e),
                source: Some(e),
            })?;

        let Some((status, headers, body, stored_at, tag)) = row else {
            return Ok(None);
        };

        Ok(Some(CachedEntry {
            key: key.clone(),
            response: Response {
                status,
                headers: serde_json::from_str(&headers)?,
                body: Bytes::from(body),
            },
            stored_at: parse_time(&stored_at),
            tag,
        }))
    }

    async fn put(&self, entry: CachedEntry) -> Result<()> {
        let conn = lock(&self.conn, self.name.as_str())?;
        self.write(&conn, &entry)
    }

    async fn put_all(&self, entries: Vec<CachedEntry>) -> Result<()> {
        let mut conn = lock(&self.conn, self.name.as_str())?;
        let tx = conn.transaction()?;
        for entry in &entries {
            self.write(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool> {
        let conn = lock(&self.conn, self.name.as_str())?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE store = ?1 AND key = ?2",
            params![self.name.as_str(), key.as_str()],
        )?;
        Ok(deleted > 0)
    }

    async fn keys(&self) -> Result<Vec<RequestKey>> {
        let conn = lock(&self.conn, self.name.as_str())?;
        let mut stmt = conn.prepare("SELECT key FROM cache_entries WHERE store = ?1 ORDER BY seq")?;
        let keys = stmt
            .query_map(params![self.name.as_str()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys.into_iter().map(RequestKey::from_raw).collect())
    }

    async fn entries(&self) -> Result<Vec<EntryMeta>> {
        let conn = lock(&self.conn, self.name.as_str())?;
        let mut stmt = conn.prepare(
            "SELECT key, stored_at, seq FROM cache_entries WHERE store = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![self.name.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(key, stored_at, seq)| EntryMeta {
                key: RequestKey::from_raw(key),
                stored_at: parse_time(&stored_at),
                sequence: seq as u64,
            })
            .collect())
    }
}
