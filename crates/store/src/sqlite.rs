//! SQLite-backed document store.
//!
//! Documents are kept as JSON text rows; filters are evaluated in Rust so
//! dotted-path equality behaves exactly like the in-memory backend.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, params};
use serde_json::Value;
use tracing::debug;

use crate::document::ensure_objects;
use crate::{DocumentStore, Filter, StoreError, filter_matches};

/// File extension for database files created by [`SqliteStore::open`].
const DATABASE_EXTENSION: &str = "sqlite3";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database `<directory>/<name>.sqlite3`.
    pub fn open(directory: &Path, name: &str) -> Result<Self, StoreError> {
        fs::create_dir_all(directory)?;
        let path = directory.join(format!("{name}.{DATABASE_EXTENSION}"));
        let conn = Connection::open(&path)?;

        // WAL lets a worker read while the orchestrator reseeds.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        init_schema(&conn)?;

        debug!(path = %path.display(), "opened sqlite document store");
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Private in-memory database; nothing touches disk.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Database file path, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            body TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
        "#,
    )
}

/// Loads `(rowid, document)` pairs for one collection.
fn load_documents(conn: &Connection, collection: &str) -> Result<Vec<(i64, Value)>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, body FROM documents WHERE collection = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![collection], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

    let mut documents = Vec::new();
    for row in rows {
        let (id, body) = row?;
        documents.push((id, serde_json::from_str(&body)?));
    }
    Ok(documents)
}

impl DocumentStore for SqliteStore {
    fn list_collection_names(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn count_documents(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        if filter.is_empty() {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )?;
            return Ok(count as u64);
        }
        let documents = load_documents(&conn, collection)?;
        Ok(documents
            .iter()
            .filter(|(_, document)| filter_matches(filter, document))
            .count() as u64)
    }

    fn delete_many(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut conn = self.conn.lock().map_err(|_| StoreError::Lock)?;
        if filter.is_empty() {
            let deleted = conn.execute("DELETE FROM documents WHERE collection = ?1", params![collection])?;
            return Ok(deleted as u64);
        }

        let doomed: Vec<i64> = load_documents(&conn, collection)?
            .into_iter()
            .filter(|(_, document)| filter_matches(filter, document))
            .map(|(id, _)| id)
            .collect();

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM documents WHERE id = ?1")?;
            for id in &doomed {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(doomed.len() as u64)
    }

    fn insert_many(&self, collection: &str, documents: Vec<Value>) -> Result<usize, StoreError> {
        ensure_objects(collection, &documents)?;
        let mut conn = self.conn.lock().map_err(|_| StoreError::Lock)?;

        let tx = conn.transaction()?;
        tx.execute("INSERT OR IGNORE INTO collections (name) VALUES (?1)", params![collection])?;
        {
            let mut stmt = tx.prepare("INSERT INTO documents (collection, body) VALUES (?1, ?2)")?;
            for document in &documents {
                stmt.execute(params![collection, serde_json::to_string(document)?])?;
            }
        }
        tx.commit()?;
        Ok(documents.len())
    }
}
