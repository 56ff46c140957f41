//! SQLite storage shared by the client store and the document server
//!
//! The client keeps its task list and pending queue as JSON blobs under
//! fixed keys in `kv`; the server keeps one JSON document per row in
//! `documents`.

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Thread-safe database wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path).context("Failed to open database")?;
        Self::with_connection(conn)
    }

    /// Private in-memory database, used by tests and throwaway sessions
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    /// Initialize the database schema
    fn init(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            -- Client-side key/value slots (task list, pending queue)
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- Server-side document collections
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_updated ON documents(updated_at);
            "#,
        )?;

        Ok(())
    }

    /// Caps the database file at `max_pages` pages. Writes that would grow
    /// past it fail with `SQLITE_FULL`.
    pub fn set_page_quota(&self, max_pages: u32) -> Result<u32> {
        let conn = self.conn()?;
        let applied: u32 = conn.query_row(
            &format!("PRAGMA max_page_count = {max_pages}"),
            [],
            |row| row.get(0),
        )?;
        Ok(applied)
    }

    /// Caps the database at its current size
    pub fn freeze_size(&self) -> Result<u32> {
        let current: u32 = {
            let conn = self.conn()?;
            conn.query_row("PRAGMA page_count", [], |row| row.get(0))?
        };
        self.set_page_quota(current)
    }

    /// Read a key/value slot
    pub fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Replace a key/value slot. The write is committed before returning.
    pub fn kv_put(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Read-modify-write of one slot, atomic with respect to every other
    /// writer of this database.
    ///
    /// `update` receives the current value and returns the value to store
    /// (`None` leaves the slot untouched) along with a result for the
    /// caller. An error from `update` rolls the transaction back.
    pub fn kv_update<R, E>(
        &self,
        key: &str,
        update: impl FnOnce(Option<String>) -> Result<(Option<String>, R), E>,
    ) -> Result<R, E>
    where
        E: From<anyhow::Error>,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(anyhow::Error::from)?;

        let current: Option<String> = tx
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(anyhow::Error::from)?;

        let (next, result) = update(current)?;
        if let Some(next) = next {
            tx.execute(
                "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, next, Utc::now().to_rfc3339()],
            )
            .map_err(anyhow::Error::from)?;
        }
        tx.commit().map_err(anyhow::Error::from)?;

        Ok(result)
    }

    /// List documents in a collection, optionally only those owned by `user_id`
    pub fn list_documents(
        &self,
        collection: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<serde_json::Value>> {
        let conn = self.conn()?;

        let raw: Vec<(String, String)> = if let Some(user_id) = user_id {
            let mut stmt = conn.prepare(
                "SELECT id, data FROM documents
                 WHERE collection = ?1 AND json_extract(data, '$.userId') = ?2
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![collection, user_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, data FROM documents WHERE collection = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![collection], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut documents = Vec::with_capacity(raw.len());
        for (id, data) in raw {
            match serde_json::from_str::<serde_json::Value>(&data) {
                Ok(doc) => documents.push(doc),
                Err(e) => tracing::warn!(collection, id = %id, error = %e, "Skipping corrupt document"),
            }
        }

        Ok(documents)
    }

    /// Fetch one document
    pub fn get_document(&self, collection: &str, id: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|d| serde_json::from_str(&d).context("Corrupt document"))
            .transpose()
    }

    /// Insert or replace a document. The path id always wins over any
    /// `id` field inside the body.
    pub fn upsert_document(
        &self,
        collection: &str,
        id: &str,
        document: &serde_json::Value,
    ) -> Result<()> {
        let mut document = document.clone();
        let object = document
            .as_object_mut()
            .context("Document must be a JSON object")?;
        object.insert("id".to_string(), serde_json::Value::String(id.to_string()));

        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO documents (collection, id, data, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                collection,
                id,
                serde_json::to_string(&document)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Delete a document; returns whether it existed
    pub fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(deleted > 0)
    }
}

/// Whether an error came from the medium running out of space
pub fn is_storage_full(err: &anyhow::Error) -> bool {
    err.downcast_ref::<rusqlite::Error>()
        .and_then(rusqlite::Error::sqlite_error_code)
        .is_some_and(|code| code == ErrorCode::DiskFull)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn kv_slot_round_trip_and_replace() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.kv_get("k").unwrap(), None);

        db.kv_put("k", "[1]").unwrap();
        db.kv_put("k", "[2]").unwrap();
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("[2]"));
    }

    #[test]
    fn kv_update_sees_and_replaces_current_value() {
        let db = Database::open_in_memory().unwrap();
        db.kv_put("k", "1").unwrap();

        let seen: Option<String> = db
            .kv_update::<_, anyhow::Error>("k", |current| Ok((Some("2".into()), current)))
            .unwrap();
        assert_eq!(seen.as_deref(), Some("1"));
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("2"));

        // None keeps the slot as it was
        db.kv_update::<_, anyhow::Error>("k", |_| Ok((None, ()))).unwrap();
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn kv_update_error_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        db.kv_put("k", "1").unwrap();

        let err = db
            .kv_update::<(), anyhow::Error>("k", |_| Err(anyhow!("nope")))
            .unwrap_err();
        assert_eq!(err.to_string(), "nope");
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn concurrent_kv_updates_are_not_lost() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        db.kv_update::<_, anyhow::Error>("counter", |current| {
                            let n: u32 = current.as_deref().unwrap_or("0").parse()?;
                            Ok((Some((n + 1).to_string()), ()))
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(db.kv_get("counter").unwrap().as_deref(), Some("400"));
    }

    #[test]
    fn documents_are_scoped_by_collection_and_owner() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_document("tasks", "a", &json!({ "title": "A", "userId": "u1" }))
            .unwrap();
        db.upsert_document("tasks", "b", &json!({ "title": "B", "userId": "u2" }))
            .unwrap();
        db.upsert_document("notes", "c", &json!({ "userId": "u1" }))
            .unwrap();

        assert_eq!(db.list_documents("tasks", None).unwrap().len(), 2);

        let mine = db.list_documents("tasks", Some("u1")).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0]["id"], "a");
    }

    #[test]
    fn path_id_overrides_body_id() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_document("tasks", "real", &json!({ "id": "fake" }))
            .unwrap();
        let docs = db.list_documents("tasks", None).unwrap();
        assert_eq!(docs[0]["id"], "real");
    }

    #[test]
    fn delete_reports_existence() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_document("tasks", "a", &json!({})).unwrap();
        assert!(db.delete_document("tasks", "a").unwrap());
        assert!(!db.delete_document("tasks", "a").unwrap());
    }

    #[test]
    fn non_object_documents_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.upsert_document("tasks", "a", &json!([1, 2])).is_err());
    }

    #[test]
    fn growth_past_quota_is_reported_as_full() {
        let db = Database::open_in_memory().unwrap();
        db.freeze_size().unwrap();

        let err = db.kv_put("big", &"x".repeat(256 * 1024)).unwrap_err();
        assert!(is_storage_full(&err));
    }
}
