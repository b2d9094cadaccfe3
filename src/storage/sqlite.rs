//! SQLite storage backend for the matching store

use super::document::{Document, DocumentError};
use super::traits::{
    CollectionName, DocumentFilter, MatchStore, OpenStore, SearchBox, StorageError, StorageResult,
};
use crate::graph::Attributes;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const DOCUMENT_COLUMNS: &str = "id, ts_micros, lat, lon, fields_json";

/// SQLite-backed matching store
///
/// One database file holds every collection. Documents are unique per
/// `(collection, timestamp, lat, lon)`. Thread-safe via internal mutex on
/// the connection, which also serializes merge-writes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema and the `conditions` collection
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            );

            -- Timestamps are stored as microseconds since the epoch (UTC)
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                ts_micros INTEGER NOT NULL,
                lat REAL NOT NULL,
                lon REAL NOT NULL,
                fields_json TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_key
                ON documents(collection, ts_micros, lat, lon);
            CREATE INDEX IF NOT EXISTS idx_documents_time
                ON documents(collection, ts_micros);
            "#,
        )?;

        Self::insert_collection(conn, &CollectionName::conditions())?;
        Ok(())
    }

    fn insert_collection(conn: &Connection, name: &CollectionName) -> StorageResult<()> {
        conn.execute(
            "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?1, ?2)",
            params![name.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Read the raw columns of a document row
    fn read_row(row: &Row<'_>) -> rusqlite::Result<(i64, i64, f64, f64, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    /// Deserialize a document from database columns
    fn row_to_document(
        id: i64,
        ts_micros: i64,
        lat: f64,
        lon: f64,
        fields_json: String,
    ) -> StorageResult<Document> {
        let timestamp = DateTime::from_timestamp_micros(ts_micros)
            .ok_or_else(|| DocumentError::UnparseableTimestamp(ts_micros.to_string()))?;

        Ok(Document {
            id: Some(id),
            timestamp,
            lat,
            lon,
            fields: serde_json::from_str(&fields_json)?,
        })
    }

    fn collect_documents(
        rows: impl Iterator<Item = rusqlite::Result<(i64, i64, f64, f64, String)>>,
    ) -> StorageResult<Vec<Document>> {
        rows.map(|row| {
            let (id, ts, lat, lon, fields) = row?;
            Self::row_to_document(id, ts, lat, lon, fields)
        })
        .collect()
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        Self::from_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

impl MatchStore for SqliteStore {
    // === Collection Operations ===

    fn ensure_collection(&self, name: &CollectionName) -> StorageResult<()> {
        let conn = self.conn()?;
        Self::insert_collection(&conn, name)
    }

    fn has_collection(&self, name: &CollectionName) -> StorageResult<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM collections WHERE name = ?1",
            params![name.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn list_collections(&self) -> StorageResult<Vec<CollectionName>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|r| r.map(CollectionName::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn drop_collection(&self, name: &CollectionName) -> StorageResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let documents = tx.execute(
            "DELETE FROM documents WHERE collection = ?1",
            params![name.as_str()],
        )?;
        let existed = tx.execute(
            "DELETE FROM collections WHERE name = ?1",
            params![name.as_str()],
        )? > 0;
        tx.commit()?;

        tracing::info!(collection = %name, documents, "collection dropped");
        Ok(existed)
    }

    // === Document Operations ===

    fn upsert_document(&self, collection: &CollectionName, doc: &Document) -> StorageResult<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let ts_micros = doc.timestamp.timestamp_micros();

        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, fields_json FROM documents
                 WHERE collection = ?1 AND ts_micros = ?2 AND lat = ?3 AND lon = ?4",
                params![collection.as_str(), ts_micros, doc.lat, doc.lon],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let id = match existing {
            Some((id, fields_json)) => {
                let mut merged: Attributes = serde_json::from_str(&fields_json)?;
                for (key, value) in &doc.fields {
                    merged.insert(key.clone(), value.clone());
                }
                tx.execute(
                    "UPDATE documents SET fields_json = ?1 WHERE id = ?2",
                    params![serde_json::to_string(&merged)?, id],
                )?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO documents (collection, ts_micros, lat, lon, fields_json)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        collection.as_str(),
                        ts_micros,
                        doc.lat,
                        doc.lon,
                        serde_json::to_string(&doc.fields)?
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        tx.commit()?;
        Ok(id)
    }

    fn find_exact(
        &self,
        collection: &CollectionName,
        timestamp: DateTime<Utc>,
        lat: f64,
        lon: f64,
    ) -> StorageResult<Option<Document>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM documents
                     WHERE collection = ?1 AND ts_micros = ?2 AND lat = ?3 AND lon = ?4",
                    DOCUMENT_COLUMNS
                ),
                params![collection.as_str(), timestamp.timestamp_micros(), lat, lon],
                Self::read_row,
            )
            .optional()?;

        match row {
            Some((id, ts, lat, lon, fields)) => {
                Ok(Some(Self::row_to_document(id, ts, lat, lon, fields)?))
            }
            None => Ok(None),
        }
    }

    fn find_in_box(
        &self,
        collection: &CollectionName,
        bounds: &SearchBox,
    ) -> StorageResult<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents
             WHERE collection = ?1
               AND ts_micros BETWEEN ?2 AND ?3
               AND lat BETWEEN ?4 AND ?5
               AND lon BETWEEN ?6 AND ?7
             ORDER BY id",
            DOCUMENT_COLUMNS
        ))?;

        let rows = stmt.query_map(
            params![
                collection.as_str(),
                bounds.time_from.timestamp_micros(),
                bounds.time_to.timestamp_micros(),
                bounds.lat_min,
                bounds.lat_max,
                bounds.lon_min,
                bounds.lon_max
            ],
            Self::read_row,
        )?;

        Self::collect_documents(rows)
    }

    fn find_documents(
        &self,
        collection: &CollectionName,
        filter: &DocumentFilter,
    ) -> StorageResult<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM documents
             WHERE collection = ?1
               AND (?2 IS NULL OR ts_micros >= ?2)
               AND (?3 IS NULL OR ts_micros <= ?3)
             ORDER BY id",
            DOCUMENT_COLUMNS
        ))?;

        let rows = stmt.query_map(
            params![
                collection.as_str(),
                filter.since.map(|t| t.timestamp_micros()),
                filter.until.map(|t| t.timestamp_micros())
            ],
            Self::read_row,
        )?;

        let mut docs = Self::collect_documents(rows)?;
        docs.retain(|doc| filter.matches_fields(doc));
        if let Some(limit) = filter.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }
}
