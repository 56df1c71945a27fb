//! Document store on top of SQLite.
//!
//! A collection is a table of JSON documents keyed by an internal `_id`.
//! Handles are opened per operation and closed when dropped.

use std::sync::OnceLock;

use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::record::CleanFlightRecord;

/// Scraped departures.
pub const DEPARTURES: &str = "warsaw_departures";
/// Rows loaded through CSV import.
pub const CSV_DATA: &str = "csv_data";

pub type Document = Map<String, Value>;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(uri: &str) -> Result<Self, StorageError> {
        debug!("Connecting to document store: {}", uri);
        let open_err = |source| StorageError::Open {
            uri: uri.to_string(),
            source,
        };
        let conn = Connection::open(uri).map_err(open_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(open_err)?;
        Ok(Store { conn })
    }

    /// Append every document in one transaction; returns the rows written.
    pub fn insert_many<T: Serialize>(
        &mut self,
        collection: &str,
        docs: &[T],
    ) -> Result<usize, StorageError> {
        let table = collection_table(collection)?;
        let sql_err = sql_error(collection);

        let mut bodies = Vec::with_capacity(docs.len());
        for doc in docs {
            bodies.push(serde_json::to_string(doc).map_err(|source| StorageError::Document {
                collection: collection.to_string(),
                source,
            })?);
        }

        ensure_collection(&self.conn, &table).map_err(&sql_err)?;
        let tx = self.conn.transaction().map_err(&sql_err)?;
        let mut count = 0;
        {
            let mut stmt = tx
                .prepare(&format!("INSERT INTO {} (doc) VALUES (?1)", table))
                .map_err(&sql_err)?;
            for body in &bodies {
                count += stmt.execute(params![body]).map_err(&sql_err)?;
            }
        }
        tx.commit().map_err(&sql_err)?;
        Ok(count)
    }

    /// Every document in insertion order, without the internal `_id`.
    pub fn find_all(&self, collection: &str) -> Result<Vec<Document>, StorageError> {
        let table = collection_table(collection)?;
        let sql_err = sql_error(collection);
        if !collection_exists(&self.conn, collection).map_err(&sql_err)? {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT doc FROM {} ORDER BY _id", table))
            .map_err(&sql_err)?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(&sql_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(&sql_err)?;

        bodies
            .iter()
            .map(|body| {
                serde_json::from_str(body).map_err(|source| StorageError::Document {
                    collection: collection.to_string(),
                    source,
                })
            })
            .collect()
    }

    /// Remove every document; returns how many were removed.
    pub fn delete_all(&self, collection: &str) -> Result<usize, StorageError> {
        let table = collection_table(collection)?;
        let sql_err = sql_error(collection);
        if !collection_exists(&self.conn, collection).map_err(&sql_err)? {
            return Ok(0);
        }
        self.conn
            .execute(&format!("DELETE FROM {}", table), [])
            .map_err(sql_err)
    }

    pub fn count(&self, collection: &str) -> Result<usize, StorageError> {
        let table = collection_table(collection)?;
        let sql_err = sql_error(collection);
        if !collection_exists(&self.conn, collection).map_err(&sql_err)? {
            return Ok(0);
        }
        self.conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .map_err(sql_err)
    }
}

// ── Pipeline-facing operations ──

/// Write a batch of departures into `collection`. An empty batch never opens the store.
pub fn persist(
    uri: &str,
    records: &[CleanFlightRecord],
    collection: &str,
) -> Result<usize, StorageError> {
    if records.is_empty() {
        info!("No records to insert into '{}'", collection);
        return Ok(0);
    }
    collection_table(collection)?;
    let mut store = Store::open(uri)?;
    let inserted = store.insert_many(collection, records)?;
    info!("Inserted {} records into '{}' collection", inserted, collection);
    Ok(inserted)
}

pub fn list_departures(uri: &str) -> Result<Vec<CleanFlightRecord>, StorageError> {
    let store = Store::open(uri)?;
    store
        .find_all(DEPARTURES)?
        .into_iter()
        .map(|doc| {
            serde_json::from_value(Value::Object(doc)).map_err(|source| StorageError::Document {
                collection: DEPARTURES.to_string(),
                source,
            })
        })
        .collect()
}

pub fn purge_departures(uri: &str) -> Result<usize, StorageError> {
    let store = Store::open(uri)?;
    let deleted = store.delete_all(DEPARTURES)?;
    info!("Deleted {} records from '{}' collection", deleted, DEPARTURES);
    Ok(deleted)
}

pub struct Stats {
    pub departures: usize,
    pub csv_rows: usize,
}

pub fn get_stats(uri: &str) -> Result<Stats, StorageError> {
    let store = Store::open(uri)?;
    Ok(Stats {
        departures: store.count(DEPARTURES)?,
        csv_rows: store.count(CSV_DATA)?,
    })
}

// ── Helpers ──

fn collection_table(name: &str) -> Result<String, StorageError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());
    if re.is_match(name) && !name.starts_with("sqlite_") {
        Ok(format!("\"{}\"", name))
    } else {
        Err(StorageError::InvalidCollection(name.to_string()))
    }
}

fn sql_error(collection: &str) -> impl Fn(rusqlite::Error) -> StorageError + '_ {
    move |source| StorageError::Sql {
        collection: collection.to_string(),
        source,
    }
}

fn ensure_collection(conn: &Connection, table: &str) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            _id         INTEGER PRIMARY KEY AUTOINCREMENT,
            doc         TEXT NOT NULL,
            inserted_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
        table
    ))
}

fn collection_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        params![name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

// ── Tests ──
