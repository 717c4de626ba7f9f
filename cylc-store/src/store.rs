//! Generic persisted state management: a SQLite-backed record/index store
//! fronted by an append-only JSONL log for crash-recoverable audit history.
//!
//! The SQLite tables are the store's working set (what `get`/`list` query);
//! the JSONL log is a write-ahead audit trail intended to sit in a
//! git-tracked run directory alongside the database, mirroring how the
//! scheduler persists its own state (§6 "Persisted state" — round-trippable,
//! implementation-chosen format).

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;
use crate::record::{Filter, IndexValue, Record};

/// Return the current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE TABLE IF NOT EXISTS record_index (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    field TEXT NOT NULL,
    value TEXT NOT NULL,
    kind TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_record_index_lookup
    ON record_index (collection, field, value);
";

/// A JSONL-logged record mutation, for audit/crash-recovery replay.
#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    op: &'a str,
    collection: &'a str,
    id: &'a str,
    ts: i64,
}

/// Generic persisted state store: one SQLite database holding many
/// record collections, plus an append-only JSONL change log.
pub struct Store {
    conn: Connection,
    log_path: PathBuf,
}

impl Store {
    /// Open (creating if absent) a store rooted at `path`. `path` is used as
    /// the JSONL log path; the SQLite database lives alongside it with a
    /// `.sqlite3` extension.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let log_path = path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db_path = db_path_for(&log_path);
        debug!(?db_path, ?log_path, "Store::open");
        let conn = Connection::open(db_path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, log_path })
    }

    /// Open an in-memory store (tests only: nothing is persisted to disk).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            log_path: PathBuf::from("/dev/null"),
        })
    }

    /// Insert or replace a record and its secondary index rows.
    pub fn create<T: Record>(&mut self, record: T) -> Result<T, StoreError> {
        self.upsert(&record)?;
        self.append_log("create", T::collection_name(), record.id())?;
        Ok(record)
    }

    /// Replace an existing record's data and re-derive its index rows.
    pub fn update<T: Record>(&mut self, record: T) -> Result<T, StoreError> {
        self.upsert(&record)?;
        self.append_log("update", T::collection_name(), record.id())?;
        Ok(record)
    }

    fn upsert<T: Record>(&mut self, record: &T) -> Result<(), StoreError> {
        let data = serde_json::to_string(record)?;
        let collection = T::collection_name();
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![collection, record.id(), data, record.updated_at()],
        )?;
        tx.execute(
            "DELETE FROM record_index WHERE collection = ?1 AND id = ?2",
            params![collection, record.id()],
        )?;
        for (field, value) in record.indexed_fields() {
            tx.execute(
                "INSERT INTO record_index (collection, id, field, value, kind) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![collection, record.id(), field, value.to_sql_text(), value.kind()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Fetch a single record by id.
    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM records WHERE collection = ?1 AND id = ?2")?;
        let mut rows = stmt.query(params![T::collection_name(), id])?;
        match rows.next()? {
            Some(row) => {
                let data: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    /// List records of a collection, optionally narrowed by AND-combined filters.
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>, StoreError> {
        let collection = T::collection_name();
        let ids = if filters.is_empty() {
            None
        } else {
            let mut candidate: Option<Vec<String>> = None;
            for filter in filters {
                let sql = format!(
                    "SELECT id FROM record_index WHERE collection = ?1 AND field = ?2 AND value {} ?3",
                    filter.sql_op()
                );
                let mut stmt = self.conn.prepare(&sql)?;
                let matched: Vec<String> = stmt
                    .query_map(params![collection, filter.field, filter.value.to_sql_text()], |row| {
                        row.get(0)
                    })?
                    .collect::<Result<_, _>>()?;
                candidate = Some(match candidate {
                    None => matched,
                    Some(prev) => prev.into_iter().filter(|id| matched.contains(id)).collect(),
                });
            }
            Some(candidate.unwrap_or_default())
        };

        let mut out = Vec::new();
        match ids {
            Some(ids) => {
                for id in ids {
                    if let Some(record) = self.get::<T>(&id)? {
                        out.push(record);
                    }
                }
            }
            None => {
                let mut stmt = self.conn.prepare("SELECT data FROM records WHERE collection = ?1")?;
                let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;
                for row in rows {
                    out.push(serde_json::from_str(&row?)?);
                }
            }
        }
        Ok(out)
    }

    /// Delete every record of a collection whose indexed `field` equals `value`.
    /// Returns the number of records removed.
    pub fn delete_by_index<T: Record>(&mut self, field: &str, value: IndexValue) -> Result<usize, StoreError> {
        let collection = T::collection_name();
        let mut stmt = self.conn.prepare(
            "SELECT id FROM record_index WHERE collection = ?1 AND field = ?2 AND value = ?3",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![collection, field, value.to_sql_text()], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let tx = self.conn.transaction()?;
        for id in &ids {
            tx.execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?;
            tx.execute(
                "DELETE FROM record_index WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )?;
        }
        tx.commit()?;
        for id in &ids {
            self.append_log("delete", collection, id)?;
        }
        Ok(ids.len())
    }

    /// Re-derive the secondary index for every record of a collection
    /// (used after a JSONL replay to bring indexes back in sync).
    pub fn rebuild_indexes<T: Record>(&mut self) -> Result<usize, StoreError> {
        let records: Vec<T> = self.list(&[])?;
        let count = records.len();
        for record in records {
            self.upsert(&record)?;
        }
        Ok(count)
    }

    /// Flush pending writes. SQLite in this store is always committed
    /// per-call; `sync` additionally checkpoints the WAL.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(FULL);")?;
        Ok(())
    }

    fn append_log(&self, op: &str, collection: &'static str, id: &str) -> Result<(), StoreError> {
        if self.log_path == PathBuf::from("/dev/null") {
            return Ok(());
        }
        let entry = LogEntry {
            op,
            collection,
            id,
            ts: now_ms(),
        };
        let mut file = OpenOptions::new().create(true).append(true).open(&self.log_path)?;
        writeln!(file, "{}", serde_json::to_string(&entry)?)?;
        Ok(())
    }
}

fn db_path_for(log_path: &Path) -> PathBuf {
    let mut db_path = log_path.to_path_buf();
    db_path.set_extension("sqlite3");
    db_path
}
