//! SQLite-based store implementation

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use curfew_util::SubjectId;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{RestrictionStore, RestrictionWindow, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    tz: Tz,
}

/// Columns as stored, before parsing
struct RawRow {
    subject_id: i64,
    display_name: String,
    start_at: String,
    end_at: String,
    created_at: String,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    ///
    /// Timestamps are returned in `tz`.
    pub fn open(path: impl AsRef<Path>, tz: Tz) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            tz,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory(tz: Tz) -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            tz,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS restriction_windows (
                subject_id INTEGER PRIMARY KEY,
                display_name TEXT NOT NULL,
                start_at TEXT NOT NULL,
                end_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            subject_id: row.get(0)?,
            display_name: row.get(1)?,
            start_at: row.get(2)?,
            end_at: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn parse_row(&self, raw: RawRow) -> StoreResult<RestrictionWindow> {
        let instant = |s: &str| -> StoreResult<DateTime<Tz>> {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&self.tz))
                .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
        };

        // CURRENT_TIMESTAMP is UTC without an offset
        let created_at = NaiveDateTime::parse_from_str(&raw.created_at, "%Y-%m-%d %H:%M:%S")
            .map(|naive| Utc.from_utc_datetime(&naive).with_timezone(&self.tz))
            .or_else(|_| instant(&raw.created_at))?;

        Ok(RestrictionWindow {
            subject_id: SubjectId::new(raw.subject_id as u64),
            display_name: raw.display_name,
            start_at: instant(&raw.start_at)?,
            end_at: instant(&raw.end_at)?,
            created_at,
        })
    }
}

// Subject ids are u64; SQLite integers are i64. The cast round-trips.
fn key(subject_id: SubjectId) -> i64 {
    subject_id.get() as i64
}

impl RestrictionStore for SqliteStore {
    fn upsert(
        &self,
        subject_id: SubjectId,
        display_name: &str,
        start_at: DateTime<Tz>,
        end_at: DateTime<Tz>,
    ) -> StoreResult<()> {
        if start_at >= end_at {
            return Err(StoreError::InvalidWindow(format!(
                "start {} is not before end {}",
                start_at.to_rfc3339(),
                end_at.to_rfc3339()
            )));
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO restriction_windows (subject_id, display_name, start_at, end_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(subject_id)
            DO UPDATE SET display_name = excluded.display_name,
                          start_at = excluded.start_at,
                          end_at = excluded.end_at
            "#,
            params![
                key(subject_id),
                display_name,
                start_at.to_rfc3339(),
                end_at.to_rfc3339()
            ],
        )?;

        debug!(subject_id = %subject_id, start_at = %start_at, end_at = %end_at, "Window upserted");
        Ok(())
    }

    fn get(&self, subject_id: SubjectId) -> StoreResult<Option<RestrictionWindow>> {
        let raw = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT subject_id, display_name, start_at, end_at, created_at
                 FROM restriction_windows WHERE subject_id = ?",
                [key(subject_id)],
                Self::read_row,
            )
            .optional()?
        };

        raw.map(|r| self.parse_row(r)).transpose()
    }

    fn remove(&self, subject_id: SubjectId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM restriction_windows WHERE subject_id = ?",
            [key(subject_id)],
        )?;

        debug!(subject_id = %subject_id, deleted, "Window removed");
        Ok(deleted > 0)
    }

    fn list_all(&self) -> StoreResult<Vec<RestrictionWindow>> {
        let raws = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT subject_id, display_name, start_at, end_at, created_at
                 FROM restriction_windows ORDER BY start_at",
            )?;
            let rows = stmt.query_map([], Self::read_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut windows = Vec::with_capacity(raws.len());
        for raw in raws {
            let subject_id = raw.subject_id;
            match self.parse_row(raw) {
                Ok(window) => windows.push(window),
                Err(e) => warn!(subject_id, error = %e, "Skipping unreadable window"),
            }
        }

        Ok(windows)
    }

    fn clear_all(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM restriction_windows", [])?;
        debug!(deleted, "All windows cleared");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}
