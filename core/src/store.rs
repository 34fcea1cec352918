//! SQLite build log.
//!
//! RULE: Only store.rs talks to the database.
//! Pipeline stages push `BuildEvent`s; the pipeline hands them here.

use crate::{
    error::BuildResult,
    event::{BuildEvent, BuildLogEntry},
};
use rusqlite::{params, Connection, OptionalExtension};

pub struct BuildStore {
    conn: Connection,
}

impl BuildStore {
    /// Open (or create) the build log at `path`.
    pub fn open(path: &str) -> BuildResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> BuildResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> BuildResult<()> {
        self.conn.execute_batch(include_str!("../../migrations/001_build_log.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, version: &str, data_dir: &str, config_json: &str) -> BuildResult<()> {
        self.conn.execute(
            "INSERT INTO run (run_id, version, data_dir, config_json, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, version, data_dir, config_json, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn complete_run(&self, run_id: &str, rows_out: usize) -> BuildResult<()> {
        self.conn.execute(
            "UPDATE run SET completed_at = ?2, rows_out = ?3 WHERE run_id = ?1",
            params![run_id, chrono::Utc::now().to_rfc3339(), rows_out as i64],
        )?;
        Ok(())
    }

    /// `rows_out` of a completed run, `None` while the run is open.
    pub fn run_rows_out(&self, run_id: &str) -> BuildResult<Option<i64>> {
        let rows = self
            .conn
            .query_row("SELECT rows_out FROM run WHERE run_id = ?1", params![run_id], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?;
        Ok(rows.flatten())
    }

    // ── Build events ───────────────────────────────────────────

    /// Persist `events` in one transaction, numbering from `first_seq`.
    pub fn append_events(&mut self, run_id: &str, first_seq: u64, events: &[BuildEvent]) -> BuildResult<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO build_event (run_id, seq, stage, event_type, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (i, event) in events.iter().enumerate() {
                let payload = serde_json::to_string(event)?;
                stmt.execute(params![
                    run_id,
                    (first_seq + i as u64) as i64,
                    event.stage_name(),
                    event.type_name(),
                    payload
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> BuildResult<Vec<BuildLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, seq, stage, event_type, payload
             FROM build_event WHERE run_id = ?1
             ORDER BY seq ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(BuildLogEntry {
                    id:         Some(row.get(0)?),
                    run_id:     row.get(1)?,
                    seq:        row.get::<_, i64>(2)? as u64,
                    stage:      row.get(3)?,
                    event_type: row.get(4)?,
                    payload:    row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, run_id: &str, event_type: &str) -> BuildResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM build_event WHERE run_id = ?1 AND event_type = ?2",
            params![run_id, event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
