//! Attendance event persistence.

use log::warn;
use rusqlite::{params, Connection, Row as SqliteRow};
use std::path::PathBuf;

use ponto_core::decision::EventHistory;
use ponto_core::models::{now_local_string, AttendanceEvent, EventType};

use crate::db;
use crate::errors::Result;

pub struct AttendanceRepository {
    db_path: PathBuf,
}

const SELECT_COLUMNS: &str = "id, code, person_id, person_name, event_type, timestamp, \
                              location, site_id, sector_id, status, is_manual, synced, \
                              last_sync_time";

impl AttendanceRepository {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        AttendanceRepository {
            db_path: db_path.into(),
        }
    }

    fn conn(&self) -> Result<Connection> {
        db::open(&self.db_path)
    }

    /// Persists a locally-created event. The event is durable before any
    /// sync is attempted.
    pub fn save(&self, event: &AttendanceEvent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO attendance_events (id, code, person_id, person_name, event_type, \
             timestamp, location, site_id, sector_id, status, is_manual, synced, last_sync_time) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                event.id,
                event.code,
                event.person_id,
                event.person_name,
                event.event_type.as_str(),
                event.timestamp,
                event.location,
                event.site_id,
                event.sector_id,
                event.status,
                event.is_manual as i64,
                event.synced as i64,
                event.last_sync_time,
            ],
        )?;
        Ok(())
    }

    /// Pending events in insertion order, bounded per sync cycle. Rowid
    /// order keeps legacy day-first timestamps from sorting lexically.
    pub fn list_pending(&self, limit: i64) -> Result<Vec<AttendanceEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM attendance_events WHERE synced = 0 ORDER BY rowid LIMIT ?1",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map([limit], row_to_event)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Marks one event synced after its own push succeeded. Idempotent.
    pub fn mark_synced(&self, event_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE attendance_events SET synced = 1, last_sync_time = ?1 WHERE id = ?2",
            params![now_local_string(), event_id],
        )?;
        Ok(())
    }

    pub fn count_pending(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM attendance_events WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn last_event_for(&self, person_id: &str) -> Result<Option<AttendanceEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM attendance_events WHERE person_id = ?1 \
             ORDER BY timestamp DESC LIMIT 1",
            SELECT_COLUMNS
        ))?;
        let mut rows = stmt.query_map([person_id], row_to_event)?;
        match rows.next() {
            Some(event) => Ok(Some(event?)),
            None => Ok(None),
        }
    }

    pub fn last_entry_timestamp_for(&self, person_id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp FROM attendance_events \
             WHERE person_id = ?1 AND event_type = 'ENTRY' \
             ORDER BY timestamp DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([person_id], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(ts) => Ok(Some(ts?)),
            None => Ok(None),
        }
    }
}

fn row_to_event(row: &SqliteRow<'_>) -> rusqlite::Result<AttendanceEvent> {
    let raw_type: String = row.get("event_type")?;
    let event_type = EventType::parse(&raw_type).unwrap_or_else(|| {
        warn!("[Storage] Unknown event type '{}'; treating as ENTRY", raw_type);
        EventType::Entry
    });
    Ok(AttendanceEvent {
        id: row.get("id")?,
        code: row.get("code")?,
        person_id: row.get("person_id")?,
        person_name: row.get("person_name")?,
        event_type,
        timestamp: row.get("timestamp")?,
        location: row.get("location")?,
        site_id: row.get("site_id")?,
        sector_id: row.get("sector_id")?,
        status: row.get("status")?,
        is_manual: row.get::<_, i64>("is_manual")? != 0,
        synced: row.get::<_, i64>("synced")? != 0,
        last_sync_time: row.get("last_sync_time")?,
    })
}

impl EventHistory for AttendanceRepository {
    fn last_event(&self, person_id: &str) -> ponto_core::Result<Option<AttendanceEvent>> {
        Ok(self.last_event_for(person_id)?)
    }

    fn last_entry_timestamp(&self, person_id: &str) -> ponto_core::Result<Option<String>> {
        Ok(self.last_entry_timestamp_for(person_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn repo() -> (tempfile::TempDir, AttendanceRepository) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ponto.db");
        db::initialize(&path).expect("init");
        (dir, AttendanceRepository::new(path))
    }

    fn event(person_id: &str, event_type: EventType, timestamp: &str) -> AttendanceEvent {
        let mut event =
            AttendanceEvent::new(person_id, "Ana", event_type, "Portaria", None, Some(3));
        event.timestamp = timestamp.to_string();
        event
    }

    #[test]
    fn pending_selection_respects_limit_and_insertion_order() {
        let (_dir, repo) = repo();
        // A legacy day-first timestamp sorts after ISO strings lexically;
        // insertion order must win regardless.
        repo.save(&event("p1", EventType::Entry, "31/12/2025 08:00:00"))
            .expect("save");
        repo.save(&event("p1", EventType::Exit, "2026-08-29 17:00:00"))
            .expect("save");
        repo.save(&event("p2", EventType::Entry, "2026-08-29 09:00:00"))
            .expect("save");

        let pending = repo.list_pending(2).expect("pending");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].timestamp, "31/12/2025 08:00:00");
        assert_eq!(pending[1].timestamp, "2026-08-29 17:00:00");
    }

    #[test]
    fn mark_synced_removes_from_pending() {
        let (_dir, repo) = repo();
        let e = event("p1", EventType::Entry, "2026-08-29 08:00:00");
        repo.save(&e).expect("save");

        repo.mark_synced(&e.id).expect("mark");
        repo.mark_synced(&e.id).expect("idempotent re-mark");

        assert!(repo.list_pending(10).expect("pending").is_empty());
        let stored = repo.last_event_for("p1").expect("last").expect("event");
        assert!(stored.synced);
        assert!(stored.last_sync_time.is_some());
    }

    #[test]
    fn last_event_and_last_entry_lookups() {
        let (_dir, repo) = repo();
        repo.save(&event("p1", EventType::Entry, "2026-08-29 08:00:00"))
            .expect("save");
        repo.save(&event("p1", EventType::Exit, "2026-08-29 17:00:00"))
            .expect("save");

        let last = repo.last_event_for("p1").expect("last").expect("event");
        assert_eq!(last.event_type, EventType::Exit);

        let last_entry = repo
            .last_entry_timestamp_for("p1")
            .expect("lookup")
            .expect("entry");
        assert_eq!(last_entry, "2026-08-29 08:00:00");

        assert!(repo.last_event_for("p9").expect("none").is_none());
    }
}
