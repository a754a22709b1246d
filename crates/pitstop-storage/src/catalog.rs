use crate::{timestamp_column, StorageError};
use pitstop_core::Event;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const EVENT_COLUMNS: &str = "code, name, region, event_type, status, start_at, end_at, divisions";

/// The global event table (`server.db`). Events are created by the event
/// management flow; the inspection workflow only looks them up.
pub struct EventCatalog {
    conn: Connection,
}

impl EventCatalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let catalog = Self { conn };
        catalog.migrate()?;
        Ok(catalog)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let catalog = Self { conn };
        catalog.migrate()?;
        Ok(catalog)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        self.conn
            .execute_batch(include_str!("../migrations/catalog.sql"))?;
        Ok(())
    }

    pub fn upsert_event(&self, event: &Event) -> Result<(), StorageError> {
        self.conn.execute(
            "
            INSERT INTO events (
                code,
                name,
                region,
                event_type,
                status,
                start_at,
                end_at,
                divisions
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(code) DO UPDATE SET
                name=excluded.name,
                region=excluded.region,
                event_type=excluded.event_type,
                status=excluded.status,
                start_at=excluded.start_at,
                end_at=excluded.end_at,
                divisions=excluded.divisions
            ",
            params![
                event.code,
                event.name,
                event.region,
                event.event_type,
                event.status,
                event.start.to_rfc3339(),
                event.end.to_rfc3339(),
                event.divisions,
            ],
        )?;
        Ok(())
    }

    pub fn event(&self, code: &str) -> Result<Option<Event>, StorageError> {
        let event = self
            .conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE code = ?1"),
                [code],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        code: row.get(0)?,
        name: row.get(1)?,
        region: row.get(2)?,
        event_type: row.get(3)?,
        status: row.get(4)?,
        start: timestamp_column(row, 5)?,
        end: timestamp_column(row, 6)?,
        divisions: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_event(code: &str, name: &str) -> Event {
        Event {
            code: code.to_string(),
            name: name.to_string(),
            region: "USCA".to_string(),
            event_type: 2,
            status: 1,
            start: Utc
                .with_ymd_and_hms(2026, 3, 14, 8, 0, 0)
                .single()
                .expect("valid timestamp"),
            end: Utc
                .with_ymd_and_hms(2026, 3, 14, 18, 0, 0)
                .single()
                .expect("valid timestamp"),
            divisions: 0,
        }
    }

    #[test]
    fn upsert_then_lookup_roundtrips_event() {
        let catalog = EventCatalog::open_in_memory().expect("open catalog");
        let event = sample_event("demo1", "Demo Qualifier");
        catalog.upsert_event(&event).expect("insert event");

        assert_eq!(catalog.event("demo1").expect("lookup"), Some(event));
        assert_eq!(catalog.event("missing").expect("lookup"), None);
    }

    #[test]
    fn upsert_replaces_existing_event() {
        let catalog = EventCatalog::open_in_memory().expect("open catalog");
        catalog
            .upsert_event(&sample_event("demo1", "Old Name"))
            .expect("insert");
        catalog
            .upsert_event(&sample_event("demo1", "New Name"))
            .expect("update");

        let event = catalog.event("demo1").expect("lookup").expect("event");
        assert_eq!(event.name, "New Name");
    }
}
