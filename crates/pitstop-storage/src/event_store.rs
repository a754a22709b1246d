use crate::{EventCatalog, StorageError, CATALOG_FILE_NAME, EVENT_STORE_EXTENSION};
use pitstop_core::{validate_event_code, Event};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves event codes to their per-event SQLite stores under one data
/// directory. Holds no open handles; every call opens and releases its own.
#[derive(Debug, Clone)]
pub struct EventStores {
    data_dir: PathBuf,
}

impl EventStores {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(CATALOG_FILE_NAME)
    }

    pub fn store_path(&self, code: &str) -> Result<PathBuf, StorageError> {
        let code = validate_event_code(code)?;
        Ok(self
            .data_dir
            .join(format!("{code}.{EVENT_STORE_EXTENSION}")))
    }

    pub fn event(&self, code: &str) -> Result<Event, StorageError> {
        validate_event_code(code)?;
        let catalog_path = self.catalog_path();
        if !catalog_path.is_file() {
            return Err(StorageError::EventNotFound(code.to_string()));
        }
        EventCatalog::open(catalog_path)?
            .event(code)?
            .ok_or_else(|| StorageError::EventNotFound(code.to_string()))
    }

    /// Opens the store of `code`, runs `operation` against it and releases
    /// the handle before returning. An error from `operation` is returned
    /// untouched; the connection is dropped (and closed) on that path too.
    pub fn with_event_store<T, E, F>(&self, code: &str, operation: F) -> Result<T, E>
    where
        E: From<StorageError>,
        F: FnOnce(&mut EventStore) -> Result<T, E>,
    {
        let mut store = self.open_event_store(code)?;
        match operation(&mut store) {
            Ok(value) => {
                store.close()?;
                Ok(value)
            }
            Err(err) => {
                debug!(event = "event_store_release", code = %code, outcome = "error");
                drop(store);
                Err(err)
            }
        }
    }

    fn open_event_store(&self, code: &str) -> Result<EventStore, StorageError> {
        let event = self.event(code)?;
        let path = self.store_path(code)?;
        if !path.is_file() {
            return Err(StorageError::EventStoreMissing(code.to_string()));
        }

        // No SQLITE_OPEN_CREATE: a vanished file must surface as an error,
        // not as a fresh empty store.
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        debug!(event = "event_store_open", code = %code, path = %path.display());
        EventStore::from_connection(conn, event)
    }
}

/// One open per-event store. Created through [`EventStores::with_event_store`]
/// in production code.
pub struct EventStore {
    pub(crate) conn: Connection,
    event: Event,
}

impl EventStore {
    pub fn open_in_memory(event: Event) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?, event)
    }

    fn from_connection(conn: Connection, event: Event) -> Result<Self, StorageError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self { conn, event };
        store.ensure_workflow_tables()?;
        Ok(store)
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Creates the inspection tables when missing. Idempotent.
    pub fn ensure_workflow_tables(&self) -> Result<(), StorageError> {
        self.conn
            .execute_batch(include_str!("../migrations/0001_inspection_workflow.sql"))?;
        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool, StorageError> {
        let exists = self
            .conn
            .query_row(
                "
                SELECT 1
                FROM sqlite_master
                WHERE type='table' AND name = ?1 COLLATE NOCASE
                LIMIT 1
                ",
                [table_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    /// Column names of `table_name`, lowercased. SQLite resolves
    /// identifiers case-insensitively, so callers compare in lowercase.
    pub fn table_columns(&self, table_name: &str) -> Result<BTreeSet<String>, StorageError> {
        let mut statement = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1)")?;
        let rows = statement.query_map([table_name], |row| row.get::<_, String>(0))?;

        let mut columns = BTreeSet::new();
        for row in rows {
            columns.insert(row?.to_lowercase());
        }
        Ok(columns)
    }

    pub fn close(self) -> Result<(), StorageError> {
        let code = self.event.code;
        self.conn.close().map_err(|(_, err)| StorageError::from(err))?;
        debug!(event = "event_store_release", code = %code, outcome = "ok");
        Ok(())
    }
}
