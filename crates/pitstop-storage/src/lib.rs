use chrono::{DateTime, Utc};
use pitstop_core::ContractError;
use thiserror::Error;

mod catalog;
mod event_store;
mod inspections;
mod teams;

pub use catalog::EventCatalog;
pub use event_store::{EventStore, EventStores};
pub use inspections::StatusTransition;
pub use teams::{TeamLayout, TEAM_LAYOUTS};

pub const CATALOG_FILE_NAME: &str = "server.db";
pub const EVENT_STORE_EXTENSION: &str = "db";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timestamp parse error: {0}")]
    Timestamp(String),
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("event {0} not found")]
    EventNotFound(String),
    #[error("store for event {0} not found")]
    EventStoreMissing(String),
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| StorageError::Timestamp(err.to_string()))
}

fn column_error<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

fn timestamp_column(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(index)?;
    parse_timestamp(&raw).map_err(|err| column_error(index, err))
}

fn optional_timestamp_column(
    row: &rusqlite::Row<'_>,
    index: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(index)?
        .map(|raw| parse_timestamp(&raw).map_err(|err| column_error(index, err)))
        .transpose()
}

fn team_number_column(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<u32> {
    let raw: i64 = row.get(index)?;
    u32::try_from(raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Integer,
            Box::new(err),
        )
    })
}
