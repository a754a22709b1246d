use crate::{
    column_error, optional_timestamp_column, team_number_column, timestamp_column, EventStore,
    StorageError,
};
use chrono::{DateTime, Utc};
use pitstop_core::inspection_contracts::{
    HistoryAction, InspectionHistoryEntry, InspectionRecord, InspectionStatus, ItemUpdate,
    ResponseMap,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

const INSPECTION_COLUMNS: &str =
    "team_number, status, comment, started_at, finalized_at, updated_at";

/// A status write plus the history row that records it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub action: HistoryAction,
    pub new_status: InspectionStatus,
    /// An override always writes this, `None` clearing the stored comment.
    /// An ordinary status change only replaces the comment when set.
    pub comment: Option<String>,
    pub actor: String,
}

impl StatusTransition {
    pub fn status_change(new_status: InspectionStatus, actor: impl Into<String>) -> Self {
        Self {
            action: HistoryAction::StatusChange,
            new_status,
            comment: None,
            actor: actor.into(),
        }
    }

    pub fn lead_override(comment: Option<String>, actor: impl Into<String>) -> Self {
        Self {
            action: HistoryAction::LeadOverride,
            new_status: InspectionStatus::Passed,
            comment,
            actor: actor.into(),
        }
    }

    pub fn is_override(&self) -> bool {
        self.action == HistoryAction::LeadOverride
    }
}

impl EventStore {
    /// Inserts a `NOT_STARTED` row for the team unless one exists and
    /// returns the current record.
    pub fn ensure_inspection(&self, team_number: u32) -> Result<InspectionRecord, StorageError> {
        ensure_inspection_row(&self.conn, team_number)
    }

    pub fn inspection(&self, team_number: u32) -> Result<Option<InspectionRecord>, StorageError> {
        load_inspection(&self.conn, team_number)
    }

    pub fn inspections(&self) -> Result<BTreeMap<u32, InspectionRecord>, StorageError> {
        let mut statement = self.conn.prepare(&format!(
            "SELECT {INSPECTION_COLUMNS} FROM inspections ORDER BY team_number ASC"
        ))?;
        let rows = statement.query_map([], inspection_from_row)?;

        let mut records = BTreeMap::new();
        for row in rows {
            let record = row?;
            records.insert(record.team_number, record);
        }
        Ok(records)
    }

    pub fn responses(&self, team_number: u32) -> Result<ResponseMap, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT item_key, value
            FROM inspection_responses
            WHERE team_number = ?1
            ORDER BY item_key ASC
            ",
        )?;
        let rows = statement.query_map([team_number], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;

        let mut responses = ResponseMap::new();
        for row in rows {
            let (key, value) = row?;
            responses.insert(key, value);
        }
        Ok(responses)
    }

    pub fn all_responses(&self) -> Result<BTreeMap<u32, ResponseMap>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT team_number, item_key, value
            FROM inspection_responses
            ORDER BY team_number ASC, item_key ASC
            ",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                team_number_column(row, 0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut responses: BTreeMap<u32, ResponseMap> = BTreeMap::new();
        for row in rows {
            let (team_number, key, value) = row?;
            responses.entry(team_number).or_default().insert(key, value);
        }
        Ok(responses)
    }

    /// Upserts every response and advances the inspection in one
    /// transaction. A `NOT_STARTED` inspection moves to `IN_PROGRESS` (with
    /// `started_at` and a history row); any other status only gets a fresh
    /// `updated_at`. Nothing is kept if any statement fails.
    pub fn apply_item_updates(
        &mut self,
        team_number: u32,
        items: &[ItemUpdate],
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<InspectionRecord, StorageError> {
        let now_text = now.to_rfc3339();
        let tx = self.conn.transaction()?;
        let current = ensure_inspection_row(&tx, team_number)?;

        for item in items {
            tx.execute(
                "
                INSERT INTO inspection_responses (team_number, item_key, value, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(team_number, item_key) DO UPDATE SET
                    value=excluded.value,
                    updated_at=excluded.updated_at
                ",
                params![team_number, item.key, item.value, now_text],
            )?;
        }

        if current.status == InspectionStatus::NotStarted {
            tx.execute(
                "
                UPDATE inspections
                SET status = ?2, started_at = ?3, updated_at = ?3
                WHERE team_number = ?1
                ",
                params![team_number, InspectionStatus::InProgress.as_str(), now_text],
            )?;
            insert_history(
                &tx,
                team_number,
                &StatusTransition::status_change(InspectionStatus::InProgress, actor),
                current.status,
                &now_text,
            )?;
        } else {
            tx.execute(
                "UPDATE inspections SET updated_at = ?2 WHERE team_number = ?1",
                params![team_number, now_text],
            )?;
        }

        let record = ensure_inspection_row(&tx, team_number)?;
        tx.commit()?;
        Ok(record)
    }

    /// Writes the new status and appends exactly one history row, atomically.
    /// `finalized_at` is stamped for `PASSED` and cleared otherwise.
    pub fn apply_status(
        &mut self,
        team_number: u32,
        transition: &StatusTransition,
        now: DateTime<Utc>,
    ) -> Result<(InspectionRecord, InspectionHistoryEntry), StorageError> {
        let now_text = now.to_rfc3339();
        let finalized_at =
            (transition.new_status == InspectionStatus::Passed).then(|| now_text.clone());

        let tx = self.conn.transaction()?;
        let previous = ensure_inspection_row(&tx, team_number)?;
        tx.execute(
            "
            UPDATE inspections
            SET status = ?2,
                finalized_at = ?3,
                updated_at = ?4,
                comment = CASE WHEN ?6 THEN ?5 ELSE COALESCE(?5, comment) END
            WHERE team_number = ?1
            ",
            params![
                team_number,
                transition.new_status.as_str(),
                finalized_at,
                now_text,
                transition.comment,
                transition.is_override(),
            ],
        )?;
        let entry = insert_history(&tx, team_number, transition, previous.status, &now_text)?;
        let record = ensure_inspection_row(&tx, team_number)?;
        tx.commit()?;
        Ok((record, entry))
    }

    pub fn set_comment(
        &self,
        team_number: u32,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<InspectionRecord, StorageError> {
        ensure_inspection_row(&self.conn, team_number)?;
        self.conn.execute(
            "UPDATE inspections SET comment = ?2, updated_at = ?3 WHERE team_number = ?1",
            params![team_number, comment, now.to_rfc3339()],
        )?;
        ensure_inspection_row(&self.conn, team_number)
    }

    /// History of one team, most recent first.
    pub fn history(&self, team_number: u32) -> Result<Vec<InspectionHistoryEntry>, StorageError> {
        let mut statement = self.conn.prepare(
            "
            SELECT id, team_number, action, old_status, new_status, is_override, actor, created_at
            FROM inspection_history
            WHERE team_number = ?1
            ORDER BY id DESC
            ",
        )?;
        let rows = statement.query_map([team_number], history_from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

fn ensure_inspection_row(
    conn: &Connection,
    team_number: u32,
) -> Result<InspectionRecord, StorageError> {
    conn.execute(
        "INSERT OR IGNORE INTO inspections (team_number, status) VALUES (?1, ?2)",
        params![team_number, InspectionStatus::NotStarted.as_str()],
    )?;
    Ok(load_inspection(conn, team_number)?
        .unwrap_or_else(|| InspectionRecord::not_started(team_number)))
}

fn load_inspection(
    conn: &Connection,
    team_number: u32,
) -> Result<Option<InspectionRecord>, StorageError> {
    let record = conn
        .query_row(
            &format!("SELECT {INSPECTION_COLUMNS} FROM inspections WHERE team_number = ?1"),
            [team_number],
            inspection_from_row,
        )
        .optional()?;
    Ok(record)
}

fn insert_history(
    conn: &Connection,
    team_number: u32,
    transition: &StatusTransition,
    old_status: InspectionStatus,
    now_text: &str,
) -> Result<InspectionHistoryEntry, StorageError> {
    conn.execute(
        "
        INSERT INTO inspection_history (
            team_number,
            action,
            old_status,
            new_status,
            is_override,
            actor,
            created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            team_number,
            transition.action.as_str(),
            old_status.as_str(),
            transition.new_status.as_str(),
            transition.is_override(),
            transition.actor,
            now_text,
        ],
    )?;
    let id = conn.last_insert_rowid();
    let entry = conn.query_row(
        "
        SELECT id, team_number, action, old_status, new_status, is_override, actor, created_at
        FROM inspection_history
        WHERE id = ?1
        ",
        [id],
        history_from_row,
    )?;
    Ok(entry)
}

fn status_column(row: &rusqlite::Row<'_>, index: usize) -> rusqlite::Result<InspectionStatus> {
    let raw: String = row.get(index)?;
    raw.parse().map_err(|err| column_error(index, err))
}

fn inspection_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InspectionRecord> {
    Ok(InspectionRecord {
        team_number: team_number_column(row, 0)?,
        status: status_column(row, 1)?,
        comment: row.get(2)?,
        started_at: optional_timestamp_column(row, 3)?,
        finalized_at: optional_timestamp_column(row, 4)?,
        updated_at: optional_timestamp_column(row, 5)?,
    })
}

fn history_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<InspectionHistoryEntry> {
    let action: String = row.get(2)?;
    let old_status = row
        .get::<_, Option<String>>(3)?
        .map(|raw| raw.parse().map_err(|err| column_error(3, err)))
        .transpose()?;

    Ok(InspectionHistoryEntry {
        id: row.get(0)?,
        team_number: team_number_column(row, 1)?,
        action: action.parse().map_err(|err| column_error(2, err))?,
        old_status,
        new_status: status_column(row, 4)?,
        is_override: row.get(5)?,
        actor: row.get(6)?,
        created_at: timestamp_column(row, 7)?,
    })
}
