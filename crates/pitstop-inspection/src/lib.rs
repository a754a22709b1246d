use chrono::Utc;
use pitstop_core::checklist::ChecklistDefinition;
use pitstop_core::inspection_contracts::{
    calculate_progress, InspectionDetail, InspectionHistoryEntry, InspectionProgress,
    InspectionRecord, InspectionStatus, ItemUpdate, PublicStatusView, PublicTeamStatus,
    ResponseMap, StatusCounts, TeamIdentity, TeamInspectionSummary, TeamListView,
};
use pitstop_core::ContractError;
use pitstop_storage::{EventStore, EventStores, StatusTransition, StorageError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Unexpected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum InspectionError {
    #[error("event {0} not found")]
    EventNotFound(String),
    #[error("store for event {0} not found")]
    EventStoreMissing(String),
    #[error("team {team_number} is not registered for event {event_code}")]
    TeamNotFound { event_code: String, team_number: u32 },
    #[error("invalid status {0:?}, expected one of NOT_STARTED, IN_PROGRESS, INCOMPLETE, PASSED")]
    InvalidStatus(String),
    #[error("cannot mark inspection PASSED: {missing} of {total} required items missing")]
    RequiredItemsMissing { missing: u32, total: u32 },
    #[error("no checklist items supplied")]
    EmptyItems,
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ContractError),
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl InspectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InspectionError::EventNotFound(_)
            | InspectionError::EventStoreMissing(_)
            | InspectionError::TeamNotFound { .. } => ErrorKind::NotFound,
            InspectionError::InvalidStatus(_)
            | InspectionError::RequiredItemsMissing { .. }
            | InspectionError::EmptyItems
            | InspectionError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            InspectionError::Storage(_) => ErrorKind::Unexpected,
        }
    }
}

impl From<StorageError> for InspectionError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::EventNotFound(code) => InspectionError::EventNotFound(code),
            StorageError::EventStoreMissing(code) => InspectionError::EventStoreMissing(code),
            StorageError::Contract(err) => InspectionError::InvalidArgument(err),
            other => InspectionError::Storage(other),
        }
    }
}

/// The inspection workflow over per-event stores. Every operation opens the
/// event's store, works on it and releases it before returning; nothing is
/// cached between calls.
#[derive(Debug, Clone)]
pub struct InspectionService {
    stores: EventStores,
    checklist: Arc<ChecklistDefinition>,
}

impl InspectionService {
    pub fn new(stores: EventStores, checklist: Arc<ChecklistDefinition>) -> Self {
        Self { stores, checklist }
    }

    pub fn stores(&self) -> &EventStores {
        &self.stores
    }

    pub fn checklist(&self) -> &ChecklistDefinition {
        &self.checklist
    }

    pub fn list_teams(
        &self,
        event_code: &str,
        search: Option<&str>,
    ) -> Result<TeamListView, InspectionError> {
        self.stores.with_event_store(event_code, |store| {
            let summaries = self.summaries(store)?;
            let mut counts = StatusCounts::default();
            for summary in &summaries {
                counts.record(summary.status);
            }
            let total = counts.total();

            let teams: Vec<TeamInspectionSummary> = match search.map(str::trim) {
                Some(needle) if !needle.is_empty() => summaries
                    .into_iter()
                    .filter(|summary| summary.team.matches_search(needle))
                    .collect(),
                _ => summaries,
            };

            Ok(TeamListView {
                filtered: teams.len() as u32,
                teams,
                counts,
                total,
            })
        })
    }

    pub fn detail(
        &self,
        event_code: &str,
        team_number: u32,
    ) -> Result<InspectionDetail, InspectionError> {
        self.stores.with_event_store(event_code, |store| {
            let team = require_team(store, team_number)?;
            store.ensure_inspection(team_number)?;
            self.detail_for(store, team)
        })
    }

    pub fn update_items(
        &self,
        event_code: &str,
        team_number: u32,
        items: &[ItemUpdate],
        actor: &str,
    ) -> Result<InspectionDetail, InspectionError> {
        if items.is_empty() {
            return Err(InspectionError::EmptyItems);
        }
        for item in items {
            self.checklist
                .validate_value(&item.key, item.value.as_deref())?;
        }

        self.stores.with_event_store(event_code, |store| {
            let team = require_team(store, team_number)?;
            let previous = store.ensure_inspection(team_number)?;
            let record = store.apply_item_updates(team_number, items, actor, Utc::now())?;
            debug!(
                event = "inspection_items_updated",
                code = %event_code,
                team = team_number,
                items = items.len(),
                actor = %actor,
            );
            if previous.status != record.status {
                info!(
                    event = "inspection_status_change",
                    code = %event_code,
                    team = team_number,
                    old_status = %previous.status,
                    new_status = %record.status,
                    actor = %actor,
                );
            }
            self.detail_for(store, team)
        })
    }

    /// Ordinary status update. `PASSED` requires every required checklist
    /// item to be answered; a rejected request leaves the inspection and its
    /// history untouched. A passed inspection may be moved back to any other
    /// status through this path.
    pub fn update_status(
        &self,
        event_code: &str,
        team_number: u32,
        status: &str,
        actor: &str,
    ) -> Result<InspectionDetail, InspectionError> {
        let new_status: InspectionStatus = status
            .parse()
            .map_err(|_| InspectionError::InvalidStatus(status.to_string()))?;

        self.stores.with_event_store(event_code, |store| {
            let team = require_team(store, team_number)?;
            store.ensure_inspection(team_number)?;

            if new_status == InspectionStatus::Passed {
                let progress = self.progress_of(&store.responses(team_number)?);
                if !progress.is_complete() {
                    warn!(
                        event = "inspection_pass_rejected",
                        code = %event_code,
                        team = team_number,
                        missing = progress.missing_required,
                        total = progress.total_required,
                        actor = %actor,
                    );
                    return Err(InspectionError::RequiredItemsMissing {
                        missing: progress.missing_required,
                        total: progress.total_required,
                    });
                }
            }

            let (_, entry) = store.apply_status(
                team_number,
                &StatusTransition::status_change(new_status, actor),
                Utc::now(),
            )?;
            info!(
                event = "inspection_status_change",
                code = %event_code,
                team = team_number,
                old_status = %entry.old_status.unwrap_or_default(),
                new_status = %entry.new_status,
                actor = %actor,
            );
            self.detail_for(store, team)
        })
    }

    /// Forces `PASSED` regardless of checklist progress. Reserved for lead
    /// inspectors; the history row carries the override flag.
    pub fn override_status(
        &self,
        event_code: &str,
        team_number: u32,
        comment: &str,
        actor: &str,
    ) -> Result<InspectionDetail, InspectionError> {
        let comment = non_empty(comment);

        self.stores.with_event_store(event_code, |store| {
            let team = require_team(store, team_number)?;
            store.ensure_inspection(team_number)?;
            let progress = self.progress_of(&store.responses(team_number)?);
            let (_, entry) = store.apply_status(
                team_number,
                &StatusTransition::lead_override(comment, actor),
                Utc::now(),
            )?;
            info!(
                event = "inspection_override",
                code = %event_code,
                team = team_number,
                old_status = %entry.old_status.unwrap_or_default(),
                missing = progress.missing_required,
                actor = %actor,
            );
            self.detail_for(store, team)
        })
    }

    /// Sets or clears the free-text comment. Status and history are not
    /// touched.
    pub fn save_comment(
        &self,
        event_code: &str,
        team_number: u32,
        comment: &str,
    ) -> Result<InspectionDetail, InspectionError> {
        let comment = non_empty(comment);

        self.stores.with_event_store(event_code, |store| {
            let team = require_team(store, team_number)?;
            store.set_comment(team_number, comment.as_deref(), Utc::now())?;
            self.detail_for(store, team)
        })
    }

    pub fn history(
        &self,
        event_code: &str,
        team_number: u32,
    ) -> Result<Vec<InspectionHistoryEntry>, InspectionError> {
        self.stores.with_event_store(event_code, |store| {
            require_team(store, team_number)?;
            store.ensure_inspection(team_number)?;
            Ok(store.history(team_number)?)
        })
    }

    /// Status board for unauthenticated displays: number, name and status
    /// only.
    pub fn public_status(&self, event_code: &str) -> Result<PublicStatusView, InspectionError> {
        self.stores.with_event_store(event_code, |store| {
            let summaries = self.summaries(store)?;
            let mut counts = StatusCounts::default();
            let teams = summaries
                .into_iter()
                .map(|summary| {
                    counts.record(summary.status);
                    PublicTeamStatus {
                        team_number: summary.team.team_number,
                        team_name: summary.team.team_name,
                        status: summary.status,
                    }
                })
                .collect();

            Ok(PublicStatusView {
                event_code: store.event().code.clone(),
                event_name: store.event().name.clone(),
                teams,
                counts,
            })
        })
    }

    fn progress_of(&self, responses: &ResponseMap) -> InspectionProgress {
        calculate_progress(responses, &self.checklist.required_keys())
    }

    fn summaries(&self, store: &EventStore) -> Result<Vec<TeamInspectionSummary>, InspectionError> {
        let teams = store.resolve_teams()?;
        let mut inspections = store.inspections()?;
        let mut responses = store.all_responses()?;

        Ok(teams
            .into_iter()
            .map(|team| {
                let record = inspections
                    .remove(&team.team_number)
                    .unwrap_or_else(|| InspectionRecord::not_started(team.team_number));
                let team_responses = responses.remove(&team.team_number).unwrap_or_default();
                TeamInspectionSummary {
                    progress: self.progress_of(&team_responses),
                    status: record.status,
                    updated_at: record.updated_at,
                    team,
                }
            })
            .collect())
    }

    fn detail_for(
        &self,
        store: &EventStore,
        team: TeamIdentity,
    ) -> Result<InspectionDetail, InspectionError> {
        let inspection = store.ensure_inspection(team.team_number)?;
        let responses = store.responses(team.team_number)?;
        Ok(InspectionDetail {
            event_code: store.event().code.clone(),
            progress: self.progress_of(&responses),
            team,
            inspection,
            responses,
            checklist: self.checklist.as_ref().clone(),
        })
    }
}

fn require_team(store: &EventStore, team_number: u32) -> Result<TeamIdentity, InspectionError> {
    store
        .resolve_team(team_number)?
        .ok_or_else(|| InspectionError::TeamNotFound {
            event_code: store.event().code.clone(),
            team_number,
        })
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
