use crate::checklist::ChecklistDefinition;
use crate::ContractError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Stored responses of one team, keyed by checklist item key. `None` means
/// the item was cleared or never answered.
pub type ResponseMap = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InspectionStatus {
    #[default]
    NotStarted,
    InProgress,
    Incomplete,
    Passed,
}

impl InspectionStatus {
    pub const ALL: [InspectionStatus; 4] = [
        InspectionStatus::NotStarted,
        InspectionStatus::InProgress,
        InspectionStatus::Incomplete,
        InspectionStatus::Passed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InspectionStatus::NotStarted => "NOT_STARTED",
            InspectionStatus::InProgress => "IN_PROGRESS",
            InspectionStatus::Incomplete => "INCOMPLETE",
            InspectionStatus::Passed => "PASSED",
        }
    }
}

impl fmt::Display for InspectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InspectionStatus {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_uppercase();
        InspectionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ContractError::InvalidStatus(input.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryAction {
    StatusChange,
    LeadOverride,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::StatusChange => "STATUS_CHANGE",
            HistoryAction::LeadOverride => "LEAD_OVERRIDE",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryAction {
    type Err = ContractError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim() {
            "STATUS_CHANGE" => Ok(HistoryAction::StatusChange),
            "LEAD_OVERRIDE" => Ok(HistoryAction::LeadOverride),
            other => Err(ContractError::InvalidHistoryAction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamIdentity {
    pub team_number: u32,
    pub team_name: String,
    pub organization_school: String,
    pub city: String,
    pub country: String,
}

impl TeamIdentity {
    pub fn default_name(team_number: u32) -> String {
        format!("Team {team_number}")
    }

    /// Case-insensitive substring match over number, name, organization,
    /// city and country.
    pub fn matches_search(&self, search: &str) -> bool {
        let needle = search.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        let haystack = format!(
            "{} {} {} {} {}",
            self.team_number, self.team_name, self.organization_school, self.city, self.country
        )
        .to_lowercase();
        haystack.contains(&needle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InspectionRecord {
    pub team_number: u32,
    pub status: InspectionStatus,
    pub comment: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl InspectionRecord {
    pub fn not_started(team_number: u32) -> Self {
        Self {
            team_number,
            status: InspectionStatus::NotStarted,
            comment: None,
            started_at: None,
            finalized_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InspectionHistoryEntry {
    pub id: i64,
    pub team_number: u32,
    pub action: HistoryAction,
    pub old_status: Option<InspectionStatus>,
    pub new_status: InspectionStatus,
    pub is_override: bool,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemUpdate {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl ItemUpdate {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn clear(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InspectionProgress {
    pub completed_required: u32,
    pub missing_required: u32,
    pub total_required: u32,
}

impl InspectionProgress {
    pub fn is_complete(&self) -> bool {
        self.missing_required == 0
    }
}

pub fn is_answered(value: Option<&Option<String>>) -> bool {
    matches!(value, Some(Some(value)) if !value.is_empty())
}

pub fn calculate_progress(responses: &ResponseMap, required_keys: &[&str]) -> InspectionProgress {
    let total_required = required_keys.len() as u32;
    let completed_required = required_keys
        .iter()
        .filter(|key| is_answered(responses.get(**key)))
        .count() as u32;
    InspectionProgress {
        completed_required,
        missing_required: total_required - completed_required,
        total_required,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub not_started: u32,
    pub in_progress: u32,
    pub incomplete: u32,
    pub passed: u32,
}

impl StatusCounts {
    pub fn record(&mut self, status: InspectionStatus) {
        match status {
            InspectionStatus::NotStarted => self.not_started += 1,
            InspectionStatus::InProgress => self.in_progress += 1,
            InspectionStatus::Incomplete => self.incomplete += 1,
            InspectionStatus::Passed => self.passed += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.not_started + self.in_progress + self.incomplete + self.passed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamInspectionSummary {
    #[serde(flatten)]
    pub team: TeamIdentity,
    pub status: InspectionStatus,
    pub progress: InspectionProgress,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamListView {
    pub teams: Vec<TeamInspectionSummary>,
    pub counts: StatusCounts,
    pub total: u32,
    pub filtered: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InspectionDetail {
    pub event_code: String,
    pub team: TeamIdentity,
    pub inspection: InspectionRecord,
    pub progress: InspectionProgress,
    pub responses: ResponseMap,
    pub checklist: ChecklistDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicTeamStatus {
    pub team_number: u32,
    pub team_name: String,
    pub status: InspectionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicStatusView {
    pub event_code: String,
    pub event_name: String,
    pub teams: Vec<PublicTeamStatus>,
    pub counts: StatusCounts,
}
