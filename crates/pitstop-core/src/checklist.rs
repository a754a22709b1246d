use crate::{sha256_hex, ContractError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const BUILTIN_CHECKLIST: &str = include_str!("../checklists/robot_inspection.json");

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistInputType {
    #[default]
    Checkbox,
    Select,
    Text,
    Number,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistSection {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub key: String,
    pub label: String,
    pub section_id: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub input_type: ChecklistInputType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// The static inspection checklist. Loaded once per process and shared
/// read-only; it does not vary per event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistDefinition {
    #[serde(default)]
    pub version: String,
    pub sections: Vec<ChecklistSection>,
    pub items: Vec<ChecklistItem>,
}

impl ChecklistDefinition {
    pub fn builtin() -> Result<Self, ContractError> {
        Self::from_json(BUILTIN_CHECKLIST)
    }

    pub fn from_json(raw: &str) -> Result<Self, ContractError> {
        let mut definition: ChecklistDefinition = serde_json::from_str(raw)
            .map_err(|err| ContractError::ChecklistParse(err.to_string()))?;
        definition.validate()?;
        definition.sections.sort_by_key(|section| section.order);
        Ok(definition)
    }

    pub fn validate(&self) -> Result<(), ContractError> {
        let mut section_ids = BTreeSet::new();
        for section in &self.sections {
            if !section_ids.insert(section.id.as_str()) {
                return Err(ContractError::DuplicateSection(section.id.clone()));
            }
        }

        let mut item_keys = BTreeSet::new();
        for item in &self.items {
            if !item_keys.insert(item.key.as_str()) {
                return Err(ContractError::DuplicateItem(item.key.clone()));
            }
            if !section_ids.contains(item.section_id.as_str()) {
                return Err(ContractError::UnknownSection {
                    item: item.key.clone(),
                    section: item.section_id.clone(),
                });
            }
            if item.input_type == ChecklistInputType::Select
                && item.options.as_ref().map_or(true, |options| options.is_empty())
            {
                return Err(ContractError::MissingOptions(item.key.clone()));
            }
        }

        Ok(())
    }

    pub fn item(&self, key: &str) -> Option<&ChecklistItem> {
        self.items.iter().find(|item| item.key == key)
    }

    pub fn required_keys(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|item| item.required)
            .map(|item| item.key.as_str())
            .collect()
    }

    /// Checks a submitted response against the item it targets. `None` and
    /// the empty string clear a response and are always accepted.
    pub fn validate_value(&self, key: &str, value: Option<&str>) -> Result<(), ContractError> {
        let item = self
            .item(key)
            .ok_or_else(|| ContractError::UnknownItem(key.to_string()))?;
        let Some(value) = value.filter(|value| !value.is_empty()) else {
            return Ok(());
        };

        match item.input_type {
            ChecklistInputType::Select => {
                let allowed = item
                    .options
                    .as_ref()
                    .is_some_and(|options| options.iter().any(|option| option == value));
                if !allowed {
                    return Err(ContractError::InvalidOption {
                        item: key.to_string(),
                        value: value.to_string(),
                    });
                }
            }
            ChecklistInputType::Number => {
                if value.trim().parse::<f64>().is_err() {
                    return Err(ContractError::InvalidNumber {
                        item: key.to_string(),
                        value: value.to_string(),
                    });
                }
            }
            ChecklistInputType::Checkbox | ChecklistInputType::Text => {}
        }

        Ok(())
    }

    /// Hex sha-256 of the serialized definition. Clients compare it to
    /// notice a checklist swap between page loads.
    pub fn fingerprint(&self) -> Result<String, ContractError> {
        let bytes =
            serde_json::to_vec(self).map_err(|err| ContractError::Serialization(err.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}
