use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use thiserror::Error;

pub mod checklist;
pub mod inspection_contracts;

pub const MAX_EVENT_CODE_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("checklist parse failed: {0}")]
    ChecklistParse(String),
    #[error("duplicate checklist section id: {0}")]
    DuplicateSection(String),
    #[error("duplicate checklist item key: {0}")]
    DuplicateItem(String),
    #[error("checklist item {item} references unknown section {section}")]
    UnknownSection { item: String, section: String },
    #[error("select item {0} declares no options")]
    MissingOptions(String),
    #[error("unknown checklist item: {0}")]
    UnknownItem(String),
    #[error("value {value:?} is not an option of item {item}")]
    InvalidOption { item: String, value: String },
    #[error("value {value:?} of item {item} is not a number")]
    InvalidNumber { item: String, value: String },
    #[error("invalid inspection status: {0}")]
    InvalidStatus(String),
    #[error("invalid history action: {0}")]
    InvalidHistoryAction(String),
    #[error("invalid event code: {0:?}")]
    InvalidEventCode(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// An event as recorded in the global catalog. Owned by the event
/// management flow; the inspection workflow only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub event_type: i64,
    #[serde(default)]
    pub status: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub divisions: i64,
}

fn event_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"))
}

/// Event codes double as store file names, so only a conservative
/// character set is accepted.
pub fn validate_event_code(code: &str) -> Result<&str, ContractError> {
    if code.is_empty() || code.len() > MAX_EVENT_CODE_LEN || !event_code_pattern().is_match(code)
    {
        return Err(ContractError::InvalidEventCode(code.to_string()));
    }
    Ok(code)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_accept_short_identifiers() {
        for code in ["demo1", "USCAFFL", "ftc-2024_q1", "a"] {
            assert_eq!(validate_event_code(code), Ok(code));
        }
    }

    #[test]
    fn event_codes_reject_path_like_input() {
        for code in ["", "../server", "demo/1", "demo.db", "demo 1", "ÄVENT"] {
            assert!(
                validate_event_code(code).is_err(),
                "expected {code:?} to be rejected"
            );
        }
        let long = "x".repeat(MAX_EVENT_CODE_LEN + 1);
        assert!(validate_event_code(&long).is_err());
    }

    #[test]
    fn sha256_hex_is_lowercase_hex() {
        let digest = sha256_hex(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
