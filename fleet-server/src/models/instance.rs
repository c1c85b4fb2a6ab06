use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    #[default]
    Unknown,
    Running,
    Stopped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub port: u16,
    #[serde(default)]
    pub status: InstanceStatus,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

impl InstanceRecord {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            status: InstanceStatus::Unknown,
            created: Utc::now(),
            version: None,
            memory_limit: None,
        }
    }
}

/// Instance name → record, persisted as a single JSON document.
pub type Manifest = BTreeMap<String, InstanceRecord>;

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    #[serde(default)]
    pub name: String,
    pub email: Option<String>,
    pub password: Option<String>,
    /// Accepts a number or a numeric string; empty strings and null mean "allocate".
    #[serde(default)]
    pub port: Option<serde_json::Value>,
    pub memory: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    #[serde(default)]
    pub version: String,
}

/// Instance names double as directory names, so only `[A-Za-z0-9_-]` is allowed.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
