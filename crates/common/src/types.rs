//! Core types for stepmirror
//!
//! Everything that crosses the boundary to the reporting service lives here:
//! identifiers, item kinds, statuses and the request/response payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Launch identifier
///
/// Generated locally and sent with the start request, so it is known before
/// the remote call completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaunchId(pub Uuid);

impl LaunchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LaunchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LaunchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LaunchId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Test item identifier (suite, test, step or meta-step)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemKind {
    Suite,
    Test,
    Step,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Suite => write!(f, "SUITE"),
            ItemKind::Test => write!(f, "TEST"),
            ItemKind::Step => write!(f, "STEP"),
        }
    }
}

/// Item status
///
/// Only passed and failed are interpreted. Anything else the host reports
/// (skipped, interrupted, ...) is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemStatus {
    Passed,
    Failed,
    Other(String),
}

impl ItemStatus {
    /// Status used for items still open when the run ends
    pub fn interrupted() -> Self {
        ItemStatus::Other("interrupted".to_string())
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ItemStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ItemStatus::Passed => "passed",
            ItemStatus::Failed => "failed",
            ItemStatus::Other(s) => s,
        }
    }
}

impl Default for ItemStatus {
    fn default() -> Self {
        Self::Passed
    }
}

impl From<String> for ItemStatus {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "passed" => ItemStatus::Passed,
            "failed" => ItemStatus::Failed,
            _ => ItemStatus::Other(s),
        }
    }
}

impl From<&str> for ItemStatus {
    fn from(s: &str) -> Self {
        ItemStatus::from(s.to_string())
    }
}

impl From<ItemStatus> for String {
    fn from(status: ItemStatus) -> Self {
        match status {
            ItemStatus::Other(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

/// Launch mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LaunchMode {
    #[default]
    Default,
    Debug,
}

/// Key/value attribute attached to launches and items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
        }
    }

    /// Build a key-less attribute from a host tag such as `@smoke`
    pub fn from_tag(tag: &str) -> Self {
        Self {
            key: None,
            value: tag.trim_start_matches('@').to_string(),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Start launch request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartLaunchRq {
    pub uuid: LaunchId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub attributes: Vec<Attribute>,
    pub mode: LaunchMode,
    pub rerun: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerun_of: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
}

/// Finish launch request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishLaunchRq {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}

/// Response to a finished launch
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LaunchFinished {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub number: Option<u64>,
    #[serde(default)]
    pub link: Option<String>,
}

/// Start item request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartItemRq {
    pub uuid: ItemId,
    pub launch_uuid: LaunchId,
    /// Parent item; routed into the request path rather than the body
    #[serde(skip)]
    pub parent: Option<ItemId>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<Attribute>,
    pub retry: bool,
}

/// Finish item request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishItemRq {
    pub launch_uuid: LaunchId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}

/// Log entry request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRq {
    pub launch_uuid: LaunchId,
    /// Target item; launch-level log when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_uuid: Option<ItemId>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<LogFile>,
}

/// Reference from a log entry to its multipart file part
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFile {
    pub name: String,
}

/// Binary attachment sent alongside a log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    pub content: Vec<u8>,
}
