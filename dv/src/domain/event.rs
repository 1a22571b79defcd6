//! Event type pushed by producers
//!
//! An event is an opaque JSON payload wrapped with the metadata the engine
//! needs: which source it came from, which logical message it updates, and
//! whether it should be mirrored into the issues registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::source::SourceId;
use crate::error::{FeedError, FeedResult};

/// What an event represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A line of log output
    #[default]
    Log,
    /// Build or bundling progress
    Progress,
    /// Status change of the process or device
    Status,
    /// Sentinel: everything older from the same source is cleared
    Cleared,
}

/// A single pushed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Identity of the logical message; later pushes with the same id supersede earlier ones
    pub id: String,

    /// Logical origin
    pub source: SourceId,

    #[serde(default)]
    pub kind: EventKind,

    /// Display name for the source, used when this event introduces a new device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,

    /// When set, the event is mirrored into the issues registry under this key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,

    /// With `issue_id`, clears the issue instead of adding it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub issue_cleared: bool,

    #[serde(rename = "ts", default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(source: SourceId, id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            source,
            kind: EventKind::Log,
            source_name: None,
            issue_id: None,
            issue_cleared: false,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Create a clear sentinel for a source
    pub fn cleared(source: SourceId) -> Self {
        let id = format!("cleared-{}", uuid::Uuid::now_v7());
        Self::new(source, id, Value::Null).with_kind(EventKind::Cleared)
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    /// Mirror this event into the issues registry under `issue_id`
    pub fn with_issue(mut self, issue_id: impl Into<String>) -> Self {
        self.issue_id = Some(issue_id.into());
        self.issue_cleared = false;
        self
    }

    /// Clear the issue `issue_id` when this event is pushed
    pub fn clearing_issue(mut self, issue_id: impl Into<String>) -> Self {
        self.issue_id = Some(issue_id.into());
        self.issue_cleared = true;
        self
    }

    pub fn is_clear_sentinel(&self) -> bool {
        self.kind == EventKind::Cleared
    }

    /// Reject events that would corrupt the dedup index
    pub fn validate(&self) -> FeedResult<()> {
        if self.id.trim().is_empty() {
            return Err(FeedError::InvalidEvent("event id must not be empty".to_string()));
        }
        if matches!(&self.source, SourceId::Device(device) if device.trim().is_empty()) {
            return Err(FeedError::InvalidEvent("device id must not be empty".to_string()));
        }
        if self.source == SourceId::Issues {
            return Err(FeedError::InvalidEvent(
                "issues are added through the registry, not pushed as events".to_string(),
            ));
        }
        if self.issue_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            return Err(FeedError::InvalidEvent("issue id must not be empty".to_string()));
        }
        Ok(())
    }
}
