//! IPC message types for daemon communication
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::{Change, QueryResult};
use crate::buffer::{Cursor, SubscriberId};
use crate::domain::{Event, SourceInfo};

/// Messages from producers and viewers to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Append an event to the buffer
    Push { event: Event },

    /// Add or replace an issue
    AddIssue { id: String, payload: Value },

    /// Remove an issue
    ClearIssue { id: String },

    /// Flattened timeline of one source, or all sources when `source` is absent
    Query {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        first: Option<usize>,
    },

    /// Record a read position; defaults to the newest item
    MarkRead {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<String>,
    },

    /// Known sources in discovery order
    ListSources,

    /// Keep the connection open and stream feed changes after `cursor`
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<Cursor>,
    },

    /// Ping to check if daemon is alive
    Ping,

    /// Request daemon to stop gracefully
    Shutdown,
}

/// Responses from the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    /// Acknowledgment
    Ok,

    /// Event accepted at this cursor
    Pushed { cursor: Cursor },

    Query { result: QueryResult },

    /// Read position recorded; absent when there was nothing to mark
    MarkedRead {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cursor: Option<String>,
    },

    Sources { sources: Vec<SourceInfo> },

    /// Subscription opened; `Change` lines follow
    Subscribed { subscriber: SubscriberId },

    Change { change: Change },

    /// Pong response to ping
    Pong { version: String },

    /// Error response
    Error { message: String },
}
