//! View types returned to viewers

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::buffer::Entry;
use crate::domain::{ChangeType, Event};
use crate::issues::{IssueEntry, Notification};

/// What a timeline item or feed change carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Event(Event),
    Issue(Value),
}

impl Node {
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(event) => Some(event),
            Self::Issue(_) => None,
        }
    }

    pub fn as_issue(&self) -> Option<&Value> {
        match self {
            Self::Event(_) => None,
            Self::Issue(record) => Some(record),
        }
    }
}

/// One entry of a flattened timeline
///
/// Buffer items carry their numeric cursor string-encoded; issues use their id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub cursor: String,
    pub node: Node,
}

impl From<Entry<Event>> for Item {
    fn from(entry: Entry<Event>) -> Self {
        Self {
            cursor: entry.cursor.to_string(),
            node: Node::Event(entry.item),
        }
    }
}

impl From<IssueEntry> for Item {
    fn from(entry: IssueEntry) -> Self {
        Self {
            cursor: entry.cursor,
            node: Node::Issue(entry.node),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Recorded read position, or the oldest item when nothing was read yet
    pub last_read_cursor: Option<String>,
    /// Cursor of the newest item in the timeline
    pub last_cursor: Option<String>,
}

/// Point-in-time view of a timeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Items in the whole flattened timeline, not just this page
    pub count: usize,
    pub unread_count: usize,
    pub items: Vec<Item>,
    pub page_info: PageInfo,
}

/// Window into a flattened timeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Only items strictly after this cursor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// At most this many items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<usize>,
}

impl Page {
    /// Every item
    pub fn all() -> Self {
        Self::default()
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn first(mut self, count: usize) -> Self {
        self.first = Some(count);
        self
    }
}

/// Viewer read position for one scope
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadState {
    pub last_read_cursor: Option<String>,
}

/// Unread accounting for a timeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadInfo {
    pub unread_count: usize,
    pub last_read_cursor: Option<String>,
}

/// One element of the live feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub node: Node,
}

impl From<Entry<Event>> for Change {
    fn from(entry: Entry<Event>) -> Self {
        let change_type = if entry.item.is_clear_sentinel() {
            ChangeType::Cleared
        } else {
            ChangeType::Added
        };
        Self {
            change_type,
            cursor: Some(entry.cursor.to_string()),
            node: Node::Event(entry.item),
        }
    }
}

impl From<Notification<Value>> for Change {
    fn from(notification: Notification<Value>) -> Self {
        let cursor = notification.payload.get("id").and_then(Value::as_str).map(str::to_string);
        Self {
            change_type: notification.change_type,
            cursor,
            node: Node::Issue(notification.payload),
        }
    }
}
