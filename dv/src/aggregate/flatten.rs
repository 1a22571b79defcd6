//! Timeline flattening and unread accounting
//!
//! Flattening walks the buffer from newest to oldest. The newest push of each
//! logical id wins and older pushes of it are dropped; a clear sentinel hides
//! everything older from its source. The survivors come back oldest first.

use std::collections::HashSet;

use super::types::{Item, UnreadInfo};
use crate::buffer::{Cursor, Entry};
use crate::domain::{Event, SourceId};

/// Flatten buffered entries for one source, or for all sources when `scope` is `None`
pub fn flatten(entries: &[Entry<Event>], scope: Option<&SourceId>) -> Vec<Entry<Event>> {
    let mut seen: HashSet<(&SourceId, &str)> = HashSet::new();
    let mut cleared: HashSet<&SourceId> = HashSet::new();
    let mut kept: Vec<&Entry<Event>> = Vec::new();

    for entry in entries.iter().rev() {
        let event = &entry.item;
        if scope.is_some_and(|source| *source != event.source) {
            continue;
        }
        if cleared.contains(&event.source) {
            continue;
        }
        if event.is_clear_sentinel() {
            if scope.is_some() {
                break;
            }
            cleared.insert(&event.source);
            continue;
        }
        if seen.insert((&event.source, event.id.as_str())) {
            kept.push(entry);
        }
    }

    kept.into_iter().rev().cloned().collect()
}

/// Index of the recorded read position within `items`
///
/// An exact cursor match wins (the last one, scanning forward). Otherwise,
/// when both sides are numeric buffer cursors, the position is the last item
/// at or before the recorded cursor; superseded or evicted cursors land there.
fn read_position(last_read: &str, items: &[Item]) -> Option<usize> {
    if let Some(index) = items.iter().rposition(|item| item.cursor == last_read) {
        return Some(index);
    }
    let recorded: Cursor = last_read.parse().ok()?;
    items
        .iter()
        .rposition(|item| item.cursor.parse::<Cursor>().is_ok_and(|cursor| cursor <= recorded))
}

/// Count the items after `last_read`
///
/// With nothing read yet, every item is unread and the oldest item stands in
/// as the read position.
pub fn unread_info(last_read: Option<&str>, items: &[Item]) -> UnreadInfo {
    match last_read {
        None => UnreadInfo {
            unread_count: items.len(),
            last_read_cursor: items.first().map(|item| item.cursor.clone()),
        },
        Some(cursor) => {
            let unread_count = match read_position(cursor, items) {
                Some(index) => items.len() - index - 1,
                None => items.len(),
            };
            UnreadInfo {
                unread_count,
                last_read_cursor: Some(cursor.to_string()),
            }
        }
    }
}
