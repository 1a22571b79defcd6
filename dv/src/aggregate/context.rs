//! AggregationContext - queries, read tracking and live feeds
//!
//! The context owns handles to one session's ring buffer and issue registry.
//! Producers push through it so sources are discovered and issue mirroring
//! happens at ingestion; viewers query flattened timelines or subscribe to the
//! merged live feed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info};

use super::flatten::{flatten, unread_info};
use super::sources::SourceDirectory;
use super::subscription::Subscription;
use super::types::{Change, Item, Node, Page, PageInfo, QueryResult, ReadState, UnreadInfo};
use crate::buffer::{Cursor, DEFAULT_CAPACITY, RingBuffer, SubscriberId};
use crate::domain::{ChangeType, Event, SourceId, SourceInfo};
use crate::error::{FeedError, FeedResult};
use crate::issues::{ChangeStream, IssueRegistry};
use crate::merge::FanIn;

/// Read-state key for queries spanning every source
const ALL_SOURCES_KEY: &str = "all";

#[derive(Default)]
struct ContextState {
    sources: SourceDirectory,
    layout: HashMap<String, ReadState>,
    /// Open subscriptions that have not been cancelled
    subscribers: HashSet<SubscriberId>,
    /// Force-cancelled subscriptions whose feed is still alive
    cancelled: HashSet<SubscriberId>,
}

/// Deregisters a subscriber once its feed is closed or dropped
///
/// Held by [`Subscription`]; lock order is context state, then buffer or registry.
pub(crate) struct SubscriberRelease {
    id: SubscriberId,
    state: Arc<Mutex<ContextState>>,
    buffer: RingBuffer<Event>,
    issues: IssueRegistry,
}

impl SubscriberRelease {
    pub(crate) fn release(self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let open = state.subscribers.remove(&self.id);
        let cancelled = state.cancelled.remove(&self.id);
        if cancelled {
            self.buffer.release_subscriber(self.id);
            self.issues.release_subscriber(self.id);
        }
        debug!(subscriber = self.id, open, cancelled, "SubscriberRelease::release");
    }
}

fn layout_key(source: Option<&SourceId>) -> String {
    source.map_or_else(|| ALL_SOURCES_KEY.to_string(), ToString::to_string)
}

/// Query and subscription layer over one session's buffer and issues
pub struct AggregationContext {
    buffer: RingBuffer<Event>,
    issues: IssueRegistry,
    state: Arc<Mutex<ContextState>>,
    next_subscriber: AtomicU64,
}

impl AggregationContext {
    /// Build a context over existing handles
    pub fn new(buffer: RingBuffer<Event>, issues: IssueRegistry) -> Self {
        debug!(capacity = buffer.capacity(), "AggregationContext::new: called");
        Self {
            buffer,
            issues,
            state: Arc::new(Mutex::new(ContextState::default())),
            next_subscriber: AtomicU64::new(1),
        }
    }

    /// Build a context with a fresh buffer of `capacity` and an empty registry
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(RingBuffer::new(capacity), IssueRegistry::new())
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn buffer(&self) -> &RingBuffer<Event> {
        &self.buffer
    }

    pub fn issues(&self) -> &IssueRegistry {
        &self.issues
    }

    // === Ingestion ===

    /// Validate and append an event, returning its cursor
    pub fn push(&self, event: Event) -> FeedResult<Cursor> {
        event.validate()?;
        debug!(id = %event.id, source = %event.source, kind = ?event.kind, "AggregationContext::push: called");

        self.lock().sources.observe(&event);

        if let Some(issue_id) = &event.issue_id {
            if event.issue_cleared {
                self.issues.clear(issue_id);
            } else {
                self.issues.add(issue_id, event.payload.clone());
            }
        }

        Ok(self.buffer.push(event))
    }

    /// Push a clear sentinel for `source`
    pub fn clear_source(&self, source: SourceId) -> FeedResult<Cursor> {
        debug!(%source, "AggregationContext::clear_source: called");
        self.push(Event::cleared(source))
    }

    pub fn add_issue(&self, issue_id: &str, payload: Value) -> FeedResult<ChangeType> {
        if issue_id.trim().is_empty() {
            return Err(FeedError::InvalidEvent("issue id must not be empty".to_string()));
        }
        Ok(self.issues.add(issue_id, payload))
    }

    pub fn clear_issue(&self, issue_id: &str) -> Option<Value> {
        self.issues.clear(issue_id)
    }

    // === Queries ===

    /// Deduplicated timeline for a source, or for everything
    pub fn timeline(&self, source: Option<&SourceId>) -> Vec<Item> {
        match source {
            Some(SourceId::Issues) => self.issues.list().into_iter().map(Item::from).collect(),
            scope => {
                let entries = self.buffer.all_with_cursor();
                flatten(&entries, scope).into_iter().map(Item::from).collect()
            }
        }
    }

    /// Unread accounting of `items` against the recorded read state of `source`
    pub fn unread_info(&self, source: Option<&SourceId>, items: &[Item]) -> UnreadInfo {
        let recorded = self.read_state(source).last_read_cursor;
        unread_info(recorded.as_deref(), items)
    }

    /// Full view of a source's timeline
    pub fn query(&self, source: Option<&SourceId>) -> QueryResult {
        let items = self.timeline(source);
        let unread = self.unread_info(source, &items);
        debug!(source = ?source, count = items.len(), unread = unread.unread_count, "AggregationContext::query");
        QueryResult {
            count: items.len(),
            unread_count: unread.unread_count,
            page_info: PageInfo {
                last_read_cursor: unread.last_read_cursor,
                last_cursor: items.last().map(|item| item.cursor.clone()),
            },
            items,
        }
    }

    /// Paginated view; counts and page info still describe the whole timeline
    pub fn query_page(&self, source: Option<&SourceId>, page: &Page) -> FeedResult<QueryResult> {
        debug!(source = ?source, ?page, "AggregationContext::query_page: called");
        let mut result = self.query(source);

        if let Some(after) = &page.after {
            let start = match source {
                Some(SourceId::Issues) => result
                    .items
                    .iter()
                    .position(|item| item.cursor == *after)
                    .map(|index| index + 1)
                    .ok_or_else(|| FeedError::InvalidCursor(after.clone()))?,
                _ => {
                    let after: Cursor = after.parse().map_err(|_| FeedError::InvalidCursor(after.clone()))?;
                    result
                        .items
                        .iter()
                        .position(|item| item.cursor.parse::<Cursor>().is_ok_and(|cursor| cursor > after))
                        .unwrap_or(result.items.len())
                }
            };
            result.items.drain(..start);
        }

        if let Some(first) = page.first {
            result.items.truncate(first);
        }

        Ok(result)
    }

    // === Read tracking ===

    pub fn read_state(&self, source: Option<&SourceId>) -> ReadState {
        self.lock().layout.get(&layout_key(source)).cloned().unwrap_or_default()
    }

    /// Record `cursor` (default: newest item) as read for `source`
    ///
    /// Returns the recorded cursor, or `None` when defaulting on an empty timeline.
    pub fn mark_read(&self, source: Option<&SourceId>, cursor: Option<String>) -> FeedResult<Option<String>> {
        debug!(source = ?source, ?cursor, "AggregationContext::mark_read: called");
        let cursor = match cursor {
            Some(cursor) => {
                let is_issue_scope = matches!(source, Some(SourceId::Issues));
                if !is_issue_scope && cursor.parse::<Cursor>().is_err() {
                    return Err(FeedError::InvalidCursor(cursor));
                }
                cursor
            }
            None => match self.timeline(source).pop() {
                Some(newest) => newest.cursor,
                None => {
                    debug!(source = ?source, "AggregationContext::mark_read: nothing to mark");
                    return Ok(None);
                }
            },
        };

        self.lock().layout.insert(
            layout_key(source),
            ReadState {
                last_read_cursor: Some(cursor.clone()),
            },
        );
        Ok(Some(cursor))
    }

    pub fn list_sources(&self) -> Vec<SourceInfo> {
        self.lock().sources.list()
    }

    // === Live feed ===

    /// Live feed of everything after `cursor`, with current issues first
    pub fn subscribe(&self, cursor: Option<Cursor>) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.lock().subscribers.insert(id);

        let events = self.buffer.iter_for(cursor, Some(id)).map(Change::from).boxed();

        // Listen before the snapshot so nothing falls in between
        let changes = ChangeStream::all_changes(self.issues.clone(), Some(id)).map(Change::from);
        let snapshot: Vec<Change> = self
            .issues
            .list()
            .into_iter()
            .map(|entry| Change {
                change_type: ChangeType::Added,
                cursor: Some(entry.cursor.clone()),
                node: Node::Issue(entry.node),
            })
            .collect();
        let issues = stream::iter(snapshot).chain(changes).boxed();

        info!(subscriber = id, ?cursor, "New subscription");
        let release = SubscriberRelease {
            id,
            state: Arc::clone(&self.state),
            buffer: self.buffer.clone(),
            issues: self.issues.clone(),
        };
        Subscription::new(id, FanIn::new(vec![events, issues]), release)
    }

    /// Force-cancel every pending read and listener of an open subscriber
    ///
    /// Returns false for ids that are unknown, already cancelled or closed.
    pub fn cancel_subscriber(&self, id: SubscriberId) -> bool {
        let mut state = self.lock();
        if !state.subscribers.remove(&id) {
            debug!(subscriber = id, "AggregationContext::cancel_subscriber: not open");
            return false;
        }
        state.cancelled.insert(id);
        let reads = self.buffer.cancel_subscriber(id);
        let listeners = self.issues.cancel_subscriber(id);
        info!(subscriber = id, reads, listeners, "Cancelled subscriber");
        true
    }

    /// Open subscriptions that have not been cancelled
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Cancelled subscriptions whose feed has not been dropped yet
    pub fn cancelled_count(&self) -> usize {
        self.lock().cancelled.len()
    }

    /// Tear down the session: every pending read and listener is cancelled
    pub fn shutdown(&self) {
        let subscribers = std::mem::take(&mut self.lock().subscribers);
        self.buffer.close();
        self.issues.close();
        info!(subscribers = subscribers.len(), "Aggregation context shut down");
    }
}

impl Default for AggregationContext {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

/// Create a context wrapped in an Arc for shared ownership
pub fn create_context(capacity: usize) -> Arc<AggregationContext> {
    Arc::new(AggregationContext::with_capacity(capacity))
}
