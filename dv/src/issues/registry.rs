//! IssueRegistry - the current set of problem reports
//!
//! Unlike the ring buffer this keeps no history: one live record per issue
//! id. Every write is announced to listeners as ADDED, UPDATED or DELETED.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::stream::{ChangeSource, Listener, ListenerId, Notification};
use crate::buffer::SubscriberId;
use crate::domain::ChangeType;

/// A registry entry as listed to viewers; the issue id doubles as its cursor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueEntry {
    pub cursor: String,
    pub node: Value,
}

struct Stored {
    /// First-insertion order
    seq: u64,
    record: Value,
}

struct ListenerEntry {
    names: Vec<ChangeType>,
    subscriber: Option<SubscriberId>,
    tx: mpsc::UnboundedSender<Notification<Value>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Stored>,
    next_seq: u64,
    listeners: HashMap<ListenerId, ListenerEntry>,
    next_listener: ListenerId,
    cancelled: HashSet<SubscriberId>,
    closed: bool,
}

impl Inner {
    fn emit(&mut self, change_type: ChangeType, record: &Value) {
        // Drop listeners whose stream has gone away
        self.listeners.retain(|_, listener| {
            if !listener.names.contains(&change_type) {
                return true;
            }
            listener
                .tx
                .send(Notification {
                    change_type,
                    payload: record.clone(),
                })
                .is_ok()
        });
    }
}

/// Deduplicated registry of current issues
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct IssueRegistry {
    inner: Arc<Mutex<Inner>>,
}

/// The stored record: the payload with `id` forced to the issue key
fn with_id(key: &str, payload: Value) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert("id".to_string(), Value::String(key.to_string()));
            Value::Object(map)
        }
        other => {
            let mut map = Map::new();
            map.insert("id".to_string(), Value::String(key.to_string()));
            map.insert("value".to_string(), other);
            Value::Object(map)
        }
    }
}

impl IssueRegistry {
    pub fn new() -> Self {
        debug!("IssueRegistry::new: called");
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite an issue, returning which change was emitted
    pub fn add(&self, key: &str, payload: Value) -> ChangeType {
        let record = with_id(key, payload);
        let mut guard = self.lock();
        let inner = &mut *guard;

        let change_type = match inner.entries.get_mut(key) {
            Some(stored) => {
                stored.record = record.clone();
                ChangeType::Updated
            }
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.entries.insert(
                    key.to_string(),
                    Stored {
                        seq,
                        record: record.clone(),
                    },
                );
                ChangeType::Added
            }
        };

        inner.emit(change_type, &record);
        debug!(%key, %change_type, listeners = inner.listeners.len(), "IssueRegistry::add");
        change_type
    }

    /// Remove an issue; absent keys are a silent no-op
    pub fn clear(&self, key: &str) -> Option<Value> {
        let mut inner = self.lock();
        let removed = inner.entries.remove(key)?;
        inner.emit(ChangeType::Deleted, &removed.record);
        debug!(%key, "IssueRegistry::clear: deleted");
        Some(removed.record)
    }

    /// All current issues in first-insertion order
    pub fn list(&self) -> Vec<IssueEntry> {
        let inner = self.lock();
        let mut entries: Vec<(&String, &Stored)> = inner.entries.iter().collect();
        entries.sort_by_key(|(_, stored)| stored.seq);
        entries
            .into_iter()
            .map(|(key, stored)| IssueEntry {
                cursor: key.clone(),
                node: stored.record.clone(),
            })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().entries.get(key).map(|stored| stored.record.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Drop every listener registered for `subscriber` and refuse new ones
    pub fn cancel_subscriber(&self, subscriber: SubscriberId) -> usize {
        let mut inner = self.lock();
        inner.cancelled.insert(subscriber);
        let before = inner.listeners.len();
        inner.listeners.retain(|_, listener| listener.subscriber != Some(subscriber));
        let removed = before - inner.listeners.len();
        debug!(subscriber, removed, "IssueRegistry::cancel_subscriber");
        removed
    }

    /// Forget a cancelled subscriber once its streams are gone
    pub fn release_subscriber(&self, subscriber: SubscriberId) -> bool {
        let released = self.lock().cancelled.remove(&subscriber);
        debug!(subscriber, released, "IssueRegistry::release_subscriber");
        released
    }

    /// Cancelled subscribers not yet released
    pub fn cancelled_subscribers(&self) -> usize {
        self.lock().cancelled.len()
    }

    /// Tear down: drop all listeners so their streams finish
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        let removed = inner.listeners.len();
        inner.listeners.clear();
        debug!(removed, "IssueRegistry::close");
    }
}

impl ChangeSource for IssueRegistry {
    type Payload = Value;

    fn listen(&self, names: &[ChangeType], subscriber: Option<SubscriberId>) -> Listener<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;

        let refused = inner.closed || subscriber.is_some_and(|s| inner.cancelled.contains(&s));
        if refused {
            // Sender dropped here: the stream finishes on first poll
            debug!(?subscriber, "IssueRegistry::listen: refused");
        } else {
            inner.listeners.insert(
                id,
                ListenerEntry {
                    names: names.to_vec(),
                    subscriber,
                    tx,
                },
            );
            debug!(id, ?names, ?subscriber, "IssueRegistry::listen: registered");
        }

        Listener { id, rx }
    }

    fn unlisten(&self, id: ListenerId) {
        let removed = self.lock().listeners.remove(&id).is_some();
        debug!(id, removed, "IssueRegistry::unlisten");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALL: [ChangeType; 3] = [ChangeType::Added, ChangeType::Updated, ChangeType::Deleted];

    #[test]
    fn test_add_then_update() {
        let registry = IssueRegistry::new();
        assert_eq!(registry.add("ts-1", json!({"message": "bad type"})), ChangeType::Added);
        assert_eq!(registry.add("ts-1", json!({"message": "worse type"})), ChangeType::Updated);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("ts-1").unwrap()["message"], "worse type");
    }

    #[test]
    fn test_record_id_forced_to_key() {
        let registry = IssueRegistry::new();
        registry.add("lint-7", json!({"id": "something-else", "rule": "no-unused"}));
        assert_eq!(registry.get("lint-7").unwrap()["id"], "lint-7");

        registry.add("plain", json!("just a string"));
        assert_eq!(registry.get("plain").unwrap(), json!({"id": "plain", "value": "just a string"}));
    }

    #[test]
    fn test_clear_absent_is_noop() {
        let registry = IssueRegistry::new();
        let mut listener = registry.listen(&ALL, None);
        assert_eq!(registry.clear("missing"), None);
        assert!(listener.rx.try_recv().is_err());
    }

    #[test]
    fn test_list_in_insertion_order() {
        let registry = IssueRegistry::new();
        registry.add("b", json!({}));
        registry.add("a", json!({}));
        registry.add("c", json!({}));
        registry.add("b", json!({"again": true}));

        let keys: Vec<String> = registry.list().into_iter().map(|e| e.cursor).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_notifications_in_order() {
        let registry = IssueRegistry::new();
        let mut listener = registry.listen(&ALL, None);

        registry.add("x", json!({"v": 1}));
        registry.add("x", json!({"v": 2}));
        registry.clear("x");

        let changes: Vec<ChangeType> = std::iter::from_fn(|| listener.rx.try_recv().ok())
            .map(|n| n.change_type)
            .collect();
        assert_eq!(changes, vec![ChangeType::Added, ChangeType::Updated, ChangeType::Deleted]);
    }

    #[test]
    fn test_listener_filters_by_name() {
        let registry = IssueRegistry::new();
        let mut deletes = registry.listen(&[ChangeType::Deleted], None);

        registry.add("x", json!({"v": 1}));
        registry.clear("x");

        let notification = deletes.rx.try_recv().unwrap();
        assert_eq!(notification.change_type, ChangeType::Deleted);
        assert_eq!(notification.payload["v"], 1);
        assert!(deletes.rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_listener_is_pruned_on_emit() {
        let registry = IssueRegistry::new();
        let listener = registry.listen(&ALL, None);
        assert_eq!(registry.listener_count(), 1);
        drop(listener);
        registry.add("x", json!({}));
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_cancel_subscriber() {
        let registry = IssueRegistry::new();
        let _a = registry.listen(&ALL, Some(1));
        let _b = registry.listen(&ALL, Some(2));
        assert_eq!(registry.cancel_subscriber(1), 1);
        assert_eq!(registry.listener_count(), 1);

        let mut refused = registry.listen(&ALL, Some(1));
        assert_eq!(registry.listener_count(), 1);
        assert!(matches!(
            refused.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_release_subscriber_forgets_cancellation() {
        let registry = IssueRegistry::new();
        for subscriber in 0..100 {
            registry.cancel_subscriber(subscriber);
        }
        assert_eq!(registry.cancelled_subscribers(), 100);

        for subscriber in 0..100 {
            assert!(registry.release_subscriber(subscriber));
        }
        assert_eq!(registry.cancelled_subscribers(), 0);
        assert!(!registry.release_subscriber(3));

        // A released id may listen again
        let _listener = registry.listen(&ALL, Some(3));
        assert_eq!(registry.listener_count(), 1);
    }

    #[test]
    fn test_close_drops_listeners() {
        let registry = IssueRegistry::new();
        let mut listener = registry.listen(&ALL, None);
        registry.close();
        assert_eq!(registry.listener_count(), 0);
        assert!(matches!(
            listener.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        // Writes still land after close
        registry.add("late", json!({}));
        assert!(registry.contains("late"));
    }
}
