//! RingBuffer - bounded, cursor-addressable event log
//!
//! Every pushed item gets the next cursor. Reads for a cursor that has not
//! been pushed yet are parked as pending reads and resolved by the push that
//! reaches them. Pushes never wait on readers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

/// Position of an item in the buffer; assigned at push time, never reused
pub type Cursor = u64;

/// Identifies a consumer so its reads can be force-cancelled
pub type SubscriberId = u64;

/// Default buffer capacity (events)
pub const DEFAULT_CAPACITY: usize = 1000;

/// An item paired with the cursor it was pushed at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry<T> {
    pub cursor: Cursor,
    pub item: T,
}

struct Waiter<T> {
    cursor: Cursor,
    subscriber: Option<SubscriberId>,
    tx: oneshot::Sender<Entry<T>>,
}

struct Inner<T> {
    capacity: usize,
    items: VecDeque<T>,
    start_cursor: Cursor,
    pending: HashMap<u64, Waiter<T>>,
    next_read_id: u64,
    cancelled: HashSet<SubscriberId>,
    closed: bool,
}

impl<T: Clone> Inner<T> {
    fn end_cursor(&self) -> Cursor {
        self.start_cursor + self.items.len() as Cursor
    }

    /// Item at `cursor`, snapping evicted cursors forward to the oldest retained item
    fn entry_at(&self, cursor: Cursor) -> Option<Entry<T>> {
        if cursor >= self.end_cursor() {
            return None;
        }
        let cursor = cursor.max(self.start_cursor);
        let index = (cursor - self.start_cursor) as usize;
        self.items.get(index).map(|item| Entry {
            cursor,
            item: item.clone(),
        })
    }

    fn is_cancelled(&self, subscriber: Option<SubscriberId>) -> bool {
        self.closed || subscriber.is_some_and(|s| self.cancelled.contains(&s))
    }
}

/// Bounded append-only log with cursor-based blocking reads
///
/// Cloning yields another handle to the same buffer.
pub struct RingBuffer<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for RingBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> RingBuffer<T> {
    /// Create a buffer retaining at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, "RingBuffer::new: called");
        Self {
            inner: Arc::new(Mutex::new(Inner {
                capacity,
                items: VecDeque::with_capacity(capacity),
                start_cursor: 0,
                pending: HashMap::new(),
                next_read_id: 0,
                cancelled: HashSet::new(),
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item, evicting the oldest if over capacity
    ///
    /// Resolves every pending read this push satisfies before returning.
    pub fn push(&self, item: T) -> Cursor {
        let mut inner = self.lock();
        let cursor = inner.end_cursor();
        inner.items.push_back(item);
        if inner.items.len() > inner.capacity {
            inner.items.pop_front();
            inner.start_cursor += 1;
        }

        let ready: Vec<u64> = inner
            .pending
            .iter()
            .filter(|(_, waiter)| waiter.cursor <= cursor)
            .map(|(id, _)| *id)
            .collect();

        for id in &ready {
            let Some(waiter) = inner.pending.remove(id) else {
                continue;
            };
            if let Some(entry) = inner.entry_at(waiter.cursor) {
                // Receiver gone means the reader gave up; nothing to do
                let _ = waiter.tx.send(entry);
            }
        }

        debug!(cursor, resolved = ready.len(), "RingBuffer::push");
        cursor
    }

    /// Item at `cursor`, waiting for it to be pushed if necessary
    ///
    /// Returns `None` only if the read is cancelled.
    pub async fn get(&self, cursor: Cursor) -> Option<Entry<T>> {
        self.get_for(cursor, None).await
    }

    /// Like [`get`](Self::get), tagging the pending read with a subscriber
    pub async fn get_for(&self, cursor: Cursor, subscriber: Option<SubscriberId>) -> Option<Entry<T>> {
        let (read_id, rx) = {
            let mut inner = self.lock();
            if let Some(entry) = inner.entry_at(cursor) {
                return Some(entry);
            }
            if inner.is_cancelled(subscriber) {
                debug!(cursor, ?subscriber, "RingBuffer::get_for: cancelled, not waiting");
                return None;
            }
            let (tx, rx) = oneshot::channel();
            let read_id = inner.next_read_id;
            inner.next_read_id += 1;
            inner.pending.insert(
                read_id,
                Waiter {
                    cursor,
                    subscriber,
                    tx,
                },
            );
            debug!(cursor, read_id, ?subscriber, "RingBuffer::get_for: parked pending read");
            (read_id, rx)
        };

        let _guard = PendingRead {
            inner: Arc::clone(&self.inner),
            read_id,
        };
        rx.await.ok()
    }

    /// Cursor following `current`; stale or absent cursors snap to the oldest retained item
    pub fn next_cursor(&self, current: Option<Cursor>) -> Cursor {
        let inner = self.lock();
        match current {
            Some(cursor) if cursor >= inner.start_cursor => cursor + 1,
            _ => inner.start_cursor,
        }
    }

    /// Endless stream of entries after `cursor` (or from the oldest retained item)
    pub fn iter(&self, cursor: Option<Cursor>) -> BoxStream<'static, Entry<T>> {
        self.iter_for(cursor, None)
    }

    /// Like [`iter`](Self::iter), with reads tagged for `subscriber`
    ///
    /// The stream ends only when its reads are cancelled.
    pub fn iter_for(&self, cursor: Option<Cursor>, subscriber: Option<SubscriberId>) -> BoxStream<'static, Entry<T>> {
        debug!(?cursor, ?subscriber, "RingBuffer::iter_for: called");
        stream::unfold((self.clone(), cursor), move |(buffer, current)| async move {
            let next = buffer.next_cursor(current);
            let entry = buffer.get_for(next, subscriber).await?;
            let cursor = entry.cursor;
            Some((entry, (buffer, Some(cursor))))
        })
        .boxed()
    }

    /// Snapshot of retained items, oldest first
    pub fn all(&self) -> Vec<T> {
        self.lock().items.iter().cloned().collect()
    }

    /// Snapshot of retained items with their cursors, oldest first
    pub fn all_with_cursor(&self) -> Vec<Entry<T>> {
        let inner = self.lock();
        inner
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| Entry {
                cursor: inner.start_cursor + i as Cursor,
                item: item.clone(),
            })
            .collect()
    }

    /// Cancel every pending and future read tagged with `subscriber`
    ///
    /// The subscriber stays refused until [`release_subscriber`](Self::release_subscriber).
    pub fn cancel_subscriber(&self, subscriber: SubscriberId) -> usize {
        let mut inner = self.lock();
        inner.cancelled.insert(subscriber);
        let before = inner.pending.len();
        inner.pending.retain(|_, waiter| waiter.subscriber != Some(subscriber));
        let cancelled = before - inner.pending.len();
        debug!(subscriber, cancelled, "RingBuffer::cancel_subscriber");
        cancelled
    }

    /// Forget a cancelled subscriber once none of its reads can run again
    pub fn release_subscriber(&self, subscriber: SubscriberId) -> bool {
        let released = self.lock().cancelled.remove(&subscriber);
        debug!(subscriber, released, "RingBuffer::release_subscriber");
        released
    }

    /// Cancelled subscribers not yet released
    pub fn cancelled_subscribers(&self) -> usize {
        self.lock().cancelled.len()
    }

    /// Tear down: cancel all pending reads; later reads that would wait return `None`
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        let cancelled = inner.pending.len();
        inner.pending.clear();
        debug!(cancelled, "RingBuffer::close");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn start_cursor(&self) -> Cursor {
        self.lock().start_cursor
    }

    pub fn end_cursor(&self) -> Cursor {
        self.lock().end_cursor()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Number of reads currently parked
    pub fn pending_reads(&self) -> usize {
        self.lock().pending.len()
    }
}

impl<T: Clone + Send + 'static> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Removes a parked read when its future is dropped before resolution
struct PendingRead<T> {
    inner: Arc<Mutex<Inner<T>>>,
    read_id: u64,
}

impl<T> Drop for PendingRead<T> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.pending.remove(&self.read_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn filled(capacity: usize, count: u32) -> RingBuffer<u32> {
        let buffer = RingBuffer::new(capacity);
        for i in 0..count {
            buffer.push(i);
        }
        buffer
    }

    #[test]
    fn test_push_assigns_increasing_cursors() {
        let buffer = RingBuffer::new(4);
        assert_eq!(buffer.push("a"), 0);
        assert_eq!(buffer.push("b"), 1);
        assert_eq!(buffer.push("c"), 2);
        assert_eq!(buffer.end_cursor(), 3);
        assert_eq!(buffer.start_cursor(), 0);
    }

    #[test]
    fn test_capacity_eviction() {
        let buffer = filled(10, 15);
        assert_eq!(buffer.all(), (5..15).collect::<Vec<_>>());
        assert_eq!(buffer.start_cursor(), 5);
        assert_eq!(buffer.end_cursor(), 15);

        let with_cursor = buffer.all_with_cursor();
        assert_eq!(with_cursor.first().map(|e| e.cursor), Some(5));
        assert_eq!(with_cursor.last().map(|e| (e.cursor, e.item)), Some((14, 14)));
    }

    #[tokio::test]
    async fn test_get_evicted_cursor_returns_oldest() {
        let buffer = filled(10, 15);
        let entry = buffer.get(2).await.unwrap();
        assert_eq!(entry.cursor, 5);
        assert_eq!(entry.item, 5);
    }

    #[tokio::test]
    async fn test_get_is_idempotent() {
        let buffer = filled(8, 5);
        let first = buffer.get(3).await.unwrap();
        let second = buffer.get(3).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.item, 3);
    }

    #[tokio::test]
    async fn test_push_resolves_all_waiters() {
        let buffer: RingBuffer<&str> = RingBuffer::new(8);
        let a = tokio::spawn({
            let buffer = buffer.clone();
            async move { buffer.get(0).await }
        });
        let b = tokio::spawn({
            let buffer = buffer.clone();
            async move { buffer.get(0).await }
        });

        while buffer.pending_reads() < 2 {
            tokio::task::yield_now().await;
        }
        buffer.push("first");

        let a = timeout(Duration::from_secs(1), a).await.unwrap().unwrap().unwrap();
        let b = timeout(Duration::from_secs(1), b).await.unwrap().unwrap().unwrap();
        assert_eq!(a.item, "first");
        assert_eq!(b.item, "first");
        assert_eq!(buffer.pending_reads(), 0);
    }

    #[tokio::test]
    async fn test_waiter_for_later_cursor_stays_pending() {
        let buffer: RingBuffer<u32> = RingBuffer::new(8);
        let waiter = tokio::spawn({
            let buffer = buffer.clone();
            async move { buffer.get(2).await }
        });
        while buffer.pending_reads() < 1 {
            tokio::task::yield_now().await;
        }

        buffer.push(10);
        buffer.push(11);
        assert_eq!(buffer.pending_reads(), 1);

        buffer.push(12);
        let entry = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap().unwrap();
        assert_eq!(entry, Entry { cursor: 2, item: 12 });
    }

    #[tokio::test]
    async fn test_dropped_read_is_unregistered() {
        let buffer: RingBuffer<u32> = RingBuffer::new(4);
        let result = timeout(Duration::from_millis(20), buffer.get(0)).await;
        assert!(result.is_err());
        assert_eq!(buffer.pending_reads(), 0);
    }

    #[tokio::test]
    async fn test_cancel_subscriber_resolves_with_none() {
        let buffer: RingBuffer<u32> = RingBuffer::new(4);
        let waiter = tokio::spawn({
            let buffer = buffer.clone();
            async move { buffer.get_for(0, Some(7)).await }
        });
        let other = tokio::spawn({
            let buffer = buffer.clone();
            async move { buffer.get_for(0, Some(8)).await }
        });
        while buffer.pending_reads() < 2 {
            tokio::task::yield_now().await;
        }

        assert_eq!(buffer.cancel_subscriber(7), 1);
        assert_eq!(timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap(), None);

        // Future reads by a cancelled subscriber do not park
        assert_eq!(buffer.get_for(5, Some(7)).await, None);
        assert_eq!(buffer.cancelled_subscribers(), 1);

        buffer.push(1);
        let entry = timeout(Duration::from_secs(1), other).await.unwrap().unwrap();
        assert_eq!(entry.map(|e| e.item), Some(1));
    }

    #[tokio::test]
    async fn test_release_subscriber_clears_cancellation() {
        let buffer: RingBuffer<u32> = RingBuffer::new(4);
        for subscriber in 0..10_000 {
            buffer.cancel_subscriber(subscriber);
        }
        assert_eq!(buffer.cancelled_subscribers(), 10_000);

        for subscriber in 0..10_000 {
            assert!(buffer.release_subscriber(subscriber));
        }
        assert_eq!(buffer.cancelled_subscribers(), 0);
        assert!(!buffer.release_subscriber(7));

        // Released ids read normally again
        buffer.push(9);
        assert_eq!(buffer.get_for(0, Some(7)).await.map(|e| e.item), Some(9));
    }

    #[tokio::test]
    async fn test_close_cancels_pending_reads() {
        let buffer: RingBuffer<u32> = RingBuffer::new(4);
        let waiter = tokio::spawn({
            let buffer = buffer.clone();
            async move { buffer.get(0).await }
        });
        while buffer.pending_reads() < 1 {
            tokio::task::yield_now().await;
        }

        buffer.close();
        assert!(buffer.is_closed());
        assert_eq!(timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap(), None);

        // Retained items stay readable after close
        buffer.push(3);
        assert_eq!(buffer.get(0).await.map(|e| e.item), Some(3));
        assert_eq!(buffer.get(1).await, None);
    }

    #[test]
    fn test_next_cursor_snaps_forward() {
        let buffer = filled(5, 12);
        assert_eq!(buffer.start_cursor(), 7);
        assert_eq!(buffer.next_cursor(None), 7);
        assert_eq!(buffer.next_cursor(Some(2)), 7);
        assert_eq!(buffer.next_cursor(Some(8)), 9);
        assert_eq!(buffer.next_cursor(Some(20)), 21);
    }

    #[tokio::test]
    async fn test_iter_replays_then_follows() {
        let buffer = filled(16, 3);
        let mut iter = buffer.iter(None);

        for expected in 0..3 {
            let entry = iter.next().await.unwrap();
            assert_eq!(entry.cursor, expected as Cursor);
            assert_eq!(entry.item, expected);
        }

        let producer = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.push(3);
            producer.push(4);
        });

        let live: Vec<u32> = timeout(Duration::from_secs(1), iter.by_ref().take(2).map(|e| e.item).collect())
            .await
            .unwrap();
        assert_eq!(live, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_iter_after_cursor() {
        let buffer = filled(16, 5);
        let mut iter = buffer.iter(Some(2));
        assert_eq!(iter.next().await.map(|e| e.cursor), Some(3));
        assert_eq!(iter.next().await.map(|e| e.cursor), Some(4));
    }

    #[tokio::test]
    async fn test_iter_ends_on_subscriber_cancel() {
        let buffer: RingBuffer<u32> = RingBuffer::new(4);
        let mut iter = buffer.iter_for(None, Some(1));
        let reader = tokio::spawn(async move { iter.next().await });
        while buffer.pending_reads() < 1 {
            tokio::task::yield_now().await;
        }
        buffer.cancel_subscriber(1);
        assert_eq!(timeout(Duration::from_secs(1), reader).await.unwrap().unwrap(), None);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = RingBuffer::new(0);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.all(), vec![2]);
    }

    proptest! {
        #[test]
        fn prop_window_invariant(capacity in 1usize..32, pushes in 0u32..200) {
            let buffer = RingBuffer::new(capacity);
            for i in 0..pushes {
                let cursor = buffer.push(i);
                prop_assert_eq!(cursor, i as Cursor);
                prop_assert_eq!(
                    (buffer.end_cursor() - buffer.start_cursor()) as usize,
                    buffer.len()
                );
                prop_assert!(buffer.len() <= capacity);
            }
            let expected_len = (pushes as usize).min(capacity);
            prop_assert_eq!(buffer.len(), expected_len);
            let items = buffer.all();
            prop_assert!(items.windows(2).all(|w| w[0] + 1 == w[1]));
        }
    }
}
