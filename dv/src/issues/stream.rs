//! ChangeStream - named notifications as a pull-based stream
//!
//! A [`ChangeSource`] pushes notifications into a per-listener queue; the
//! stream drains that queue in arrival order and waits when it is empty.
//! Closing (or dropping) the stream unregisters the listener.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::buffer::SubscriberId;
use crate::domain::ChangeType;

/// Handle for a registered listener
pub type ListenerId = u64;

/// One change as delivered to a listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification<P> {
    pub change_type: ChangeType,
    pub payload: P,
}

/// Receiving half of a registration
pub struct Listener<P> {
    pub id: ListenerId,
    pub rx: mpsc::UnboundedReceiver<Notification<P>>,
}

/// Something that announces named changes to registered listeners
pub trait ChangeSource: Send + Sync {
    type Payload: Clone + Send + 'static;

    /// Register for notifications of the given change types
    ///
    /// A source that refuses the registration returns a listener whose queue
    /// is already disconnected.
    fn listen(&self, names: &[ChangeType], subscriber: Option<SubscriberId>) -> Listener<Self::Payload>;

    /// Remove a registration; unknown ids are ignored
    fn unlisten(&self, id: ListenerId);
}

/// Lazy stream of notifications from a [`ChangeSource`]
pub struct ChangeStream<S: ChangeSource> {
    source: S,
    listener: Option<ListenerId>,
    rx: mpsc::UnboundedReceiver<Notification<S::Payload>>,
}

impl<S: ChangeSource> ChangeStream<S> {
    /// Listen for `names` on `source`
    pub fn new(source: S, names: &[ChangeType], subscriber: Option<SubscriberId>) -> Self {
        let Listener { id, rx } = source.listen(names, subscriber);
        debug!(listener = id, ?names, ?subscriber, "ChangeStream::new: listening");
        Self {
            source,
            listener: Some(id),
            rx,
        }
    }

    /// Listen for ADDED, UPDATED and DELETED
    pub fn all_changes(source: S, subscriber: Option<SubscriberId>) -> Self {
        Self::new(
            source,
            &[ChangeType::Added, ChangeType::Updated, ChangeType::Deleted],
            subscriber,
        )
    }

    /// Unregister and finish; queued notifications are discarded
    pub fn close(&mut self) {
        if let Some(id) = self.listener.take() {
            debug!(listener = id, "ChangeStream::close");
            self.source.unlisten(id);
        }
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_none()
    }
}

impl<S: ChangeSource + Unpin> Stream for ChangeStream<S> {
    type Item = Notification<S::Payload>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.listener.is_none() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl<S: ChangeSource> Drop for ChangeStream<S> {
    fn drop(&mut self) {
        self.close();
    }
}
