//! Subscription - one viewer's live feed

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tracing::debug;

use super::context::SubscriberRelease;
use super::types::Change;
use crate::buffer::SubscriberId;
use crate::merge::FanIn;

/// Live feed of buffer pushes and issue changes for one subscriber
///
/// Dropping or closing the subscription releases its pending reads and
/// listeners and deregisters it from the context. The transport can also
/// force the feed to end with
/// [`AggregationContext::cancel_subscriber`](super::AggregationContext::cancel_subscriber).
pub struct Subscription {
    id: SubscriberId,
    feed: FanIn<Change>,
    release: Option<SubscriberRelease>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriberId, feed: FanIn<Change>, release: SubscriberRelease) -> Self {
        Self {
            id,
            feed,
            release: Some(release),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn close(&mut self) {
        debug!(subscriber = self.id, "Subscription::close");
        self.feed.close();
        // Inputs are gone, so no read can park under this id again
        if let Some(release) = self.release.take() {
            release.release();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.feed.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl Stream for Subscription {
    type Item = Change;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Change>> {
        Pin::new(&mut self.get_mut().feed).poll_next(cx)
    }
}
