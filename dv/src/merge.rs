//! FanIn - merge several streams into one
//!
//! Items from one input keep their relative order; items from different
//! inputs are surfaced in whatever order they become ready. Inputs are polled
//! starting after the one that last produced an item, so a chatty input
//! cannot starve a quiet one.
//!
//! An input that finishes is dropped and the merge carries on with the rest.
//! The merged stream finishes once every input has finished or it is closed.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::stream::{BoxStream, StreamExt};
use tracing::debug;

/// Merged view over several boxed streams
pub struct FanIn<T> {
    inputs: Vec<Option<BoxStream<'static, T>>>,
    next: usize,
}

impl<T> FanIn<T> {
    pub fn new(inputs: Vec<BoxStream<'static, T>>) -> Self {
        debug!(inputs = inputs.len(), "FanIn::new: called");
        Self {
            inputs: inputs.into_iter().map(Some).collect(),
            next: 0,
        }
    }

    /// Inputs that have not finished
    pub fn live_inputs(&self) -> usize {
        self.inputs.iter().filter(|input| input.is_some()).count()
    }

    /// Drop every input, running whatever cleanup each one has
    pub fn close(&mut self) {
        let closed = self.live_inputs();
        self.inputs.clear();
        debug!(closed, "FanIn::close");
    }

    pub fn is_closed(&self) -> bool {
        self.live_inputs() == 0
    }
}

impl<T> Stream for FanIn<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        let count = this.inputs.len();

        for offset in 0..count {
            let index = (this.next + offset) % count;
            let Some(input) = this.inputs[index].as_mut() else {
                continue;
            };
            match input.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => {
                    this.next = (index + 1) % count;
                    return Poll::Ready(Some(item));
                }
                Poll::Ready(None) => {
                    debug!(index, "FanIn::poll_next: input finished, dropping");
                    this.inputs[index] = None;
                }
                Poll::Pending => {}
            }
        }

        if this.is_closed() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

/// Merge `inputs` into one stream
pub fn fan_in<T>(inputs: Vec<BoxStream<'static, T>>) -> FanIn<T> {
    FanIn::new(inputs)
}
