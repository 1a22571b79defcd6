//! Current-issues registry and its change stream
//!
//! Issues are deduplicated by id rather than ordered by time, so they live
//! beside the ring buffer instead of in it.

mod registry;
mod stream;

pub use registry::{IssueEntry, IssueRegistry};
pub use stream::{ChangeSource, ChangeStream, Listener, ListenerId, Notification};
