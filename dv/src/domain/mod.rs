//! Domain types for devfeed
//!
//! Events are what producers push; sources are the logical origins viewers
//! browse by; change types label everything a live subscriber receives.

mod change;
mod event;
mod source;

pub use change::ChangeType;
pub use event::{Event, EventKind};
pub use source::{SourceId, SourceInfo};
