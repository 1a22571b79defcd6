//! Aggregation over the buffer and the issues registry
//!
//! Viewers never touch the buffer directly. They ask the context for a
//! flattened timeline of one source (or all of them), track what they have
//! read, and subscribe to a single merged feed of buffer pushes and issue
//! changes.

mod context;
mod flatten;
mod sources;
mod subscription;
mod types;

pub use context::{AggregationContext, create_context};
pub use flatten::{flatten, unread_info};
pub use sources::SourceDirectory;
pub use subscription::Subscription;
pub use types::{Change, Item, Node, Page, PageInfo, QueryResult, ReadState, UnreadInfo};
