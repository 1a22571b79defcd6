//! devfeed - live event aggregation for development dashboards
//!
//! Producers (a bundler, a device log tail, a type checker) push events into
//! a bounded ring buffer. Viewers query deduplicated per-source timelines with
//! unread counts, or subscribe to one merged live feed that resumes from the
//! last cursor they saw. Current issues live in a keyed registry beside the
//! buffer and stream their own ADDED/UPDATED/DELETED changes.
//!
//! # Modules
//!
//! - [`buffer`] - Bounded cursor-addressable log with blocking reads
//! - [`issues`] - Keyed issue registry and its change stream
//! - [`merge`] - Round-robin fan-in of async streams
//! - [`aggregate`] - Queries, read tracking and subscriptions
//! - [`ipc`] - Unix socket protocol between the daemon and clients
//! - [`server`] - Daemon accept loop
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod aggregate;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod ipc;
pub mod issues;
pub mod merge;
pub mod server;

pub use aggregate::{AggregationContext, Change, Item, Node, Page, QueryResult, Subscription, create_context};
pub use buffer::{Cursor, Entry, RingBuffer, SubscriberId};
pub use config::Config;
pub use domain::{ChangeType, Event, EventKind, SourceId, SourceInfo};
pub use error::{FeedError, FeedResult};
pub use issues::{ChangeSource, ChangeStream, IssueRegistry};
pub use merge::{FanIn, fan_in};
