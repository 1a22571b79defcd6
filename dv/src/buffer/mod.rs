//! Bounded event log
//!
//! The buffer is the backbone of replay: every event a producer pushes is
//! given a cursor, and viewers resume from the last cursor they saw.

mod ring;

pub use ring::{Cursor, DEFAULT_CAPACITY, Entry, RingBuffer, SubscriberId};
