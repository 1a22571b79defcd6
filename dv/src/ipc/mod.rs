//! Inter-Process Communication between the daemon and its clients
//!
//! Producers and viewers talk to `dv serve` over a Unix Domain Socket. Each
//! request is one line of JSON answered by one response line, except
//! `Subscribe`, which keeps the connection open and streams feed changes.

use std::path::PathBuf;

pub mod client;
pub mod listener;
pub mod messages;

pub use client::DaemonClient;
pub use messages::{Request, Response};

/// Maximum size of one protocol line; query results carry whole timelines
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Get the socket path for daemon IPC
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("devfeed")
        .join("daemon.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_ends_with_daemon_sock() {
        let path = get_socket_path();
        assert!(path.ends_with("devfeed/daemon.sock"));
    }
}
