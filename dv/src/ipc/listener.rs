//! IPC listener for the daemon side
//!
//! Provides helpers for creating and managing the Unix Domain Socket listener
//! and for reading and writing protocol lines on a connection.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tracing::{debug, warn};

use super::MAX_MESSAGE_SIZE;
use super::messages::{Request, Response};

/// Create and bind a Unix Domain Socket listener for the daemon
///
/// Handles cleanup of stale socket files from previous runs.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener: creating IPC socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind IPC socket")?;
    debug!(?socket_path, "create_listener: socket bound successfully");

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Read one line of at most `limit` bytes into `line`
///
/// Never buffers more than `limit + 1` bytes; a longer line is an error and
/// leaves the reader mid-line. Returns 0 at end of stream.
pub async fn read_line_limited<R>(reader: &mut R, line: &mut String, limit: usize) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let bytes_read = (&mut *reader)
        .take(limit as u64 + 1)
        .read_line(line)
        .await
        .context("Failed to read IPC message")?;

    if bytes_read > limit {
        return Err(eyre::eyre!("Message too large: more than {} bytes", limit));
    }

    Ok(bytes_read)
}

/// Read the next request line; `None` when the peer closed the connection
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if read_line_limited(reader, &mut line, MAX_MESSAGE_SIZE).await? == 0 {
        return Ok(None);
    }

    let msg: Request = serde_json::from_str(line.trim()).context("Failed to parse IPC message")?;
    debug!(?msg, "read_request: parsed message");

    Ok(Some(msg))
}

/// Send a response line on the stream
pub async fn send_response<W>(writer: &mut W, response: &Response) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response_json = serde_json::to_string(response).context("Failed to serialize response")?;
    writer
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write response")?;
    writer.write_all(b"\n").await.context("Failed to write newline")?;
    writer.flush().await.context("Failed to flush response")?;
    debug!(?response, "send_response: sent response");
    Ok(())
}
