//! IPC client for communicating with the daemon
//!
//! Provides a simple interface for producers and the CLI to send requests to
//! the daemon via Unix Domain Socket.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::listener::read_line_limited;
use super::messages::{Request, Response};
use super::{MAX_MESSAGE_SIZE, get_socket_path};
use crate::aggregate::{Change, Page, QueryResult};
use crate::buffer::{Cursor, SubscriberId};
use crate::domain::{Event, SourceId, SourceInfo};

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

fn unexpected(response: Response) -> eyre::Error {
    match response {
        Response::Error { message } => eyre::eyre!("Daemon error: {}", message),
        other => eyre::eyre!("Unexpected response: {:?}", other),
    }
}

/// Open subscription: the live feed and the id the daemon assigned
pub struct FeedSubscription {
    pub subscriber: SubscriberId,
    pub changes: BoxStream<'static, Result<Change>>,
}

/// Client for communicating with the daemon via IPC
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonClient {
    /// Create a new client with the default socket path
    pub fn new() -> Self {
        Self {
            socket_path: get_socket_path(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Create a client with a custom socket path
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the daemon socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Push an event, returning the cursor it landed at
    pub async fn push(&self, event: Event) -> Result<Cursor> {
        debug!(id = %event.id, source = %event.source, "DaemonClient: pushing event");
        match self.send_message(Request::Push { event }).await? {
            Response::Pushed { cursor } => Ok(cursor),
            other => Err(unexpected(other)),
        }
    }

    pub async fn add_issue(&self, id: &str, payload: Value) -> Result<()> {
        debug!(%id, "DaemonClient: adding issue");
        let msg = Request::AddIssue {
            id: id.to_string(),
            payload,
        };
        match self.send_message(msg).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn clear_issue(&self, id: &str) -> Result<()> {
        debug!(%id, "DaemonClient: clearing issue");
        match self.send_message(Request::ClearIssue { id: id.to_string() }).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Query a source's timeline, or all sources when `source` is `None`
    pub async fn query(&self, source: Option<&SourceId>, page: Page) -> Result<QueryResult> {
        debug!(?source, ?page, "DaemonClient: querying");
        let msg = Request::Query {
            source: source.map(ToString::to_string),
            after: page.after,
            first: page.first,
        };
        match self.send_message(msg).await? {
            Response::Query { result } => Ok(result),
            other => Err(unexpected(other)),
        }
    }

    /// Mark a source read up to `cursor` (or its newest item)
    pub async fn mark_read(&self, source: Option<&SourceId>, cursor: Option<String>) -> Result<Option<String>> {
        debug!(?source, ?cursor, "DaemonClient: marking read");
        let msg = Request::MarkRead {
            source: source.map(ToString::to_string),
            cursor,
        };
        match self.send_message(msg).await? {
            Response::MarkedRead { cursor } => Ok(cursor),
            other => Err(unexpected(other)),
        }
    }

    pub async fn sources(&self) -> Result<Vec<SourceInfo>> {
        debug!("DaemonClient: listing sources");
        match self.send_message(Request::ListSources).await? {
            Response::Sources { sources } => Ok(sources),
            other => Err(unexpected(other)),
        }
    }

    /// Open a live feed after `cursor`
    ///
    /// The connection stays open for as long as the returned stream lives;
    /// dropping it makes the daemon cancel the subscriber.
    pub async fn subscribe(&self, cursor: Option<Cursor>) -> Result<FeedSubscription> {
        debug!(?cursor, "DaemonClient: subscribing");
        let mut stream = self.connect().await?;
        self.write_request(&mut stream, &Request::Subscribe { cursor }).await?;

        let mut reader = BufReader::new(stream);
        let subscriber = match self.read_response(&mut reader).await? {
            Response::Subscribed { subscriber } => subscriber,
            other => return Err(unexpected(other)),
        };
        debug!(subscriber, "DaemonClient: subscribed");

        let changes = stream::unfold(reader, |mut reader| async move {
            let mut line = String::new();
            let item = match read_line_limited(&mut reader, &mut line, MAX_MESSAGE_SIZE).await {
                Ok(0) => return None,
                Ok(_) => match serde_json::from_str::<Response>(line.trim()) {
                    Ok(Response::Change { change }) => Ok(change),
                    Ok(other) => Err(unexpected(other)),
                    Err(e) => Err(eyre::Error::new(e).wrap_err("Failed to parse feed change")),
                },
                Err(e) => Err(e.wrap_err("Failed to read feed change")),
            };
            Some((item, reader))
        })
        .boxed();

        Ok(FeedSubscription { subscriber, changes })
    }

    /// Check if daemon is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("DaemonClient: pinging daemon");
        match self.send_message(Request::Ping).await? {
            Response::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    /// Request daemon to shutdown gracefully
    pub async fn shutdown(&self) -> Result<()> {
        debug!("DaemonClient: requesting daemon shutdown");
        match self.send_message(Request::Shutdown).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn connect(&self) -> Result<UnixStream> {
        tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to daemon socket")
    }

    /// Send a request to the daemon and wait for its response
    async fn send_message(&self, msg: Request) -> Result<Response> {
        debug!(?self.socket_path, ?msg, "DaemonClient: sending message");

        let mut stream = self.connect().await?;
        self.write_request(&mut stream, &msg).await?;

        let mut reader = BufReader::new(stream);
        self.read_response(&mut reader).await
    }

    async fn write_request(&self, stream: &mut UnixStream, msg: &Request) -> Result<()> {
        let msg_json = serde_json::to_string(msg).context("Failed to serialize message")?;

        if msg_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Message too large: {} bytes", msg_json.len()));
        }

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")?
    }

    async fn read_response(&self, reader: &mut BufReader<UnixStream>) -> Result<Response> {
        let mut response_line = String::new();

        tokio::time::timeout(self.timeout, async {
            let bytes_read = read_line_limited(reader, &mut response_line, MAX_MESSAGE_SIZE)
                .await
                .context("Failed to read response")?;

            if bytes_read == 0 {
                return Err(eyre::eyre!("Daemon closed the connection"));
            }

            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Read timeout")??;

        let response: Response =
            serde_json::from_str(response_line.trim()).context("Failed to parse daemon response")?;

        debug!(?response, "DaemonClient: received response");
        Ok(response)
    }
}
