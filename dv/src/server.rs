//! Daemon side of `dv serve`
//!
//! One server owns one aggregation context. Every accepted connection gets
//! its own task; one-shot requests are answered line by line, while a
//! `Subscribe` request turns the connection into a feed that lives until the
//! peer hangs up or the daemon stops.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::Result;
use futures::StreamExt;
use tokio::io::BufReader;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::aggregate::{AggregationContext, Page};
use crate::buffer::Cursor;
use crate::domain::SourceId;
use crate::error::FeedResult;
use crate::ipc::MAX_MESSAGE_SIZE;
use crate::ipc::listener::{cleanup_socket, create_listener_at, read_line_limited, read_request, send_response};
use crate::ipc::{Request, Response};

/// Version reported in `Pong`
pub const VERSION: &str = env!("GIT_DESCRIBE");

fn parse_source(source: Option<&str>) -> FeedResult<Option<SourceId>> {
    source.map(str::parse).transpose()
}

/// Answer a one-shot request against the context
pub fn respond(context: &AggregationContext, request: Request) -> Response {
    debug!(?request, "respond: called");
    let result = match request {
        Request::Push { event } => context.push(event).map(|cursor| Response::Pushed { cursor }),
        Request::AddIssue { id, payload } => context.add_issue(&id, payload).map(|_| Response::Ok),
        Request::ClearIssue { id } => {
            context.clear_issue(&id);
            Ok(Response::Ok)
        }
        Request::Query { source, after, first } => parse_source(source.as_deref()).and_then(|source| {
            let page = Page { after, first };
            context
                .query_page(source.as_ref(), &page)
                .map(|result| Response::Query { result })
        }),
        Request::MarkRead { source, cursor } => parse_source(source.as_deref()).and_then(|source| {
            context
                .mark_read(source.as_ref(), cursor)
                .map(|cursor| Response::MarkedRead { cursor })
        }),
        Request::ListSources => Ok(Response::Sources {
            sources: context.list_sources(),
        }),
        Request::Ping => Ok(Response::Pong {
            version: VERSION.to_string(),
        }),
        Request::Subscribe { .. } | Request::Shutdown => Ok(Response::Error {
            message: "request must be handled by the connection".to_string(),
        }),
    };

    result.unwrap_or_else(|e| Response::Error { message: e.to_string() })
}

/// Unix socket server around one aggregation context
pub struct Server {
    context: Arc<AggregationContext>,
    listener: UnixListener,
    socket_path: PathBuf,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Server {
    /// Bind the daemon socket, replacing a stale one
    pub fn bind(context: Arc<AggregationContext>, socket_path: &Path) -> Result<Self> {
        let (listener, socket_path) = create_listener_at(socket_path)?;
        info!(?socket_path, "IPC socket listening");
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        Ok(Self {
            context,
            listener,
            socket_path,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn context(&self) -> &Arc<AggregationContext> {
        &self.context
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Sender that stops the accept loop, for signal handlers
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Accept connections until a shutdown is requested
    ///
    /// On the way out the context is shut down, ending every open feed, and
    /// the socket file is removed.
    pub async fn run(self) -> Result<()> {
        let Self {
            context,
            listener,
            socket_path,
            shutdown_tx,
            mut shutdown_rx,
        } = self;
        info!("Server running");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        debug!("run: accepted connection");
                        let context = Arc::clone(&context);
                        let shutdown_tx = shutdown_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(context, stream, shutdown_tx).await {
                                warn!(error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept IPC connection"),
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        context.shutdown();
        cleanup_socket(&socket_path);
        info!("Server stopped");
        Ok(())
    }
}

async fn handle_connection(
    context: Arc<AggregationContext>,
    stream: UnixStream,
    shutdown_tx: mpsc::Sender<()>,
) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    loop {
        let request = match read_request(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("handle_connection: peer closed");
                return Ok(());
            }
            Err(e) => {
                let message = format!("{:#}", e);
                send_response(&mut write, &Response::Error { message }).await?;
                return Err(e);
            }
        };

        match request {
            Request::Subscribe { cursor } => return stream_feed(&context, cursor, reader, write).await,
            Request::Shutdown => {
                debug!("handle_connection: Shutdown");
                send_response(&mut write, &Response::Ok).await?;
                // A full channel means shutdown is already underway
                let _ = shutdown_tx.try_send(());
                return Ok(());
            }
            request => {
                let response = respond(&context, request);
                send_response(&mut write, &response).await?;
            }
        }
    }
}

/// Stream feed changes to the peer until it disconnects or the feed ends
async fn stream_feed(
    context: &AggregationContext,
    cursor: Option<Cursor>,
    mut reader: BufReader<OwnedReadHalf>,
    mut write: OwnedWriteHalf,
) -> Result<()> {
    let mut subscription = context.subscribe(cursor);
    let subscriber = subscription.id();

    let result = match send_response(&mut write, &Response::Subscribed { subscriber }).await {
        Err(e) => Err(e),
        Ok(()) => {
            let mut discard = String::new();
            loop {
                tokio::select! {
                    change = subscription.next() => match change {
                        Some(change) => {
                            if let Err(e) = send_response(&mut write, &Response::Change { change }).await {
                                break Err(e);
                            }
                        }
                        None => {
                            debug!(subscriber, "stream_feed: feed ended");
                            break Ok(());
                        }
                    },
                    read = read_line_limited(&mut reader, &mut discard, MAX_MESSAGE_SIZE) => match read {
                        Ok(0) | Err(_) => {
                            debug!(subscriber, "stream_feed: peer disconnected");
                            break Ok(());
                        }
                        Ok(_) => discard.clear(),
                    },
                }
            }
        }
    };

    context.cancel_subscriber(subscriber);
    result
}
