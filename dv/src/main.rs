use std::fs;
use std::path::PathBuf;

use clap::Parser;
use eyre::{Context, Result};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use devfeed::aggregate::{Page, create_context};
use devfeed::cli::{self, Cli, Command, OutputFormat};
use devfeed::config::Config;
use devfeed::domain::{Event, SourceId};
use devfeed::ipc::DaemonClient;
use devfeed::server::Server;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = cli::get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn parse_source(source: &str) -> Result<SourceId> {
    source.parse().context(format!("Invalid source '{}'", source))
}

fn parse_payload(payload: &str) -> Result<serde_json::Value> {
    serde_json::from_str(payload).context("Payload must be valid JSON")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;

    let socket_path = cli.socket.clone().unwrap_or_else(|| config.socket_path());
    let client = DaemonClient::with_socket_path(socket_path.clone());

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { capacity } => cmd_serve(&config, socket_path, capacity).await,
        Command::Push {
            source,
            id,
            kind,
            name,
            issue,
            clear_issue,
            payload,
        } => {
            let kind = cli::parse_kind(&kind).map_err(|e| eyre::eyre!(e))?;
            let mut event = Event::new(parse_source(&source)?, id, parse_payload(&payload)?).with_kind(kind);
            if let Some(name) = name {
                event = event.with_source_name(name);
            }
            if let Some(issue) = issue {
                event = if clear_issue {
                    event.clearing_issue(issue)
                } else {
                    event.with_issue(issue)
                };
            }
            let cursor = client.push(event).await?;
            println!("{}", cursor);
            Ok(())
        }
        Command::Issue { id, payload } => client.add_issue(&id, parse_payload(&payload)?).await,
        Command::ClearIssue { id } => client.clear_issue(&id).await,
        Command::Query {
            source,
            after,
            first,
            format,
        } => {
            let source = source.as_deref().map(parse_source).transpose()?;
            let result = client.query(source.as_ref(), Page { after, first }).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                OutputFormat::Text => print!("{}", cli::format_query(&result)),
            }
            Ok(())
        }
        Command::Tail { cursor, format } => cmd_tail(&client, cursor, format).await,
        Command::Sources { format } => {
            let sources = client.sources().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&sources)?),
                OutputFormat::Text => {
                    for source in &sources {
                        println!("{}", cli::format_source(source));
                    }
                }
            }
            Ok(())
        }
        Command::MarkRead { source, cursor } => {
            let source = source.as_deref().map(parse_source).transpose()?;
            match client.mark_read(source.as_ref(), cursor).await? {
                Some(cursor) => println!("Marked read at {}", cursor),
                None => println!("Nothing to mark"),
            }
            Ok(())
        }
        Command::Pipe { source, name } => cmd_pipe(&client, parse_source(&source)?, name).await,
        Command::Ping => {
            let version = client.ping().await?;
            println!("devfeed daemon is alive (version {})", version);
            Ok(())
        }
        Command::Stop => {
            client.shutdown().await?;
            println!("devfeed daemon stopping");
            Ok(())
        }
    }
}

/// Run the daemon until SIGINT, SIGTERM or a Shutdown request
async fn cmd_serve(config: &Config, socket_path: PathBuf, capacity: Option<usize>) -> Result<()> {
    let capacity = capacity.unwrap_or(config.buffer.capacity);
    debug!(?socket_path, capacity, "cmd_serve: called");

    let context = create_context(capacity);
    let server = Server::bind(context, &socket_path)?;
    let shutdown_tx = server.shutdown_handle();
    println!("devfeed listening on {}", socket_path.display());

    let server_handle = tokio::spawn(server.run());

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => warn!("SIGINT received"),
            _ = sigterm.recv() => warn!("SIGTERM received"),
            _ = shutdown_tx.closed() => debug!("cmd_serve: server stopped on its own"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Ctrl+C received"),
            _ = shutdown_tx.closed() => debug!("cmd_serve: server stopped on its own"),
        }
    }

    // Already stopping if the channel is full or closed
    let _ = shutdown_tx.try_send(());
    server_handle.await.context("Server task panicked")??;
    info!("Daemon shut down");
    Ok(())
}

async fn cmd_tail(client: &DaemonClient, cursor: Option<u64>, format: OutputFormat) -> Result<()> {
    debug!(?cursor, ?format, "cmd_tail: called");
    let mut feed = client.subscribe(cursor).await?;
    info!(subscriber = feed.subscriber, "Tailing feed");

    while let Some(change) = feed.changes.next().await {
        let change = change?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(&change)?),
            OutputFormat::Text => println!("{}", cli::format_change(&change)),
        }
    }

    println!("Feed closed by daemon");
    Ok(())
}

/// Push every stdin line as a log event until EOF
async fn cmd_pipe(client: &DaemonClient, source: SourceId, name: Option<String>) -> Result<()> {
    debug!(%source, ?name, "cmd_pipe: called");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut name = name;
    let mut pushed = 0usize;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let id = uuid::Uuid::now_v7().to_string();
        let mut event = Event::new(source.clone(), id, serde_json::Value::String(line));
        // Only the first event needs to introduce the source name
        if let Some(name) = name.take() {
            event = event.with_source_name(name);
        }
        client.push(event).await?;
        pushed += 1;
    }

    info!(pushed, %source, "Pipe finished");
    Ok(())
}
