//! CLI command definitions and output formatting

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::*;
use tracing::debug;

use crate::aggregate::{Change, Item, Node, QueryResult};
use crate::domain::{ChangeType, Event, EventKind, SourceInfo};

/// devfeed - live event feed for development dashboards
#[derive(Parser)]
#[command(
    name = "dv",
    about = "Aggregate build, process and device events into one live feed",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Daemon socket path (overrides config)
    #[arg(short, long, global = true)]
    pub socket: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground
    Serve {
        /// Events retained before the oldest are evicted (overrides config)
        #[arg(long)]
        capacity: Option<usize>,
    },

    /// Push one event
    Push {
        /// Source: process, or device:<id>
        #[arg(long, default_value = "process")]
        source: String,

        /// Logical message id; pushing the same id again replaces it
        #[arg(long)]
        id: String,

        /// Event kind (log, progress, status, cleared)
        #[arg(short, long, default_value = "log")]
        kind: String,

        /// Display name for a new device source
        #[arg(long)]
        name: Option<String>,

        /// Mirror the event into the issues registry under this id
        #[arg(long)]
        issue: Option<String>,

        /// With --issue, clear that issue instead of adding it
        #[arg(long, requires = "issue")]
        clear_issue: bool,

        /// JSON payload
        #[arg(default_value = "null")]
        payload: String,
    },

    /// Add or replace an issue
    Issue {
        /// Issue id
        id: String,

        /// JSON payload
        payload: String,
    },

    /// Remove an issue
    ClearIssue {
        /// Issue id
        id: String,
    },

    /// Show a flattened timeline
    Query {
        /// Source to show (issues, process, device:<id>); all sources when omitted
        #[arg(long)]
        source: Option<String>,

        /// Only items after this cursor
        #[arg(long)]
        after: Option<String>,

        /// At most this many items
        #[arg(short = 'n', long)]
        first: Option<usize>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Follow the live feed
    Tail {
        /// Resume after this cursor; replays retained events when omitted
        #[arg(long)]
        cursor: Option<u64>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List known sources
    Sources {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Record a read position
    MarkRead {
        /// Source (issues, process, device:<id>); all sources when omitted
        #[arg(long)]
        source: Option<String>,

        /// Cursor to mark; defaults to the newest item
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Push each stdin line as a log event
    Pipe {
        /// Source: process, or device:<id>
        #[arg(long, default_value = "process")]
        source: String,

        /// Display name for a new device source
        #[arg(long)]
        name: Option<String>,
    },

    /// Ping the daemon to check if it's alive and responsive
    Ping,

    /// Stop the daemon
    Stop,
}

/// Output format for query/tail/sources
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

/// Parse an event kind given on the command line
pub fn parse_kind(s: &str) -> Result<EventKind, String> {
    debug!(%s, "parse_kind: called");
    match s.to_lowercase().as_str() {
        "log" => Ok(EventKind::Log),
        "progress" => Ok(EventKind::Progress),
        "status" => Ok(EventKind::Status),
        "cleared" | "clear" => Ok(EventKind::Cleared),
        _ => Err(format!("Unknown kind: {}. Use: log, progress, status or cleared", s)),
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("devfeed")
        .join("logs")
        .join("devfeed.log")
}

/// Short human-readable form of a JSON payload
fn payload_text(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => match map.get("message").or_else(|| map.get("msg")) {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => payload.to_string(),
        },
        other => other.to_string(),
    }
}

fn event_text(event: &Event) -> String {
    let kind = match event.kind {
        EventKind::Log => "log".normal(),
        EventKind::Progress => "progress".cyan(),
        EventKind::Status => "status".blue(),
        EventKind::Cleared => "cleared".yellow(),
    };
    format!(
        "{} {:<8} {} {}",
        event.source.to_string().bold(),
        kind,
        event.id.dimmed(),
        payload_text(&event.payload)
    )
}

fn node_text(node: &Node) -> String {
    match node {
        Node::Event(event) => event_text(event),
        Node::Issue(record) => {
            let id = record.get("id").and_then(|v| v.as_str()).unwrap_or("?");
            format!("{} {} {}", "issue".red().bold(), id.dimmed(), payload_text(record))
        }
    }
}

/// One line per timeline item
pub fn format_item(item: &Item) -> String {
    format!("{:>6} {}", item.cursor.dimmed(), node_text(&item.node))
}

/// One line per feed change
pub fn format_change(change: &Change) -> String {
    let label = match change.change_type {
        ChangeType::Added => "+".green(),
        ChangeType::Updated => "~".yellow(),
        ChangeType::Deleted => "-".red(),
        ChangeType::Cleared => "x".yellow().bold(),
    };
    let cursor = change.cursor.as_deref().unwrap_or("");
    format!("{} {:>6} {}", label, cursor.dimmed(), node_text(&change.node))
}

/// Summary line followed by items
pub fn format_query(result: &QueryResult) -> String {
    let mut out = format!(
        "{} items, {} unread\n",
        result.count.to_string().bold(),
        result.unread_count.to_string().green()
    );
    for item in &result.items {
        out.push_str(&format_item(item));
        out.push('\n');
    }
    out
}

pub fn format_source(source: &SourceInfo) -> String {
    format!("{:<24} {}", source.id.to_string().bold(), source.name)
}
