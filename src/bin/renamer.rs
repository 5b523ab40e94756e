//! Renamer CLI - chat-style file renaming
//!
//! Talks to the renamer daemon over its Unix socket, starting the daemon
//! first if it is not running.
//!
//! # Usage
//!
//! ```text
//! renamer edit report.pdf                        # interactive session
//! renamer apply report.pdf --prefix Q1_ --case upper
//! renamer apply notes.txt --replace draft=final --timestamp ymd
//! renamer sessions                               # list live sessions
//! ```

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use renamer_cli::client::{ClientConfig, DaemonClient};
use renamer_cli::session::{self, default_session_key};
use renamer_cli::{daemon, render, CliError};
use renamer_core::{Action, CaseMode, TimestampFormat};

// ============================================================================
// CLI Arguments
// ============================================================================

/// Renamer - rename files through a short chat-style session
#[derive(Parser, Debug)]
#[command(name = "renamer")]
#[command(about = "Rename files through the renamer daemon")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Daemon socket path
    #[arg(long, global = true, env = "RENAMER_SOCKET")]
    socket: Option<PathBuf>,

    /// Session key (defaults to $USER)
    #[arg(long, short = 's', global = true)]
    session: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file and edit its name interactively
    Edit {
        /// File to rename
        file: PathBuf,
    },
    /// Rename a file in one shot
    Apply {
        /// File to rename
        file: PathBuf,

        /// Text added before the name
        #[arg(long)]
        prefix: Option<String>,

        /// Text added after the name, before the extension
        #[arg(long)]
        suffix: Option<String>,

        /// Text removed from the name
        #[arg(long)]
        remove: Option<String>,

        /// Replacement as OLD=NEW (NEW may be empty)
        #[arg(long, value_parser = parse_replace)]
        replace: Option<(String, String)>,

        /// upper, lower, title or none
        #[arg(long, value_parser = parse_case)]
        case: Option<CaseMode>,

        /// ymdhms, ymd, dmy or a strftime pattern
        #[arg(long, value_parser = parse_timestamp)]
        timestamp: Option<TimestampFormat>,
    },
    /// List live sessions
    Sessions,
}

fn parse_replace(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((old, new)) if !old.is_empty() => Ok((old.to_string(), new.to_string())),
        _ => Err("expected OLD=NEW".to_string()),
    }
}

fn parse_case(s: &str) -> std::result::Result<CaseMode, String> {
    CaseMode::parse(s).map_err(|e| e.to_string())
}

fn parse_timestamp(s: &str) -> std::result::Result<TimestampFormat, String> {
    TimestampFormat::parse(s).map_err(|e| e.to_string())
}

/// Directives in the order the pipeline applies them.
fn directives(
    prefix: Option<String>,
    suffix: Option<String>,
    remove: Option<String>,
    replace: Option<(String, String)>,
    case: Option<CaseMode>,
    timestamp: Option<TimestampFormat>,
) -> Vec<Action> {
    let mut actions = Vec::new();
    if let Some((old, new)) = replace {
        actions.push(Action::SetReplace { old, new });
    }
    if let Some(text) = remove {
        actions.push(Action::SetRemove { text });
    }
    if let Some(mode) = case {
        actions.push(Action::SetCase { mode });
    }
    if let Some(text) = prefix {
        actions.push(Action::SetPrefix { text });
    }
    if let Some(text) = suffix {
        actions.push(Action::SetSuffix { text });
    }
    if let Some(format) = timestamp {
        actions.push(Action::SetTimestamp { format });
    }
    actions
}

// ============================================================================
// Logging Setup
// ============================================================================

fn init_logging() {
    // stdout belongs to the session, logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn report(e: &CliError) {
    eprintln!("Error: {e}");
    if let Some(next) = e.next_action() {
        eprintln!("Next: {next}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let mut config = ClientConfig::from_env();
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    let key = args.session.unwrap_or_else(default_session_key);

    info!(key = %key, socket = %config.socket_path.display(), "Renamer starting");

    if let Err(e) = daemon::ensure_daemon_running(&config.socket_path).await {
        report(&e);
        process::exit(1);
    }

    let result = match args.command {
        Command::Edit { file } => match DaemonClient::connect(&config, Some(key)).await {
            Ok(client) => session::edit(client, &file).await.map(|_| ()),
            Err(e) => Err(e),
        },
        Command::Apply {
            file,
            prefix,
            suffix,
            remove,
            replace,
            case,
            timestamp,
        } => {
            let actions = directives(prefix, suffix, remove, replace, case, timestamp);
            match DaemonClient::connect(&config, Some(key)).await {
                Ok(mut client) => {
                    let delivered = session::apply(&mut client, &file, actions).await;
                    if let Err(e) = client.disconnect().await {
                        info!(error = %e, "Disconnect not sent");
                    }
                    delivered.map(|d| println!("{}", d.path.display()))
                }
                Err(e) => Err(e),
            }
        }
        Command::Sessions => match DaemonClient::connect(&config, None).await {
            Ok(mut client) => {
                let listed = client.list_sessions().await;
                if let Err(e) = client.disconnect().await {
                    info!(error = %e, "Disconnect not sent");
                }
                listed.map(|sessions| println!("{}", render::session_list(&sessions)))
            }
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        debug!(error = %e, "Command failed");
        report(&e);
        process::exit(1);
    }

    Ok(())
}
