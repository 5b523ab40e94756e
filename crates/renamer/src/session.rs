//! Session drivers behind `renamer edit` and `renamer apply`.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use renamer_core::{Action, NextAction, StatusView, TerminationReason};
use renamer_protocol::{ClientMessage, DaemonMessage};

use crate::client::{DaemonClient, MessageReader};
use crate::command::{parse_line, Command, HELP};
use crate::error::{CliError, Result};
use crate::render;

/// Session key used when none is given: `$USER`, else `local`.
pub fn default_session_key() -> String {
    std::env::var("USER")
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| "local".to_string())
}

/// A successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub name: String,
    pub path: PathBuf,
}

fn daemon_error(message: String, next_action: Option<NextAction>) -> CliError {
    CliError::Daemon {
        message,
        next_action,
    }
}

/// Uploads `file` and waits for the first status of the new session.
pub async fn upload(client: &mut DaemonClient, file: &Path) -> Result<StatusView> {
    // the daemon resolves paths from its own working directory
    let path = tokio::fs::canonicalize(file).await?;
    client.send(&ClientMessage::upload(path, None)).await?;

    loop {
        match client.recv().await? {
            DaemonMessage::Status { status } => return Ok(*status),
            DaemonMessage::Error {
                message,
                next_action,
                ..
            } => return Err(daemon_error(message, next_action)),
            DaemonMessage::Terminated { reason } => {
                debug!(reason = ?reason, "Previous session closed");
            }
            other => debug!(message = ?other, "Skipping push before first status"),
        }
    }
}

/// Sends a directive and waits for the refreshed status.
async fn apply_directive(client: &mut DaemonClient, action: Action) -> Result<StatusView> {
    client.send(&ClientMessage::action(action)).await?;
    loop {
        match client.recv().await? {
            DaemonMessage::Status { status } => return Ok(*status),
            DaemonMessage::Error {
                message,
                next_action,
                ..
            } => return Err(daemon_error(message, next_action)),
            DaemonMessage::Terminated { reason } => {
                return Err(daemon_error(
                    format!("session ended: {reason}"),
                    Some(NextAction::Reupload),
                ))
            }
            other => debug!(message = ?other, "Skipping push"),
        }
    }
}

/// Commits and waits for the delivery.
async fn commit(client: &mut DaemonClient) -> Result<Delivery> {
    client.send(&ClientMessage::action(Action::Commit)).await?;
    loop {
        match client.recv().await? {
            DaemonMessage::Delivered { name, path } => return Ok(Delivery { name, path }),
            DaemonMessage::DeliveryFailed {
                message,
                rounds_left,
                ..
            } => {
                if rounds_left > 0 {
                    // one-shot mode does not retry, release the upload
                    client.send(&ClientMessage::action(Action::Cancel)).await?;
                }
                return Err(daemon_error(
                    format!("delivery failed: {message}"),
                    Some(NextAction::Retry),
                ));
            }
            DaemonMessage::Error {
                message,
                next_action,
                ..
            } => return Err(daemon_error(message, next_action)),
            DaemonMessage::Terminated { reason } => {
                return Err(daemon_error(format!("session ended: {reason}"), None))
            }
            other => debug!(message = ?other, "Skipping push while committing"),
        }
    }
}

/// One-shot rename: upload, apply every directive, commit.
///
/// A rejected directive cancels the session so the upload is not left
/// waiting for a timeout.
pub async fn apply(
    client: &mut DaemonClient,
    file: &Path,
    directives: Vec<Action>,
) -> Result<Delivery> {
    let status = upload(client, file).await?;
    debug!(preview = %status.preview, "Uploaded");

    for action in directives {
        if let Err(e) = apply_directive(client, action).await {
            if let Err(cancel_err) = client.send(&ClientMessage::action(Action::Cancel)).await {
                warn!(error = %cancel_err, "Could not cancel session");
            }
            return Err(e);
        }
    }

    commit(client).await
}

// ============================================================================
// Interactive Editor
// ============================================================================

/// Forwards daemon messages until the connection ends or `cancel` fires.
fn spawn_reader(
    mut reader: MessageReader,
    tx: mpsc::UnboundedSender<DaemonMessage>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = reader.recv() => match received {
                    Ok(msg) => {
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Reader task exiting");
                        break;
                    }
                },
            }
        }
    })
}

/// Runs the chat-style editor for `file` until the session ends or the user
/// quits.
///
/// Returns the delivery if the file was renamed and handed over.
pub async fn edit(mut client: DaemonClient, file: &Path) -> Result<Option<Delivery>> {
    let status = upload(&mut client, file).await?;
    println!("{}", render::status(&status));

    let (reader, mut writer, key) = client.into_parts();
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let reader_task = spawn_reader(reader, tx, cancel.clone());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut delivery = None;

    let result = loop {
        tokio::select! {
            pushed = rx.recv() => {
                let Some(msg) = pushed else {
                    break Err(CliError::ProtocolError("connection to daemon lost".to_string()));
                };
                if let Some(text) = render::message(&msg) {
                    println!("{text}");
                }
                match msg {
                    DaemonMessage::Delivered { name, path } => {
                        delivery = Some(Delivery { name, path });
                    }
                    DaemonMessage::Terminated { reason } => {
                        if reason != TerminationReason::Delivered {
                            println!("Upload the file again to start over.");
                        }
                        break Ok(());
                    }
                    _ => {}
                }
            }

            line = stdin.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    // end of input counts as /quit
                    Ok(None) => {
                        writer.send(&ClientMessage::action(Action::Cancel)).await?;
                        break Ok(());
                    }
                    Err(e) => break Err(e.into()),
                };
                match parse_line(&line) {
                    Ok(None) => {}
                    Ok(Some(Command::Help)) => println!("{HELP}"),
                    Ok(Some(Command::Quit)) => {
                        writer.send(&ClientMessage::action(Action::Cancel)).await?;
                        println!("Cancelled.");
                        break Ok(());
                    }
                    Ok(Some(Command::Action(action))) => {
                        debug!(key = %key, action = action.name(), "Sending action");
                        writer.send(&ClientMessage::action(action)).await?;
                    }
                    Err(e) => println!("Error: {e}"),
                }
            }
        }
    };

    if let Err(e) = writer.send(&ClientMessage::disconnect()).await {
        debug!(error = %e, "Disconnect not sent");
    }
    cancel.cancel();
    let _ = reader_task.await;

    result.map(|()| delivery)
}
