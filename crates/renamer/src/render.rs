//! Plain-text rendering of daemon messages.

use std::fmt::Write;

use renamer_core::{SessionState, StatusView};
use renamer_protocol::DaemonMessage;

/// Renders the preview block shown after every change.
pub fn status(view: &StatusView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Original: {}", view.original_name);
    let _ = writeln!(out, "Preview:  {}", view.preview);

    let width = view
        .summary
        .iter()
        .map(|e| e.label.len())
        .max()
        .unwrap_or(0);
    for entry in &view.summary {
        let _ = writeln!(out, "  {:<width$}  {}", entry.label, entry.value);
    }

    match view.state {
        SessionState::CollectingDirectives => {
            out.push_str("Send /apply to rename, /cancel to discard, /help for commands.");
        }
        SessionState::Committing => out.push_str("Renaming..."),
        SessionState::Terminated => out.push_str("Session closed."),
    }
    out
}

/// Renders the live session table.
pub fn session_list(sessions: &[StatusView]) -> String {
    if sessions.is_empty() {
        return "No active sessions.".to_string();
    }

    let key_width = sessions
        .iter()
        .map(|s| s.key.as_str().len())
        .max()
        .unwrap_or(0)
        .max(3);
    let mut out = format!("{:<key_width$}  {:<10}  PREVIEW", "KEY", "STATE");
    for s in sessions {
        let _ = write!(
            out,
            "\n{:<key_width$}  {:<10}  {}",
            s.key.as_str(),
            s.state.as_str(),
            s.preview
        );
    }
    out
}

/// Renders any message the daemon may push. Handshake replies and pongs
/// have nothing to show.
pub fn message(msg: &DaemonMessage) -> Option<String> {
    let text = match msg {
        DaemonMessage::Connected { .. } | DaemonMessage::Pong { .. } => return None,
        DaemonMessage::Rejected { reason, .. } => format!("Connection rejected: {reason}"),
        DaemonMessage::Status { status: view } => status(view),
        DaemonMessage::Delivered { name, path } => {
            format!("Delivered {name} -> {}", path.display())
        }
        DaemonMessage::DeliveryFailed {
            message,
            attempts,
            rounds_left,
        } => {
            let mut text = format!("Delivery failed after {attempts} attempt(s): {message}");
            if *rounds_left > 0 {
                let _ = write!(
                    text,
                    "\nThe renamed file is kept. /apply to try again ({rounds_left} left)."
                );
            }
            text
        }
        DaemonMessage::Terminated { reason } => format!("Session ended: {reason}."),
        DaemonMessage::SessionList { sessions } => session_list(sessions),
        DaemonMessage::Error {
            message,
            next_action,
            ..
        } => match next_action {
            Some(next) => format!("Error: {message} ({next})"),
            None => format!("Error: {message}"),
        },
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use renamer_core::{NextAction, Session, SessionKey, TerminationReason};
    use std::path::PathBuf;

    fn view(key: &str, name: &str) -> StatusView {
        Session::new(SessionKey::new(key), name, format!("/tmp/{name}"), None).status_view()
    }

    #[test]
    fn test_status_lists_every_directive() {
        let text = status(&view("alice", "report.pdf"));
        assert!(text.contains("Preview:  report.pdf"));
        for label in ["Prefix", "Suffix", "Remove", "Replace", "Case", "Timestamp"] {
            assert!(text.contains(label), "missing {label} in {text}");
        }
        assert!(text.contains("/apply"));
    }

    #[test]
    fn test_session_list_table() {
        assert_eq!(session_list(&[]), "No active sessions.");

        let text = session_list(&[view("alice", "a.pdf"), view("bob", "b.txt")]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("KEY"));
        assert!(lines[1].contains("collecting"));
        assert!(lines[2].ends_with("b.txt"));
    }

    #[test]
    fn test_message_rendering() {
        assert!(message(&DaemonMessage::pong(1)).is_none());

        let delivered = message(&DaemonMessage::delivered(
            "Q1.pdf".to_string(),
            PathBuf::from("/out/Q1.pdf"),
        ))
        .unwrap();
        assert_eq!(delivered, "Delivered Q1.pdf -> /out/Q1.pdf");

        let ended = message(&DaemonMessage::terminated(TerminationReason::TimedOut)).unwrap();
        assert!(ended.contains("timed out"));

        let err = message(&DaemonMessage::error_with_action(
            "no active session for alice",
            "session_expired",
            NextAction::Reupload,
        ))
        .unwrap();
        assert!(err.starts_with("Error: no active session"));
        assert!(err.contains(NextAction::Reupload.hint()));
    }

    #[test]
    fn test_delivery_failed_mentions_retry_only_when_possible() {
        let retry = message(&DaemonMessage::delivery_failed("offline".into(), 3, 2)).unwrap();
        assert!(retry.contains("/apply"));

        let last = message(&DaemonMessage::delivery_failed("offline".into(), 3, 0)).unwrap();
        assert!(!last.contains("/apply"));
    }
}
