//! Daemon management for the renamer CLI.
//!
//! Provides utilities for checking if the daemon is running and
//! starting it automatically if needed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info};

use crate::error::{CliError, Result};

/// Returns the path to the daemon PID file.
pub fn pid_file_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("renamer")
        .join("renamerd.pid")
}

/// Reads the PID from a PID file, if it exists.
fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Checks if the daemon is currently running.
pub fn is_daemon_running() -> bool {
    read_pid(&pid_file_path()).is_some_and(is_process_running)
}

/// Spawns `renamerd start -d` as a detached process.
fn spawn_daemon() -> std::io::Result<()> {
    // Prefer the renamerd next to this binary
    let renamerd_path = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("renamerd")))
        .filter(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from("renamerd"));

    debug!(path = %renamerd_path.display(), "Starting daemon");

    Command::new(&renamerd_path)
        .args(["start", "-d"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    Ok(())
}

/// Ensures the daemon is running, starting it if necessary.
///
/// Waits up to three seconds for the socket to appear after a start.
///
/// # Errors
///
/// `CliError::DaemonConnection` if the daemon could not be started.
pub async fn ensure_daemon_running(socket_path: &Path) -> Result<()> {
    if is_daemon_running() {
        debug!("Daemon already running");
        return Ok(());
    }

    info!("Daemon not running, starting it...");
    spawn_daemon()
        .map_err(|e| CliError::DaemonConnection(format!("failed to start daemon: {e}")))?;

    for i in 0..30 {
        sleep(Duration::from_millis(100)).await;

        if is_daemon_running() && socket_path.exists() {
            info!(attempts = i + 1, "Daemon started successfully");
            return Ok(());
        }
    }

    Err(CliError::DaemonConnection(
        "daemon failed to start within 3 seconds".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pid_file_path() {
        let path = pid_file_path();
        assert!(path.ends_with("renamer/renamerd.pid"));
    }

    #[test]
    fn test_read_pid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("renamerd.pid");
        assert_eq!(read_pid(&path), None);

        fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pid(&path), Some(4242));

        fs::write(&path, "garbage").unwrap();
        assert_eq!(read_pid(&path), None);
    }

    #[test]
    fn test_is_process_running() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(999_999_999));
    }
}
