//! Fault-tolerant artifact removal.
//!
//! Cleanup never fails outward: every removal is retried a bounded number of
//! times, the final failure is logged, and the caller carries on.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, warn};

/// Removal attempts before giving up.
pub const REMOVE_ATTEMPTS: u32 = 3;

/// Pause between removal attempts.
const REMOVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Removes `path`, retrying on failure.
///
/// Returns true if the file is gone afterwards (including when it never
/// existed).
pub async fn safe_remove(path: &Path) -> bool {
    for attempt in 1..=REMOVE_ATTEMPTS {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed file");
                return true;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return true,
            Err(e) if attempt < REMOVE_ATTEMPTS => {
                warn!(
                    path = %path.display(),
                    attempt,
                    error = %e,
                    "Failed to remove file, retrying"
                );
                tokio::time::sleep(REMOVE_RETRY_DELAY).await;
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    attempts = REMOVE_ATTEMPTS,
                    error = %e,
                    "Giving up removing file"
                );
            }
        }
    }
    false
}

/// Removes `dir` if it is empty. Errors are logged at debug and ignored.
pub async fn remove_dir_if_empty(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir(dir).await {
        debug!(dir = %dir.display(), error = %e, "Directory not removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_safe_remove_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"data").await.unwrap();

        assert!(safe_remove(&path).await);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_safe_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(safe_remove(&dir.path().join("never.txt")).await);
    }

    #[tokio::test]
    async fn test_safe_remove_directory_gives_up() {
        // remove_file cannot delete a directory
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        tokio::fs::create_dir(&sub).await.unwrap();

        assert!(!safe_remove(&sub).await);
        assert!(sub.exists());
    }

    #[tokio::test]
    async fn test_remove_dir_if_empty() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty");
        let full = dir.path().join("full");
        tokio::fs::create_dir(&empty).await.unwrap();
        tokio::fs::create_dir(&full).await.unwrap();
        tokio::fs::write(full.join("f"), b"x").await.unwrap();

        remove_dir_if_empty(&empty).await;
        remove_dir_if_empty(&full).await;
        assert!(!empty.exists());
        assert!(full.exists());
    }
}
