//! Rename engine: atomic commit of a computed name against the on-disk artifact.
//!
//! The artifact is copied to `<dest>.tmp` and the temporary is then renamed
//! onto `<dest>`. Same-directory renames are atomic, so an observer sees
//! either no destination or the complete file. The source is never modified;
//! the caller removes it once it has recorded the new location.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use renamer_core::split_name;

use crate::cleanup::safe_remove;

/// Attempts at finding a free collision-suffixed name.
pub const COLLISION_ATTEMPTS: u32 = 10;

/// Extension appended to the staging copy.
const TMP_EXTENSION: &str = ".tmp";

// ============================================================================
// Errors
// ============================================================================

/// Errors from a rename commit. The source is intact in every case.
#[derive(Debug, Error)]
pub enum RenameError {
    /// The artifact disappeared from disk.
    #[error("artifact is missing: {}", path.display())]
    SourceMissing { path: PathBuf },

    /// Every disambiguated name was taken.
    #[error("no free file name near {} after {attempts} attempts", path.display())]
    NoFreeName { path: PathBuf, attempts: u32 },

    /// A filesystem operation failed.
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl RenameError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns true if retrying cannot help: the disk is full or read-only,
    /// access is denied, or the artifact is gone.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::SourceMissing { .. } => true,
            Self::NoFreeName { .. } => false,
            Self::Io { source, .. } => is_terminal_io(source),
        }
    }
}

/// Classifies an I/O error as terminal (not worth retrying).
pub fn is_terminal_io(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::ENOSPC || code == libc::EDQUOT || code == libc::EROFS
    )
}

// ============================================================================
// Commit
// ============================================================================

/// Commits the artifact at `src` under the name `dest`.
///
/// If `dest` exists a time-based suffix is added first. Returns the path the
/// artifact now lives at. On error no temporary is left behind and `src` is
/// unchanged.
pub async fn commit(src: &Path, dest: &Path) -> Result<PathBuf, RenameError> {
    if src == dest {
        debug!(path = %src.display(), "Name unchanged, nothing to rename");
        return Ok(src.to_path_buf());
    }

    match tokio::fs::metadata(src).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(RenameError::io(
                "stat",
                src,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(RenameError::SourceMissing {
                path: src.to_path_buf(),
            })
        }
        Err(e) => return Err(RenameError::io("stat", src, e)),
    }

    let dest = resolve_collision(dest).await?;
    let tmp = tmp_path(&dest);

    if let Err(e) = stage_copy(src, &tmp).await {
        safe_remove(&tmp).await;
        return Err(e);
    }

    if let Err(e) = tokio::fs::rename(&tmp, &dest).await {
        warn!(tmp = %tmp.display(), dest = %dest.display(), error = %e, "Atomic move failed");
        safe_remove(&tmp).await;
        return Err(RenameError::io("rename", &dest, e));
    }

    info!(from = %src.display(), to = %dest.display(), "Artifact renamed");
    Ok(dest)
}

/// Copies `src` to `tmp` and flushes it to disk.
async fn stage_copy(src: &Path, tmp: &Path) -> Result<(), RenameError> {
    tokio::fs::copy(src, tmp)
        .await
        .map_err(|e| RenameError::io("copy", tmp, e))?;

    let file = tokio::fs::File::open(tmp)
        .await
        .map_err(|e| RenameError::io("open", tmp, e))?;
    file.sync_all()
        .await
        .map_err(|e| RenameError::io("sync", tmp, e))
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(TMP_EXTENSION);
    dest.with_file_name(name)
}

/// Returns `dest` if it is free, otherwise `dest` with a
/// `_<YYYYmmddHHMMSSffffff>` suffix before the extension.
///
/// # Errors
///
/// `RenameError::NoFreeName` after [`COLLISION_ATTEMPTS`] taken candidates.
pub async fn resolve_collision(dest: &Path) -> Result<PathBuf, RenameError> {
    if !exists(dest).await? {
        return Ok(dest.to_path_buf());
    }

    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = split_name(&name);

    for _ in 0..COLLISION_ATTEMPTS {
        let stamp = Utc::now().format("%Y%m%d%H%M%S%6f");
        let candidate = dest.with_file_name(format!("{stem}_{stamp}{ext}"));
        if !exists(&candidate).await? {
            debug!(wanted = %dest.display(), using = %candidate.display(), "Name taken, disambiguated");
            return Ok(candidate);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    Err(RenameError::NoFreeName {
        path: dest.to_path_buf(),
        attempts: COLLISION_ATTEMPTS,
    })
}

async fn exists(path: &Path) -> Result<bool, RenameError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| RenameError::io("stat", path, e))
}
