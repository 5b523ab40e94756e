//! Upload intake: validates an incoming file and stages a private copy.
//!
//! Rejections happen here, before any session exists.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use sysinfo::Disks;
use thiserror::Error;
use tracing::{debug, info, warn};

use renamer_core::{sanitize, split_name, NextAction, SessionKey, UiRef};

use crate::cleanup::safe_remove;
use crate::config::DaemonConfig;

/// Free space required on the downloads volume, as a multiple of the size limit.
const FREE_SPACE_FACTOR: u64 = 2;

/// A staged upload, ready to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub key: SessionKey,
    pub original_name: String,
    /// The private staged copy. Owned by the session from here on.
    pub artifact_path: PathBuf,
    pub size_bytes: u64,
    pub ui_ref: Option<UiRef>,
}

/// Reasons an upload is refused.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("cannot read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a regular file", path.display())]
    NotAFile { path: PathBuf },

    #[error("file type .{extension} is not accepted (allowed: {allowed})")]
    ExtensionNotAllowed { extension: String, allowed: String },

    #[error("file is too large ({size} bytes, max {max} bytes)")]
    TooLarge { size: u64, max: u64 },

    #[error("not enough free storage ({available} bytes available, {required} required)")]
    InsufficientSpace { available: u64, required: u64 },

    #[error("failed to store upload at {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IntakeError {
    pub fn next_action(&self) -> NextAction {
        match self {
            Self::Unreadable { .. }
            | Self::NotAFile { .. }
            | Self::ExtensionNotAllowed { .. }
            | Self::TooLarge { .. } => NextAction::Reupload,
            Self::InsufficientSpace { .. } | Self::Staging { .. } => NextAction::ContactSupport,
        }
    }

    /// Short machine-readable code for protocol errors.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unreadable { .. } => "unreadable",
            Self::NotAFile { .. } => "not_a_file",
            Self::ExtensionNotAllowed { .. } => "extension_not_allowed",
            Self::TooLarge { .. } => "too_large",
            Self::InsufficientSpace { .. } => "insufficient_space",
            Self::Staging { .. } => "staging_failed",
        }
    }
}

/// Returns bytes available on the volume holding `path`.
pub type SpaceProbe = fn(&Path) -> Option<u64>;

/// Validates and stages uploads.
#[derive(Clone)]
pub struct Intake {
    downloads_dir: PathBuf,
    max_file_size: u64,
    allowed_extensions: Vec<String>,
    space_probe: SpaceProbe,
}

impl std::fmt::Debug for Intake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Intake")
            .field("downloads_dir", &self.downloads_dir)
            .field("max_file_size", &self.max_file_size)
            .field("allowed_extensions", &self.allowed_extensions)
            .finish_non_exhaustive()
    }
}

impl Intake {
    pub fn new(downloads_dir: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            downloads_dir: downloads_dir.into(),
            max_file_size,
            allowed_extensions: Vec::new(),
            space_probe: disk_available_space,
        }
    }

    pub fn from_config(config: &DaemonConfig) -> Self {
        Self::new(&config.downloads_dir, config.max_file_size_bytes())
            .with_allowed_extensions(config.allowed_extensions.clone())
    }

    /// Restricts accepted extensions (case-insensitive, without the dot).
    pub fn with_allowed_extensions(mut self, extensions: Vec<String>) -> Self {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    /// Replaces the free-space probe.
    pub fn with_space_probe(mut self, probe: SpaceProbe) -> Self {
        self.space_probe = probe;
        self
    }

    /// Checks `source` and copies it to
    /// `<downloads>/<key>/<stem>_<YYYYmmddHHMMSSffffff><ext>`.
    ///
    /// `name` is the display name, defaulting to the file name of `source`.
    pub async fn stage(
        &self,
        key: &SessionKey,
        source: &Path,
        name: Option<&str>,
        ui_ref: Option<UiRef>,
    ) -> Result<Upload, IntakeError> {
        let meta = tokio::fs::metadata(source)
            .await
            .map_err(|e| IntakeError::Unreadable {
                path: source.to_path_buf(),
                source: e,
            })?;
        if !meta.is_file() {
            return Err(IntakeError::NotAFile {
                path: source.to_path_buf(),
            });
        }

        let raw_name = name.map(str::to_string).unwrap_or_else(|| {
            source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        let original_name = sanitize(&raw_name);
        let (stem, ext) = split_name(&original_name);

        self.check_extension(ext)?;

        let size = meta.len();
        if size > self.max_file_size {
            return Err(IntakeError::TooLarge {
                size,
                max: self.max_file_size,
            });
        }

        let dir = self.downloads_dir.join(key.dir_name());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| IntakeError::Staging {
                path: dir.clone(),
                source: e,
            })?;

        self.check_free_space(&dir).await?;

        let stamp = Local::now().format("%Y%m%d%H%M%S%6f");
        let artifact_path = dir.join(format!("{stem}_{stamp}{ext}"));

        if let Err(e) = tokio::fs::copy(source, &artifact_path).await {
            warn!(path = %artifact_path.display(), error = %e, "Staging copy failed");
            safe_remove(&artifact_path).await;
            return Err(IntakeError::Staging {
                path: artifact_path,
                source: e,
            });
        }

        info!(
            key = %key,
            name = %original_name,
            size_bytes = size,
            path = %artifact_path.display(),
            "Upload staged"
        );

        Ok(Upload {
            key: key.clone(),
            original_name,
            artifact_path,
            size_bytes: size,
            ui_ref,
        })
    }

    fn check_extension(&self, ext: &str) -> Result<(), IntakeError> {
        if self.allowed_extensions.is_empty() {
            return Ok(());
        }
        let extension = ext.trim_start_matches('.').to_ascii_lowercase();
        if self.allowed_extensions.iter().any(|a| *a == extension) {
            Ok(())
        } else {
            Err(IntakeError::ExtensionNotAllowed {
                extension,
                allowed: self.allowed_extensions.join(", "),
            })
        }
    }

    async fn check_free_space(&self, dir: &Path) -> Result<(), IntakeError> {
        let probe = self.space_probe;
        let target = dir.to_path_buf();
        let available = tokio::task::spawn_blocking(move || probe(&target))
            .await
            .ok()
            .flatten();

        let required = self.max_file_size.saturating_mul(FREE_SPACE_FACTOR);
        match available {
            Some(available) if available < required => {
                warn!(available, required, dir = %dir.display(), "Insufficient free space");
                Err(IntakeError::InsufficientSpace {
                    available,
                    required,
                })
            }
            Some(_) => Ok(()),
            None => {
                debug!(dir = %dir.display(), "Free space unknown, skipping check");
                Ok(())
            }
        }
    }
}

/// Looks up free space on the disk whose mount point is the longest prefix of `path`.
pub fn disk_available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn plenty(_: &Path) -> Option<u64> {
        Some(u64::MAX)
    }

    fn none_free(_: &Path) -> Option<u64> {
        Some(0)
    }

    async fn source_file(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_stage_copies_into_key_directory() {
        let src_dir = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let source = source_file(&src_dir, "My Report.pdf", b"%PDF").await;

        let intake = Intake::new(downloads.path(), 1024).with_space_probe(plenty);
        let upload = intake
            .stage(&SessionKey::new("alice"), &source, None, Some(UiRef::new("m1")))
            .await
            .unwrap();

        assert_eq!(upload.original_name, "My Report.pdf");
        assert_eq!(upload.size_bytes, 4);
        assert!(upload.artifact_path.starts_with(downloads.path().join("alice")));
        let staged = upload.artifact_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(staged.starts_with("My Report_"));
        assert!(staged.ends_with(".pdf"));
        assert_eq!(tokio::fs::read(&upload.artifact_path).await.unwrap(), b"%PDF");
        // the caller's file is untouched
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_display_name_is_sanitized() {
        let src_dir = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let source = source_file(&src_dir, "x.pdf", b"x").await;

        let intake = Intake::new(downloads.path(), 1024).with_space_probe(plenty);
        let upload = intake
            .stage(&SessionKey::new("k"), &source, Some("../../a:b.pdf"), None)
            .await
            .unwrap();
        assert_eq!(upload.original_name, "ab.pdf");
    }

    #[tokio::test]
    async fn test_rejects_too_large() {
        let src_dir = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let source = source_file(&src_dir, "big.pdf", &[0u8; 64]).await;

        let intake = Intake::new(downloads.path(), 10).with_space_probe(plenty);
        let err = intake
            .stage(&SessionKey::new("k"), &source, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::TooLarge { size: 64, max: 10 }));
        assert_eq!(err.next_action(), NextAction::Reupload);
    }

    #[tokio::test]
    async fn test_rejects_disallowed_extension() {
        let src_dir = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let source = source_file(&src_dir, "run.exe", b"MZ").await;

        let intake = Intake::new(downloads.path(), 1024)
            .with_allowed_extensions(vec![".PDF".to_string()])
            .with_space_probe(plenty);
        let err = intake
            .stage(&SessionKey::new("k"), &source, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::ExtensionNotAllowed { .. }));

        let ok = source_file(&src_dir, "doc.Pdf", b"%PDF").await;
        assert!(intake.stage(&SessionKey::new("k"), &ok, None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_insufficient_space() {
        let src_dir = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let source = source_file(&src_dir, "a.pdf", b"x").await;

        let intake = Intake::new(downloads.path(), 1024).with_space_probe(none_free);
        let err = intake
            .stage(&SessionKey::new("k"), &source, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IntakeError::InsufficientSpace {
                available: 0,
                required: 2048
            }
        ));
        assert_eq!(err.next_action(), NextAction::ContactSupport);
    }

    #[tokio::test]
    async fn test_rejects_directory_and_missing() {
        let src_dir = TempDir::new().unwrap();
        let downloads = TempDir::new().unwrap();
        let intake = Intake::new(downloads.path(), 1024).with_space_probe(plenty);

        let err = intake
            .stage(&SessionKey::new("k"), src_dir.path(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::NotAFile { .. }));

        let err = intake
            .stage(&SessionKey::new("k"), &src_dir.path().join("nope"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::Unreadable { .. }));
    }
}
