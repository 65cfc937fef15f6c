//! Temporary artifact storage confined to a single base directory
//!
//! Every file the service writes on behalf of a client lives directly inside
//! one flat directory. Names handed in by clients are resolved lexically
//! (exactly one plain component) and, before anything is served, checked
//! again against the canonical base path so symlinks cannot escape it.

use crate::error::{ConvertError, Result};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Directory name used under the system temp directory by default
pub const DEFAULT_DIR_NAME: &str = "audio_converter";

/// Outcome of an orphan sweep
#[derive(Debug, Clone)]
pub struct SweepReport {
    /// Files older than this instant were removed
    pub cutoff: DateTime<Utc>,
    pub removed: usize,
    pub kept: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct TempStorage {
    base: PathBuf,
    canonical_base: PathBuf,
}

impl TempStorage {
    /// Platform temp directory joined with [`DEFAULT_DIR_NAME`]
    pub fn default_base() -> PathBuf {
        std::env::temp_dir().join(DEFAULT_DIR_NAME)
    }

    /// Open (creating if absent) the storage rooted at `base`
    pub fn open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;
        let canonical_base = base.canonicalize()?;
        info!(base = %base.display(), "temp storage ready");
        Ok(Self {
            base,
            canonical_base,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolve a storage name to a path directly inside the base directory.
    ///
    /// Anything other than a single plain component (`..`, absolute paths,
    /// nested paths, empty names) is rejected as [`ConvertError::Forbidden`].
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) if !name.contains(['/', '\\', '\0']) => {
                Ok(self.base.join(part))
            }
            _ => Err(ConvertError::Forbidden(format!(
                "storage name {name:?} escapes the temp directory"
            ))),
        }
    }

    /// Verify via canonical paths that `path` lives inside the base directory.
    ///
    /// Returns false when the path cannot be canonicalized (e.g. it does not exist).
    pub fn confine(&self, path: &Path) -> bool {
        match path.canonicalize() {
            Ok(canonical) => canonical.starts_with(&self.canonical_base),
            Err(_) => false,
        }
    }

    /// Write `bytes` to `path`; the file handle is closed on every exit path
    pub async fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.ensure_inside(path)?;
        let mut file = fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(())
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Delete an artifact. A file that is already gone is not an error:
    /// returns `Ok(false)` in that case and `Ok(true)` when something was removed.
    pub async fn remove(&self, path: &Path) -> Result<bool> {
        self.ensure_inside(path)?;
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove regular files last modified more than `max_age` ago.
    ///
    /// Artifacts left behind by a process that died mid-request are never
    /// referenced again, so this is the only way they get reclaimed.
    pub async fn sweep(&self, max_age: Duration) -> Result<SweepReport> {
        let age = chrono::Duration::from_std(max_age)
            .map_err(|e| ConvertError::Internal(format!("invalid sweep age: {e}")))?;
        let cutoff = Utc::now() - age;
        let mut report = SweepReport {
            cutoff,
            removed: 0,
            kept: 0,
            failed: 0,
        };

        let mut entries = fs::read_dir(&self.base).await?;
        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "cannot stat temp entry");
                    report.failed += 1;
                    continue;
                }
            };

            let modified: DateTime<Utc> = match metadata.modified() {
                Ok(time) => time.into(),
                Err(_) => {
                    report.kept += 1;
                    continue;
                }
            };

            if modified > cutoff {
                report.kept += 1;
                continue;
            }

            match self.remove(&entry.path()).await {
                Ok(_) => {
                    debug!(path = %entry.path().display(), "swept orphaned artifact");
                    report.removed += 1;
                }
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to sweep artifact");
                    report.failed += 1;
                }
            }
        }

        info!(
            removed = report.removed,
            kept = report.kept,
            failed = report.failed,
            "orphan sweep finished"
        );
        Ok(report)
    }

    fn ensure_inside(&self, path: &Path) -> Result<()> {
        let inside = path.parent().is_some_and(|parent| parent == self.base)
            && matches!(path.components().next_back(), Some(Component::Normal(_)));
        if inside {
            Ok(())
        } else {
            Err(ConvertError::Forbidden(format!(
                "{} is outside the temp directory",
                path.display()
            )))
        }
    }
}
