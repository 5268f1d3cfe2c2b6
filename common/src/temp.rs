//! Temporary file naming.
//!
//! Stores never pick file names themselves; they ask an injected
//! [`TempFileProvider`] for fresh paths. Tests use [`ScratchDir`] for
//! deterministic, self-cleaning names.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tempfile::TempDir;

use crate::error::{CommonError, Result};

/// Source of fresh temporary file paths.
pub trait TempFileProvider: Send + Sync + Debug {
    /// Returns a path that no other caller has been handed. The file itself
    /// is not created.
    fn create_path(&self) -> Result<PathBuf>;

    /// Directory the paths live under.
    fn root(&self) -> &Path;
}

/// A scratch directory handing out sequentially numbered file names.
///
/// When created with [`ScratchDir::new`] the directory is owned and removed,
/// together with anything left in it, when the provider drops.
#[derive(Debug)]
pub struct ScratchDir {
    root: PathBuf,
    prefix: String,
    next_id: AtomicU64,
    _owned: Option<TempDir>,
}

impl ScratchDir {
    /// Creates a fresh owned directory under the system temp area.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("spillmr-")
            .tempdir()
            .map_err(|e| CommonError::io_error_with_source("Failed to create scratch dir", e))?;
        Ok(Self {
            root: dir.path().to_path_buf(),
            prefix: "spill".to_string(),
            next_id: AtomicU64::new(1),
            _owned: Some(dir),
        })
    }

    /// Uses an existing directory. Nothing is removed on drop.
    pub fn in_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            CommonError::io_error_with_source(
                format!("Failed to create scratch dir {}", root.display()),
                e,
            )
        })?;
        Ok(Self {
            root,
            prefix: "spill".to_string(),
            next_id: AtomicU64::new(1),
            _owned: None,
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Number of paths handed out so far.
    pub fn issued(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed) - 1
    }
}

impl TempFileProvider for ScratchDir {
    fn create_path(&self) -> Result<PathBuf> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(self.root.join(format!("{}-{:06}.tmp", self.prefix, id)))
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

/// Uuid-named files directly under a shared temp directory.
#[derive(Debug, Clone)]
pub struct SystemTempFiles {
    root: PathBuf,
}

impl SystemTempFiles {
    pub fn new() -> Self {
        Self {
            root: std::env::temp_dir(),
        }
    }

    pub fn in_dir<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl Default for SystemTempFiles {
    fn default() -> Self {
        Self::new()
    }
}

impl TempFileProvider for SystemTempFiles {
    fn create_path(&self) -> Result<PathBuf> {
        Ok(self
            .root
            .join(format!("spillmr-{}.tmp", uuid::Uuid::new_v4())))
    }

    fn root(&self) -> &Path {
        &self.root
    }
}
