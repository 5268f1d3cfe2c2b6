//! Best-effort filesystem helpers shared by the store components.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{CommonError, Result};

/// Deletes `path`, logging instead of failing. A missing file is not an error.
pub fn remove_file_logged(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed temporary file {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temporary file {}: {}", path.display(), e),
    }
}

/// Moves a file, copying when a plain rename is not possible (e.g. the two
/// paths are on different devices).
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|e| {
        CommonError::io_error_with_source(
            format!("Failed to move {} to {}", from.display(), to.display()),
            e,
        )
    })?;
    remove_file_logged(from);
    Ok(())
}
