use std::io;
use std::path::{Path, PathBuf};

use tracing::error;

/// Renames `from` to `to`, failing with `AlreadyExists` when `to` exists.
///
/// Done as `link(from, to)` then `unlink(from)`: the link fails atomically on an existing target.
/// When two callers link the same source under different names, only the one whose unlink
/// succeeds keeps its link; the other removes it again and reports `NotFound`.
/// Both paths must be on the same filesystem.
pub fn rename_no_replace(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::hard_link(from, to)?;
    match std::fs::remove_file(from) {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Err(cleanup) = std::fs::remove_file(to) {
                error!(path = %to.display(), error = %cleanup, "Failed to remove link of a lost rename");
            }
            Err(e)
        }
    }
}

/// Removes `path`, treating a missing file as success.
pub fn remove_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Hidden sibling used while `path` is being written.
pub fn staging_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}

/// Writes `bytes` so that `path` appears at once, fully written, or not at all.
pub async fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = staging_path(path);
    tokio::fs::write(&staging, bytes).await?;
    tokio::fs::rename(&staging, path).await
}
