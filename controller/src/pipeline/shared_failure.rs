//! Per-conflation failure markers shared by every worker of the distributed pipeline.
//!
//! A marker `<start>-<end>-<job>.failure.code_<N>` is an empty file in the shared failure
//! directory. Its presence means the conflation can no longer be proved by the current attempt:
//! sibling jobs of the range are not started and waiting stages give up early. A new bootstrap of
//! the range clears the markers.

use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::types::jobs::definition::FAILURE_SUFFIX_PREFIX;
use crate::types::jobs::JobName;
use crate::utils::fs::remove_if_exists;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFailures {
    dir: PathBuf,
}

fn range_prefix(start: u64, end: u64) -> String {
    format!("{start}-{end}-")
}

impl SharedFailures {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn marker_name(job: JobName, start: u64, end: u64, exit_code: i32) -> String {
        format!("{}{job}{FAILURE_SUFFIX_PREFIX}{exit_code}", range_prefix(start, end))
    }

    /// Records that `job` failed for the range with `exit_code`.
    pub fn mark(&self, job: JobName, start: u64, end: u64, exit_code: i32) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::marker_name(job, start, end, exit_code));
        std::fs::write(&path, b"")?;
        warn!(marker = %path.display(), "Conflation marked as failed for every peer");
        Ok(path)
    }

    /// Names of the markers of the range, sorted. A missing directory holds no marker.
    pub fn markers(&self, start: u64, end: u64) -> io::Result<Vec<String>> {
        let prefix = range_prefix(start, end);
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut names = Vec::new();
        for entry in entries {
            let Ok(name) = entry?.file_name().into_string() else { continue };
            if name.starts_with(&prefix) && name.contains(FAILURE_SUFFIX_PREFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Async flavour of [`Self::markers`] for the pipeline stages.
    pub async fn markers_async(&self, start: u64, end: u64) -> io::Result<Vec<String>> {
        let failures = self.clone();
        tokio::task::spawn_blocking(move || failures.markers(start, end)).await.map_err(io::Error::other)?
    }

    /// Removes every marker of the range and returns how many there were.
    pub fn clear(&self, start: u64, end: u64) -> io::Result<usize> {
        let markers = self.markers(start, end)?;
        for name in &markers {
            remove_if_exists(&self.dir.join(name))?;
        }
        Ok(markers.len())
    }
}
