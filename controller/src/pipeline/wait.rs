use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::shared_failure::SharedFailures;

/// Polling settings shared by every rendezvous wait.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub cancel: CancellationToken,
    /// Ends the wait as soon as a peer marks the conflation as failed.
    pub peer_failures: Option<PeerFailureWatch>,
}

#[derive(Debug, Clone)]
pub struct PeerFailureWatch {
    pub failures: SharedFailures,
    pub start: u64,
    pub end: u64,
}

impl PeerFailureWatch {
    async fn check(&self) -> PipelineResult<()> {
        let markers = self
            .failures
            .markers_async(self.start, self.end)
            .await
            .map_err(|e| PipelineError::io(self.failures.dir(), e))?;
        match markers.into_iter().next() {
            Some(marker) => Err(PipelineError::PeerFailed(marker)),
            None => Ok(()),
        }
    }
}

pub async fn wait_for_file(path: &Path, policy: &WaitPolicy) -> PipelineResult<()> {
    let paths = [path.to_path_buf()];
    wait_for_files(&paths, policy).await
}

/// Waits until every path exists. All paths share one deadline.
pub async fn wait_for_files(paths: &[PathBuf], policy: &WaitPolicy) -> PipelineResult<()> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut pending: Vec<&PathBuf> = paths.iter().collect();

    loop {
        let mut still_pending = Vec::with_capacity(pending.len());
        for path in pending {
            let exists = tokio::fs::try_exists(path).await.map_err(|e| PipelineError::io(path, e))?;
            if !exists {
                still_pending.push(path);
            }
        }
        pending = still_pending;

        let Some(first) = pending.first() else {
            debug!(files = paths.len(), waited = ?started.elapsed(), "All awaited files are present");
            return Ok(());
        };
        if let Some(watch) = &policy.peer_failures {
            watch.check().await?;
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(PipelineError::WaitTimeout { path: first.to_path_buf(), waited: started.elapsed() });
        }
        trace!(missing = pending.len(), next = %first.display(), "Waiting for files");

        tokio::select! {
            biased;
            _ = policy.cancel.cancelled() => return Err(PipelineError::Cancelled(first.to_path_buf())),
            _ = tokio::time::sleep(policy.poll_interval.min(deadline - now)) => {}
        }
    }
}
