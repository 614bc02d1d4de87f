use std::path::PathBuf;
use std::time::Duration;

use controller_prover_interface::ProverError;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// A rendezvous file did not show up before its deadline.
    #[error("Timed out after {waited:?} waiting for {path}")]
    WaitTimeout { path: PathBuf, waited: Duration },

    #[error("Wait for {0} was cancelled")]
    Cancelled(PathBuf),

    /// Another job of the conflation failed, see the named marker.
    #[error("Conflation abandoned after a peer failure ({0})")]
    PeerFailed(String),

    #[error("Prover error: {0}")]
    Prover(#[from] ProverError),

    #[error("Failed to (de)serialize pipeline metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Failed to (de)serialize segment witness: {0}")]
    Witness(#[from] bincode::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid stage request: {0}")]
    InvalidRequest(String),

    #[error("Witness writer task failed: {0}")]
    WriterTask(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Exit code reported by a stage command for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::WaitTimeout { .. } => 3,
            PipelineError::Cancelled(_) => 4,
            PipelineError::Prover(_) => 5,
            PipelineError::InvalidRequest(_) => 6,
            PipelineError::PeerFailed(_) => 7,
            _ => 1,
        }
    }
}
