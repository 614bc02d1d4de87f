use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Rendezvous record of one distributed proof, written by bootstrap and read by every later stage.
///
/// File lists are ordered by segment index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub start_block: u64,
    pub end_block: u64,
    pub num_gl: usize,
    pub num_lpp: usize,
    pub gl_subproof_files: Vec<PathBuf>,
    pub lpp_subproof_files: Vec<PathBuf>,
    pub commitment_files: Vec<PathBuf>,
    pub shared_randomness_file: PathBuf,
}

impl PipelineMetadata {
    pub async fn read(path: &Path) -> PipelineResult<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| PipelineError::io(path, e))?;
        let metadata: Self = serde_json::from_slice(&bytes)?;
        metadata.validate()?;
        Ok(metadata)
    }

    pub async fn write(&self, path: &Path) -> PipelineResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, bytes).await.map_err(|e| PipelineError::io(path, e))
    }

    fn validate(&self) -> PipelineResult<()> {
        if self.gl_subproof_files.len() != self.num_gl || self.commitment_files.len() != self.num_gl {
            return Err(PipelineError::InvalidRequest(format!(
                "metadata of {}-{} lists {} GL sub-proofs and {} commitments for {} GL modules",
                self.start_block,
                self.end_block,
                self.gl_subproof_files.len(),
                self.commitment_files.len(),
                self.num_gl
            )));
        }
        if self.lpp_subproof_files.len() != self.num_lpp {
            return Err(PipelineError::InvalidRequest(format!(
                "metadata of {}-{} lists {} LPP sub-proofs for {} LPP modules",
                self.start_block,
                self.end_block,
                self.lpp_subproof_files.len(),
                self.num_lpp
            )));
        }
        Ok(())
    }
}
