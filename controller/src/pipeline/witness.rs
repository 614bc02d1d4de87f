use std::path::{Path, PathBuf};

use controller_prover_interface::ModuleWitness;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Envelope around one module witness, as written by bootstrap into a GL or LPP request directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentWitness {
    pub start_block: u64,
    pub end_block: u64,
    pub segment_index: u32,
    pub module: String,
    /// Where the shared randomness of the conflation will appear. Only set for LPP witnesses.
    pub shared_randomness_file: Option<PathBuf>,
    pub payload: Vec<u8>,
}

impl SegmentWitness {
    pub fn new(start_block: u64, end_block: u64, witness: ModuleWitness, shared_randomness_file: Option<PathBuf>) -> Self {
        Self {
            start_block,
            end_block,
            segment_index: witness.segment_index,
            module: witness.module,
            shared_randomness_file,
            payload: witness.payload,
        }
    }

    pub fn to_bytes(&self) -> PipelineResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub async fn read(path: &Path) -> PipelineResult<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| PipelineError::io(path, e))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub fn module_witness(&self) -> ModuleWitness {
        ModuleWitness { module: self.module.clone(), segment_index: self.segment_index, payload: self.payload.clone() }
    }
}
