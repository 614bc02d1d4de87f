use std::path::{Path, PathBuf};

use controller_prover_interface::SharedRandomness;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use tracing::info;

use super::wait::wait_for_files;
use super::{read_artifact, write_output, PipelineContext};
use crate::error::PipelineResult;
use crate::pipeline::metadata::PipelineMetadata;

const DOMAIN_TAG: &[u8] = b"prover-controller/shared-randomness/v1";

/// Derives the shared randomness from every GL commitment of a conflation.
///
/// Commitments are hashed in segment-index order whatever order they are given in, each one
/// prefixed by its index and length.
pub fn combine(num_gl: usize, commitments: &[(u32, Vec<u8>)]) -> SharedRandomness {
    let mut ordered: Vec<&(u32, Vec<u8>)> = commitments.iter().collect();
    ordered.sort_by_key(|(index, _)| *index);

    let mut hasher = Keccak256::new();
    hasher.update(DOMAIN_TAG);
    hasher.update((num_gl as u64).to_le_bytes());
    for (index, bytes) in ordered {
        hasher.update(index.to_le_bytes());
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    SharedRandomness(hasher.finalize().into())
}

/// Admission record of a conflation into conglomeration, written once its randomness is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconRecord {
    pub start_block: u64,
    pub end_block: u64,
    pub num_commitments: usize,
    pub shared_randomness: [u8; 32],
}

impl BeaconRecord {
    pub fn shared_randomness(&self) -> SharedRandomness {
        SharedRandomness(self.shared_randomness)
    }

    pub async fn read(path: &Path) -> PipelineResult<Self> {
        Ok(bincode::deserialize(&read_artifact(path).await?)?)
    }
}

/// Waits for every GL commitment listed in the metadata, then publishes the shared randomness
/// (output 0, the file LPP stages wait for) and the beacon record (output 1).
pub async fn run(ctx: &PipelineContext, metadata_path: &Path, outputs: &[PathBuf]) -> PipelineResult<SharedRandomness> {
    let metadata = PipelineMetadata::read(metadata_path).await?;
    let policy = ctx.wait_policy(ctx.settings.barrier_timeout(), metadata.start_block, metadata.end_block);
    wait_for_files(&metadata.commitment_files, &policy).await?;

    let mut commitments = Vec::with_capacity(metadata.num_gl);
    for (index, path) in metadata.commitment_files.iter().enumerate() {
        let raw = read_artifact(path).await?;
        commitments.push((index as u32, ctx.prover.decode_commitment(&raw)?));
    }
    let seed = combine(metadata.num_gl, &commitments);
    info!(num_gl = metadata.num_gl, seed = ?seed, "Shared randomness derived");

    let record = BeaconRecord {
        start_block: metadata.start_block,
        end_block: metadata.end_block,
        num_commitments: commitments.len(),
        shared_randomness: *seed.as_bytes(),
    };
    write_output(&outputs[0], seed.as_bytes()).await?;
    write_output(&outputs[1], &bincode::serialize(&record)?).await?;
    Ok(seed)
}
