use std::path::{Path, PathBuf};

use controller_prover_interface::SubProof;
use tracing::info;

use super::barrier::BeaconRecord;
use super::wait::wait_for_files;
use super::{read_artifact, write_output, PipelineContext};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::metadata::PipelineMetadata;

/// Folds every sub-proof of a conflation into the final proof (output 0).
pub async fn run(ctx: &PipelineContext, metadata_path: &Path, record_path: &Path, outputs: &[PathBuf]) -> PipelineResult<()> {
    let metadata = PipelineMetadata::read(metadata_path).await?;
    let record = BeaconRecord::read(record_path).await?;
    if (record.start_block, record.end_block) != (metadata.start_block, metadata.end_block) {
        return Err(PipelineError::InvalidRequest(format!(
            "beacon record covers {}-{} but metadata covers {}-{}",
            record.start_block, record.end_block, metadata.start_block, metadata.end_block
        )));
    }

    let awaited: Vec<PathBuf> =
        metadata.gl_subproof_files.iter().chain(&metadata.lpp_subproof_files).cloned().collect();
    let policy = ctx.wait_policy(ctx.settings.conglomeration_timeout(), metadata.start_block, metadata.end_block);
    wait_for_files(&awaited, &policy).await?;

    let gl = load_subproofs(&metadata.gl_subproof_files).await?;
    let lpp = load_subproofs(&metadata.lpp_subproof_files).await?;
    let proof = ctx.prover.conglomerate(&gl, &lpp, &record.shared_randomness()).await?;
    info!(num_gl = gl.len(), num_lpp = lpp.len(), "Conflation proof assembled");
    write_output(&outputs[0], &proof).await
}

async fn load_subproofs(paths: &[PathBuf]) -> PipelineResult<Vec<SubProof>> {
    let mut proofs = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        proofs.push(SubProof { segment_index: index as u32, bytes: read_artifact(path).await? });
    }
    Ok(proofs)
}
