use std::path::{Path, PathBuf};

use controller_prover_interface::SharedRandomness;
use tracing::debug;

use super::wait::wait_for_file;
use super::{read_artifact, write_output, PipelineContext};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::witness::SegmentWitness;

/// Proves one LPP module once the shared randomness of its conflation is published.
pub async fn run(ctx: &PipelineContext, witness_path: &Path, outputs: &[PathBuf]) -> PipelineResult<()> {
    let witness = SegmentWitness::read(witness_path).await?;
    let randomness_file = witness.shared_randomness_file.as_deref().ok_or_else(|| {
        PipelineError::InvalidRequest(format!("{} carries no shared randomness path", witness_path.display()))
    })?;

    debug!(file = %randomness_file.display(), "Waiting for shared randomness");
    let policy = ctx.wait_policy(ctx.settings.randomness_timeout(), witness.start_block, witness.end_block);
    wait_for_file(randomness_file, &policy).await?;
    let seed = SharedRandomness::from_bytes(&read_artifact(randomness_file).await?)?;

    debug!(module = %witness.module, segment = witness.segment_index, "Proving LPP module");
    let proof = ctx.prover.prove_lpp(&witness.module_witness(), &seed).await?;
    write_output(&outputs[0], &proof).await
}
