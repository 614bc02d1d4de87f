use std::path::{Path, PathBuf};

use tracing::debug;

use super::{write_output, PipelineContext};
use crate::error::PipelineResult;
use crate::pipeline::witness::SegmentWitness;

/// Proves one GL module. Output 0 receives the sub-proof, output 1 the commitment.
pub async fn run(ctx: &PipelineContext, witness_path: &Path, outputs: &[PathBuf]) -> PipelineResult<()> {
    let witness = SegmentWitness::read(witness_path).await?;
    debug!(module = %witness.module, segment = witness.segment_index, "Proving GL module");

    let proof = ctx.prover.prove_gl(&witness.module_witness()).await?;
    write_output(&outputs[0], &proof.proof).await?;
    write_output(&outputs[1], &proof.commitment).await
}
