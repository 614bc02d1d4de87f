use std::path::{Path, PathBuf};

use async_trait::async_trait;
use controller_prover_interface::{ModulePartition, ModuleWitness, ProverError};
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info};

use super::{read_artifact, PipelineContext};
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::metadata::PipelineMetadata;
use crate::pipeline::witness::SegmentWitness;
use crate::types::jobs::{FilenameFields, JobName};
use crate::utils::fs::write_atomically;

/// Destination of witness files.
#[async_trait]
pub trait WitnessSink: Send + Sync {
    async fn write(&self, path: &Path, bytes: Vec<u8>) -> PipelineResult<()>;
}

/// Writes each witness under a hidden staging name first, so a GL or LPP worker never sees a
/// partial file.
pub struct FsWitnessSink;

#[async_trait]
impl WitnessSink for FsWitnessSink {
    async fn write(&self, path: &Path, bytes: Vec<u8>) -> PipelineResult<()> {
        write_atomically(path, &bytes).await.map_err(|e| PipelineError::io(path, e))
    }
}

/// Segments the conflation request and publishes its witnesses, then writes the metadata to every
/// output. Every GL witness is on disk before the first LPP witness is written.
pub async fn run(ctx: &PipelineContext, request: &Path, outputs: &[PathBuf]) -> PipelineResult<PipelineMetadata> {
    let fields = ctx.layout.request_fields(JobName::Bootstrap, 0, request)?;
    let bytes = read_artifact(request).await?;

    let partition = ModulePartition { num_gl: ctx.settings.num_gl_modules, num_lpp: ctx.settings.num_lpp_modules };
    let segmentation = ctx.prover.bootstrap(&bytes, &partition).await?;
    let gl = ordered(segmentation.gl, "GL")?;
    let lpp = ordered(segmentation.lpp, "LPP")?;
    info!(num_gl = gl.len(), num_lpp = lpp.len(), "Conflation segmented");

    let metadata = ctx.layout.metadata(&fields, gl.len(), lpp.len())?;

    let gl_files = envelopes(&fields, gl, None, |segment| ctx.layout.gl_witness_path(&fields, segment))?;
    write_all(ctx, unclaimed(ctx, JobName::Gl, gl_files).await?).await?;
    debug!("GL witnesses published");

    let randomness = Some(metadata.shared_randomness_file.clone());
    let lpp_files = envelopes(&fields, lpp, randomness, |segment| ctx.layout.lpp_witness_path(&fields, segment))?;
    write_all(ctx, unclaimed(ctx, JobName::Lpp, lpp_files).await?).await?;
    debug!("LPP witnesses published");

    for output in outputs {
        metadata.write(output).await?;
    }
    Ok(metadata)
}

/// Sorts witnesses by segment index and checks the indices are exactly `0..n`.
fn ordered(mut witnesses: Vec<ModuleWitness>, class: &str) -> PipelineResult<Vec<ModuleWitness>> {
    witnesses.sort_by_key(|w| w.segment_index);
    let count = witnesses.len();
    for (expected, witness) in witnesses.iter().enumerate() {
        if witness.segment_index as usize != expected {
            return Err(ProverError::InvalidArtifact(format!(
                "{class} segment indices must be 0..{count}, found {} at position {expected}",
                witness.segment_index
            ))
            .into());
        }
    }
    Ok(witnesses)
}

fn envelopes(
    fields: &FilenameFields,
    witnesses: Vec<ModuleWitness>,
    shared_randomness_file: Option<PathBuf>,
    path_of: impl Fn(u32) -> PipelineResult<PathBuf>,
) -> PipelineResult<Vec<(PathBuf, Vec<u8>)>> {
    witnesses
        .into_iter()
        .map(|witness| {
            let path = path_of(witness.segment_index)?;
            let envelope = SegmentWitness::new(fields.start, fields.end, witness, shared_randomness_file.clone());
            Ok((path, envelope.to_bytes()?))
        })
        .collect()
}

/// Drops the witnesses a worker already locked or finished, e.g. when bootstrap runs again for a
/// requeued conflation. Republishing them would get the segment proved twice.
async fn unclaimed(
    ctx: &PipelineContext,
    job: JobName,
    files: Vec<(PathBuf, Vec<u8>)>,
) -> PipelineResult<Vec<(PathBuf, Vec<u8>)>> {
    let claimed = ctx.layout.claimed_requests(job).await?;
    let (fresh, taken): (Vec<_>, Vec<_>) = files.into_iter().partition(|(path, _)| {
        let prefix = format!("{}.", path.file_name().unwrap_or_default().to_string_lossy());
        !claimed.iter().any(|name| name.starts_with(&prefix))
    });
    if !taken.is_empty() {
        info!(job = %job, skipped = taken.len(), "Witnesses already taken by a worker are not republished");
    }
    Ok(fresh)
}

/// Writes every file with at most `witness_writer_concurrency` writers in flight and returns
/// once all of them are done.
async fn write_all(ctx: &PipelineContext, files: Vec<(PathBuf, Vec<u8>)>) -> PipelineResult<()> {
    futures::stream::iter(files)
        .map(|(path, bytes)| {
            let sink = ctx.sink.clone();
            tokio::spawn(async move { sink.write(&path, bytes).await })
        })
        .buffer_unordered(ctx.settings.witness_writer_concurrency.max(1))
        .map(|joined| -> PipelineResult<()> { joined? })
        .try_collect::<Vec<()>>()
        .await?;
    Ok(())
}
