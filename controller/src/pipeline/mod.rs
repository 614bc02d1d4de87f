//! Stages of the distributed proving pipeline: bootstrap, GL, shared-randomness barrier, LPP and
//! conglomeration.
//!
//! Each stage runs as the worker command of its job type (`controller stage <name>`), so the
//! controller handles locking, retries and output renaming. Stages only meet through files: the
//! metadata written by bootstrap names every rendezvous path, and a waiting stage polls for those
//! paths with a deadline.

pub mod barrier;
pub mod bootstrap;
pub mod conglomeration;
pub mod gl;
pub mod layout;
pub mod lpp;
pub mod metadata;
pub mod prover;
pub mod shared_failure;
pub mod wait;
pub mod witness;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use controller_prover_interface::DistributedProver;
use strum_macros::Display;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::config::{Config, LimitlessSection};
use crate::error::{PipelineError, PipelineResult};
use crate::types::jobs::JobName;
use bootstrap::{FsWitnessSink, WitnessSink};
use layout::PipelineLayout;
use wait::{PeerFailureWatch, WaitPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Bootstrap,
    Gl,
    Beacon,
    Lpp,
    Conglomerate,
}

impl Stage {
    pub fn job_name(&self) -> JobName {
        match self {
            Stage::Bootstrap => JobName::Bootstrap,
            Stage::Gl => JobName::Gl,
            Stage::Beacon => JobName::RandomnessBeacon,
            Stage::Lpp => JobName::Lpp,
            Stage::Conglomerate => JobName::Conglomeration,
        }
    }
}

/// Everything a stage needs besides its input and output paths.
pub struct PipelineContext {
    pub layout: PipelineLayout,
    pub prover: Arc<dyn DistributedProver>,
    pub settings: LimitlessSection,
    pub sink: Arc<dyn WitnessSink>,
    pub cancel: CancellationToken,
}

impl PipelineContext {
    pub fn new(
        layout: PipelineLayout,
        prover: Arc<dyn DistributedProver>,
        settings: LimitlessSection,
        cancel: CancellationToken,
    ) -> Self {
        Self { layout, prover, settings, sink: Arc::new(FsWitnessSink), cancel }
    }

    pub fn from_config(config: &Config, cancel: CancellationToken) -> PipelineResult<Self> {
        let layout = PipelineLayout::new(config.catalog.clone())?;
        let prover = prover::build_prover(config.limitless.prover_mode);
        Ok(Self::new(layout, prover, config.limitless.clone(), cancel))
    }

    pub fn with_sink(mut self, sink: Arc<dyn WitnessSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Wait settings for a rendezvous of the conflation `start..end`.
    fn wait_policy(&self, timeout: Duration, start: u64, end: u64) -> WaitPolicy {
        WaitPolicy {
            timeout,
            poll_interval: self.settings.poll_interval(),
            cancel: self.cancel.clone(),
            peer_failures: self.settings.shared_failures().map(|failures| PeerFailureWatch { failures, start, end }),
        }
    }
}

/// Runs one stage over the files handed over by the controller.
pub async fn run_stage(ctx: &PipelineContext, stage: Stage, inputs: &[PathBuf], outputs: &[PathBuf]) -> PipelineResult<()> {
    let name = stage.job_name();
    if inputs.len() != name.num_inputs() || outputs.len() != name.num_outputs() {
        return Err(PipelineError::InvalidRequest(format!(
            "stage {stage} takes {} inputs and {} outputs, got {} and {}",
            name.num_inputs(),
            name.num_outputs(),
            inputs.len(),
            outputs.len()
        )));
    }

    let span = info_span!("stage", job = %name, input = %inputs[0].display());
    async move {
        info!("Stage started");
        match stage {
            Stage::Bootstrap => bootstrap::run(ctx, &inputs[0], outputs).await.map(|_| ()),
            Stage::Gl => gl::run(ctx, &inputs[0], outputs).await,
            Stage::Beacon => barrier::run(ctx, &inputs[0], outputs).await.map(|_| ()),
            Stage::Lpp => lpp::run(ctx, &inputs[0], outputs).await,
            Stage::Conglomerate => conglomeration::run(ctx, &inputs[0], &inputs[1], outputs).await,
        }?;
        info!("Stage done");
        Ok(())
    }
    .instrument(span)
    .await
}

/// Writes a stage output. Outputs are temporary paths renamed by the controller on success.
async fn write_output(path: &Path, bytes: &[u8]) -> PipelineResult<()> {
    tokio::fs::write(path, bytes).await.map_err(|e| PipelineError::io(path, e))
}

async fn read_artifact(path: &Path) -> PipelineResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| PipelineError::io(path, e))
}
