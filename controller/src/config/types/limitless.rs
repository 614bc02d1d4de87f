use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::pipeline::shared_failure::SharedFailures;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProverMode {
    /// Deterministic placeholder artifacts, no cryptography.
    #[default]
    Dev,
}

/// Settings of the distributed (GL/LPP) proving pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitlessSection {
    #[serde(default)]
    pub prover_mode: ProverMode,

    #[serde(default = "default_num_modules")]
    pub num_gl_modules: usize,

    #[serde(default = "default_num_modules")]
    pub num_lpp_modules: usize,

    /// Concurrent witness writers used by the bootstrap stage.
    #[serde(default = "default_witness_writer_concurrency")]
    pub witness_writer_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_barrier_timeout_seconds")]
    pub barrier_timeout_seconds: u64,

    #[serde(default = "default_stage_timeout_seconds")]
    pub randomness_timeout_seconds: u64,

    #[serde(default = "default_stage_timeout_seconds")]
    pub conglomeration_timeout_seconds: u64,

    /// Directory of the per-conflation failure markers shared by every worker. Unset disables
    /// failure propagation between pipeline jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_failure_dir: Option<PathBuf>,
}

fn default_num_modules() -> usize {
    2
}

fn default_witness_writer_concurrency() -> usize {
    8
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_barrier_timeout_seconds() -> u64 {
    600
}

fn default_stage_timeout_seconds() -> u64 {
    3_600
}

impl Default for LimitlessSection {
    fn default() -> Self {
        Self {
            prover_mode: ProverMode::default(),
            num_gl_modules: default_num_modules(),
            num_lpp_modules: default_num_modules(),
            witness_writer_concurrency: default_witness_writer_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            barrier_timeout_seconds: default_barrier_timeout_seconds(),
            randomness_timeout_seconds: default_stage_timeout_seconds(),
            conglomeration_timeout_seconds: default_stage_timeout_seconds(),
            shared_failure_dir: None,
        }
    }
}

impl LimitlessSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_secs(self.barrier_timeout_seconds)
    }

    pub fn randomness_timeout(&self) -> Duration {
        Duration::from_secs(self.randomness_timeout_seconds)
    }

    pub fn conglomeration_timeout(&self) -> Duration {
        Duration::from_secs(self.conglomeration_timeout_seconds)
    }

    pub fn shared_failures(&self) -> Option<SharedFailures> {
        self.shared_failure_dir.as_ref().map(SharedFailures::new)
    }
}
