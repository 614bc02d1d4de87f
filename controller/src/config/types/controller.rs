use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::jobs::status::DEFAULT_KILLED_BY_SCHEDULER_CODE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSection {
    /// Unique id of this worker, used in in-progress file names.
    pub local_id: String,

    /// Idle backoff in milliseconds, indexed by the number of empty polls and clamped to the last entry.
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,

    /// Default worker command, overridable per job type.
    #[serde(default)]
    pub worker_cmd: Option<String>,

    /// Default large-machine worker command, overridable per job type.
    #[serde(default)]
    pub worker_cmd_large: Option<String>,

    #[serde(default)]
    pub defer_to_other_large_codes: Vec<i32>,

    #[serde(default)]
    pub retry_locally_with_large_codes: Vec<i32>,

    #[serde(default = "default_killed_by_scheduler_code")]
    pub killed_by_scheduler_code: i32,

    #[serde(default = "default_termination_grace_period_seconds")]
    pub termination_grace_period_seconds: u64,

    #[serde(default = "default_spot_instance_reclaim_time_seconds")]
    pub spot_instance_reclaim_time_seconds: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otel_endpoint: Option<Url>,
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![0, 1_000, 2_000, 3_000, 5_000, 8_000, 13_000, 21_000]
}

fn default_killed_by_scheduler_code() -> i32 {
    DEFAULT_KILLED_BY_SCHEDULER_CODE
}

fn default_termination_grace_period_seconds() -> u64 {
    1_800
}

fn default_spot_instance_reclaim_time_seconds() -> u64 {
    120
}

impl ControllerSection {
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms.iter().copied().map(Duration::from_millis).collect()
    }

    pub fn termination_grace_period(&self) -> Duration {
        Duration::from_secs(self.termination_grace_period_seconds)
    }

    pub fn spot_instance_reclaim_time(&self) -> Duration {
        Duration::from_secs(self.spot_instance_reclaim_time_seconds)
    }
}
