use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, IntoStaticStr};

/// Exit code used when the controller itself terminates a worker command.
/// Real processes report 0..=255, so a negative value cannot be produced by a worker.
pub const DEFAULT_KILLED_BY_SCHEDULER_CODE: i32 = -1;

/// Exit code given to a job killed because a peer of its conflation failed. Never written as a
/// shared failure marker, so one failure does not cascade into markers from every peer.
pub const PEER_ABORT_CODE: i32 = -2;

/// Exit code reported when the worker command cannot be spawned at all (as a shell would).
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// Value returned by the executor for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub exit_code: i32,
}

impl Status {
    pub fn new(exit_code: i32) -> Self {
        Self { exit_code }
    }

    pub fn classify(&self, rules: &ClassificationRules) -> StatusClass {
        rules.classify(self.exit_code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum StatusClass {
    Success,
    KilledByScheduler,
    DeferToLarge,
    TransientRetry,
    HardFailure,
}

/// Exit-code sets configured per controller instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRules {
    pub killed_by_scheduler_code: i32,
    pub defer_to_other_large_codes: BTreeSet<i32>,
    pub retry_locally_with_large_codes: BTreeSet<i32>,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self {
            killed_by_scheduler_code: DEFAULT_KILLED_BY_SCHEDULER_CODE,
            defer_to_other_large_codes: BTreeSet::new(),
            retry_locally_with_large_codes: BTreeSet::new(),
        }
    }
}

impl ClassificationRules {
    pub fn classify(&self, exit_code: i32) -> StatusClass {
        if exit_code == 0 {
            StatusClass::Success
        } else if exit_code == self.killed_by_scheduler_code {
            StatusClass::KilledByScheduler
        } else if self.defer_to_other_large_codes.contains(&exit_code) {
            StatusClass::DeferToLarge
        } else if self.retry_locally_with_large_codes.contains(&exit_code) {
            StatusClass::TransientRetry
        } else {
            StatusClass::HardFailure
        }
    }
}
