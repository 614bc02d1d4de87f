//! Terminal filesystem transitions of a locked job.
//!
//! Every failure here is logged and left on disk: the in-progress file is a valid, inspectable
//! state, so nothing is retried automatically.

use std::path::Path;

use tracing::{error, info, warn};

use crate::error::TransitionError;
use crate::types::jobs::{ClassificationRules, Job, Status, StatusClass};
use crate::utils::fs::{remove_if_exists, rename_no_replace};
use crate::utils::metrics::CONTROLLER_METRICS;

/// Action actually taken for a status, after the job type and large marker are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Success,
    /// Outputs published, the request left in place for a later verdict on the conflation.
    PartialSuccess,
    DeferToLarge,
    Requeue,
    Failure,
}

impl Transition {
    pub fn for_status(job: &Job, status: Status, rules: &ClassificationRules) -> Self {
        match status.classify(rules) {
            StatusClass::Success => Transition::Success,
            StatusClass::KilledByScheduler => Transition::Requeue,
            StatusClass::DeferToLarge if job.definition.allow_large_escalation && !job.is_large() => {
                Transition::DeferToLarge
            }
            _ => Transition::Failure,
        }
    }
}

/// Applies the transition matching `status` to a locked job.
pub fn finalize(job: &Job, status: Status, rules: &ClassificationRules, local_id: &str) -> Transition {
    apply(job, Transition::for_status(job, status, rules), status, local_id)
}

/// Applies `transition` to a locked job that ended with `status`.
pub fn apply(job: &Job, transition: Transition, status: Status, local_id: &str) -> Transition {
    let result = match transition {
        Transition::Success => succeed(job, local_id),
        Transition::PartialSuccess => succeed_partially(job, local_id),
        Transition::DeferToLarge => defer_to_large(job, status.exit_code, local_id),
        Transition::Requeue => requeue(job, local_id),
        Transition::Failure => fail(job, status.exit_code, local_id),
    };
    if let Err(e) = result {
        CONTROLLER_METRICS.transition_failures.add(1, &[]);
        error!(
            job = %job.name(),
            file = %job.display_name(),
            error = %e,
            "Terminal transition failed, manual intervention required"
        );
    }
    transition
}

fn succeed(job: &Job, local_id: &str) -> Result<(), TransitionError> {
    for (tmp, output) in job.tmp_output_paths(local_id).iter().zip(job.output_paths()) {
        rename(tmp, &output)?;
    }
    for input in &job.inputs {
        rename(&input.current_path(), &input.success_path())?;
    }
    info!(job = %job.name(), file = %job.display_name(), "Job succeeded");
    Ok(())
}

fn succeed_partially(job: &Job, local_id: &str) -> Result<(), TransitionError> {
    for (tmp, output) in job.tmp_output_paths(local_id).iter().zip(job.output_paths()) {
        rename(tmp, &output)?;
    }
    for input in &job.inputs {
        rename(&input.current_path(), &input.partial_success_path())?;
    }
    info!(job = %job.name(), file = %job.display_name(), "Job succeeded, request kept until the conflation is proved");
    Ok(())
}

fn defer_to_large(job: &Job, exit_code: i32, local_id: &str) -> Result<(), TransitionError> {
    discard_outputs(job, local_id);
    for input in &job.inputs {
        rename(&input.current_path(), &input.defer_to_large_path(exit_code))?;
    }
    info!(job = %job.name(), file = %job.display_name(), exit_code, "Job deferred to a large worker");
    Ok(())
}

fn fail(job: &Job, exit_code: i32, local_id: &str) -> Result<(), TransitionError> {
    discard_outputs(job, local_id);
    for input in &job.inputs {
        rename(&input.current_path(), &input.failure_path(exit_code))?;
    }
    warn!(job = %job.name(), file = %job.display_name(), exit_code, "Job failed");
    Ok(())
}

/// Puts every input back under its original name, as if the job had never been attempted.
pub fn requeue(job: &Job, local_id: &str) -> Result<(), TransitionError> {
    discard_outputs(job, local_id);
    for input in &job.inputs {
        rename(&input.current_path(), &input.original_path())?;
    }
    info!(job = %job.name(), file = %job.display_name(), "Job requeued");
    Ok(())
}

/// Removes temporary outputs of an attempt that reached no verdict or failed.
pub fn discard_outputs(job: &Job, local_id: &str) {
    for tmp in job.tmp_output_paths(local_id) {
        if let Err(source) = remove_if_exists(&tmp) {
            warn!(error = %TransitionError::Remove { path: tmp, source }, "Failed to discard partial output");
        }
    }
}

pub(crate) fn rename(from: &Path, to: &Path) -> Result<(), TransitionError> {
    rename_no_replace(from, to).map_err(|source| TransitionError::Rename {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}
