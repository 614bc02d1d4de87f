//! Bookkeeping shared by the distributed jobs of one conflation.
//!
//! The jobs of a conflation run on different workers. A real failure of one of them leaves a shared
//! failure marker so the remaining jobs of the range are not started, and the bootstrap request
//! waits in its request directory until the conflation is settled one way or the other.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::pipeline::shared_failure::SharedFailures;
use crate::types::jobs::definition::{FAILURE_SUFFIX_PREFIX, PARTIAL_SUCCESS_SUFFIX, SUCCESS_SUFFIX};
use crate::types::jobs::status::PEER_ABORT_CODE;
use crate::types::jobs::{Job, JobDefinition, JobName, Status};
use crate::utils::fs::remove_if_exists;
use crate::worker::transition::{self, Transition};

/// Whether a locked job may run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Run,
    /// A peer already failed the conflation.
    Skip { markers: Vec<String> },
    /// The job could not be prepared and goes back to its queue untouched.
    Requeue,
}

#[derive(Debug)]
pub struct ConflationBookkeeping {
    failures: SharedFailures,
    /// Request and done directories of the bootstrap job.
    bootstrap_dirs: Vec<(PathBuf, PathBuf)>,
    /// Directories holding the intermediate artifacts of a conflation.
    artifact_dirs: Vec<PathBuf>,
}

impl ConflationBookkeeping {
    pub fn new(failures: SharedFailures, bootstrap_dirs: Vec<(PathBuf, PathBuf)>, artifact_dirs: Vec<PathBuf>) -> Self {
        Self { failures, bootstrap_dirs, artifact_dirs }
    }

    /// Directories of every configured pipeline job. The final proof directory and the bootstrap
    /// directories never hold intermediate artifacts.
    pub fn from_catalog(failures: SharedFailures, catalog: &BTreeMap<JobName, Arc<JobDefinition>>) -> Self {
        let bootstrap_dirs: Vec<(PathBuf, PathBuf)> = catalog
            .get(&JobName::Bootstrap)
            .map(|definition| {
                definition.inputs.iter().map(|spec| (spec.request_dir.clone(), spec.done_dir.clone())).collect()
            })
            .unwrap_or_default();

        let mut artifact_dirs = BTreeSet::new();
        for name in [JobName::Gl, JobName::RandomnessBeacon, JobName::Lpp, JobName::Conglomeration] {
            let Some(definition) = catalog.get(&name) else { continue };
            for spec in &definition.inputs {
                artifact_dirs.insert(spec.request_dir.clone());
                artifact_dirs.insert(spec.done_dir.clone());
            }
            if name != JobName::Conglomeration {
                artifact_dirs.extend(definition.outputs.iter().map(|output| output.dir.clone()));
            }
        }
        artifact_dirs.retain(|dir| !bootstrap_dirs.iter().any(|(requests, done)| dir == requests || dir == done));

        Self::new(failures, bootstrap_dirs, artifact_dirs.into_iter().collect())
    }

    pub fn failures(&self) -> &SharedFailures {
        &self.failures
    }

    /// Decides whether a locked job runs. A bootstrap starts a new attempt: the markers of its range
    /// and the artifacts of the failed attempt are removed first.
    pub fn admit(&self, job: &Job) -> Admission {
        let name = job.name();
        if !name.is_distributed() {
            return Admission::Run;
        }
        let (start, end) = (job.start(), job.end());

        if name == JobName::Bootstrap {
            return match self.pre_clean(start, end) {
                Ok(()) => Admission::Run,
                Err(e) => {
                    error!(error = %e, "Failed to clear the previous attempt of the conflation");
                    Admission::Requeue
                }
            };
        }

        match self.failures.markers(start, end) {
            Ok(markers) if markers.is_empty() => Admission::Run,
            Ok(markers) => Admission::Skip { markers },
            Err(e) => {
                // Waiting stages check the markers again
                error!(dir = %self.failures.dir().display(), error = %e, "Failed to read the shared failure markers");
                Admission::Run
            }
        }
    }

    fn pre_clean(&self, start: u64, end: u64) -> io::Result<()> {
        let cleared = self.failures.clear(start, end)?;
        if cleared == 0 {
            return Ok(());
        }
        let prefix = format!("{start}-{end}-");
        let mut removed = 0;
        for dir in &self.artifact_dirs {
            removed += remove_prefixed(dir, &prefix)?;
        }
        info!(markers = cleared, artifacts = removed, "Cleared the failed attempt of the conflation");
        Ok(())
    }

    /// Propagates the outcome of a finished pipeline job.
    pub fn record(&self, job: &Job, transition: Transition, status: Status) {
        let name = job.name();
        if !name.is_distributed() {
            return;
        }
        let (start, end) = (job.start(), job.end());

        if transition == Transition::Failure && status.exit_code != PEER_ABORT_CODE && name != JobName::Conglomeration {
            if let Err(e) = self.failures.mark(name, start, end, status.exit_code) {
                error!(dir = %self.failures.dir().display(), error = %e, "Failed to write the shared failure marker");
            }
        }

        match (name, transition) {
            (JobName::Conglomeration, Transition::Success) => self.settle(start, end, SUCCESS_SUFFIX),
            (JobName::Bootstrap, _) => {}
            (_, Transition::Failure) => {
                self.settle(start, end, &format!("{FAILURE_SUFFIX_PREFIX}{}", status.exit_code));
            }
            _ => {}
        }
    }

    /// Moves the partially successful bootstrap request of the range to its done directory.
    fn settle(&self, start: u64, end: u64, suffix: &str) {
        let prefix = format!("{start}-{end}-");
        for (requests, done) in &self.bootstrap_dirs {
            let names = match list_names(requests) {
                Ok(names) => names,
                Err(e) => {
                    error!(dir = %requests.display(), error = %e, "Failed to list bootstrap requests");
                    continue;
                }
            };
            let pending = names
                .iter()
                .filter(|name| name.starts_with(&prefix))
                .find_map(|name| name.strip_suffix(PARTIAL_SUCCESS_SUFFIX).map(|base| (name, base)));
            if let Some((name, base)) = pending {
                let target = done.join(format!("{base}{suffix}"));
                match transition::rename(&requests.join(name), &target) {
                    Ok(()) => info!(file = %target.display(), "Conflation settled"),
                    Err(e) => error!(error = %e, "Failed to settle the bootstrap request"),
                }
                return;
            }
        }
        debug!(start, end, "No bootstrap request waiting for this conflation");
    }
}

fn list_names(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut names = Vec::new();
    for entry in entries {
        if let Ok(name) = entry?.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}

fn remove_prefixed(dir: &Path, prefix: &str) -> io::Result<usize> {
    let mut removed = 0;
    for name in list_names(dir)?.into_iter().filter(|name| name.starts_with(prefix)) {
        let path = dir.join(&name);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                remove_if_exists(&path)?;
                removed += 1;
            }
            Ok(_) => warn!(path = %path.display(), "Not a file, left in place"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}
