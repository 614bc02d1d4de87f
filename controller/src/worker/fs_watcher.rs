use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::error::FsWatcherError;
use crate::types::jobs::definition::{FAILURE_SUFFIX_PREFIX, INPROGRESS_SUFFIX_PREFIX, LARGE_SUFFIX};
use crate::types::jobs::{Job, JobDefinition, JobInput};
use crate::utils::fs::rename_no_replace;
use crate::utils::metrics::CONTROLLER_METRICS;

/// Scans the request directories of every definition and locks the best job by renaming it.
#[derive(Debug, Clone)]
pub struct FsWatcher {
    local_id: String,
    definitions: Vec<Arc<JobDefinition>>,
}

impl FsWatcher {
    pub fn new(local_id: impl Into<String>, definitions: Vec<Arc<JobDefinition>>) -> Self {
        Self { local_id: local_id.into(), definitions }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn definitions(&self) -> &[Arc<JobDefinition>] {
        &self.definitions
    }

    /// Returns the best job this worker managed to lock, or `None` when there is nothing to do
    /// or every candidate was taken by another worker first.
    pub fn get_best(&self) -> Option<Job> {
        let mut candidates = self.list_candidates();
        candidates.sort_by(|a, b| a.score().cmp(&b.score()).then_with(|| a.display_name().cmp(b.display_name())));

        for mut job in candidates {
            match self.try_lock(&mut job) {
                Ok(()) => {
                    debug!(job = %job.name(), file = %job.display_name(), "Locked job");
                    return Some(job);
                }
                Err(e) => {
                    // Another worker won the race, nothing to report
                    trace!(job = %job.name(), error = %e, "Lost lock race, trying next candidate");
                }
            }
        }
        None
    }

    /// Every job currently offered by the request directories, unlocked and unsorted.
    pub fn list_candidates(&self) -> Vec<Job> {
        let mut candidates = Vec::new();
        for definition in &self.definitions {
            match Self::candidates_for(definition) {
                Ok(jobs) => {
                    CONTROLLER_METRICS.record_queue_depth(definition.name, jobs.len());
                    candidates.extend(jobs);
                }
                Err(e) => warn!(job = %definition.name, error = %e, "Skipping job type for this scan"),
            }
        }
        candidates
    }

    fn candidates_for(definition: &Arc<JobDefinition>) -> Result<Vec<Job>, FsWatcherError> {
        // Matched inputs of each directory, in name order
        let mut per_input: Vec<Vec<JobInput>> = Vec::with_capacity(definition.inputs.len());
        for (index, spec) in definition.inputs.iter().enumerate() {
            let mut matched = Vec::new();
            for name in list_file_names(&spec.request_dir)? {
                if let Some(parsed) = definition.parse(index, &name) {
                    matched.push(JobInput {
                        request_dir: spec.request_dir.clone(),
                        done_dir: spec.done_dir.clone(),
                        original_name: name,
                        locked_name: None,
                        fields: parsed.fields,
                        stem: parsed.stem,
                    });
                }
            }
            per_input.push(matched);
        }

        let mut inputs = per_input.into_iter();
        let Some(primary) = inputs.next() else { return Ok(Vec::new()) };
        let others: Vec<Vec<JobInput>> = inputs.collect();

        // Join on the block range: a job exists only if every input is present
        let jobs = primary
            .into_iter()
            .filter_map(|first| {
                let range = (first.fields.start, first.fields.end);
                let mut job_inputs = vec![first];
                for candidates in &others {
                    let sibling = candidates.iter().find(|c| (c.fields.start, c.fields.end) == range)?;
                    job_inputs.push(sibling.clone());
                }
                Some(Job { definition: definition.clone(), inputs: job_inputs })
            })
            .collect();
        Ok(jobs)
    }

    /// Renames every input to its in-progress name. On a partial failure the inputs already
    /// renamed are moved back, so a job is either fully locked or not locked at all.
    pub fn try_lock(&self, job: &mut Job) -> Result<(), FsWatcherError> {
        for index in 0..job.inputs.len() {
            let input = &job.inputs[index];
            let locked_name = input.lock_name(&self.local_id);
            let from = input.original_path();
            let to = input.request_dir.join(&locked_name);
            if let Err(source) = rename_no_replace(&from, &to) {
                self.rollback(job, index);
                return Err(FsWatcherError::Lock { path: from, source });
            }
            job.inputs[index].locked_name = Some(locked_name);
        }
        Ok(())
    }

    fn rollback(&self, job: &mut Job, locked_count: usize) {
        for input in job.inputs[..locked_count].iter_mut().rev() {
            let locked = input.current_path();
            let original = input.original_path();
            match rename_no_replace(&locked, &original) {
                Ok(()) => input.locked_name = None,
                Err(e) => error!(
                    from = %locked.display(),
                    to = %original.display(),
                    error = %e,
                    "Failed to roll back partial lock, manual intervention required"
                ),
            }
        }
    }

    /// Creates the request, done and output directories of every definition.
    pub fn prepare_dirs(&self) {
        let dirs = self.definitions.iter().flat_map(|definition| {
            let inputs = definition.inputs.iter().flat_map(|spec| [&spec.request_dir, &spec.done_dir]);
            inputs.chain(definition.outputs.iter().map(|output| &output.dir))
        });
        for dir in dirs {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "Failed to create job directory");
            }
        }
    }

    /// Restores the files this worker id left in progress, e.g. after a crash.
    /// Job types that can escalate are requeued as large, the rest under their original name.
    pub fn recover_dangling(&self) -> usize {
        let suffix = format!("{INPROGRESS_SUFFIX_PREFIX}{}", self.local_id);
        let mut recovered = 0;
        // A request dir may be shared by several definitions, visit each once
        let mut dirs: BTreeMap<PathBuf, bool> = BTreeMap::new();
        for definition in &self.definitions {
            for spec in &definition.inputs {
                let escalate = dirs.entry(spec.request_dir.clone()).or_insert(false);
                *escalate |= definition.allow_large_escalation;
            }
        }

        for (dir, escalate) in dirs {
            let names = match list_file_names(&dir) {
                Ok(names) => names,
                Err(e) => {
                    warn!(error = %e, "Skipping dangling file recovery for directory");
                    continue;
                }
            };
            for name in names {
                let Some(original) = name.strip_suffix(&suffix) else { continue };
                let restored = if escalate && !original.contains(LARGE_SUFFIX) {
                    large_name(original)
                } else {
                    original.to_string()
                };
                match rename_no_replace(&dir.join(&name), &dir.join(&restored)) {
                    Ok(()) => {
                        info!(from = %name, to = %restored, "Recovered dangling in-progress file");
                        recovered += 1;
                    }
                    Err(e) => error!(file = %name, error = %e, "Failed to recover dangling in-progress file"),
                }
            }
        }
        recovered
    }
}

/// Inserts the large marker before any failure suffixes.
fn large_name(original: &str) -> String {
    match original.find(FAILURE_SUFFIX_PREFIX) {
        Some(pos) => format!("{}{LARGE_SUFFIX}{}", &original[..pos], &original[pos..]),
        None => format!("{original}{LARGE_SUFFIX}"),
    }
}

/// Names of the regular files directly inside `dir`, sorted.
fn list_file_names(dir: &Path) -> Result<Vec<String>, FsWatcherError> {
    let read_dir = |source| FsWatcherError::ReadDir { dir: dir.to_path_buf(), source };
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_dir)? {
        let entry = entry.map_err(read_dir)?;
        // Files may vanish under concurrent workers
        let Ok(file_type) = entry.file_type() else { continue };
        if !file_type.is_file() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
