use std::path::PathBuf;
use std::sync::Arc;

use crate::types::jobs::definition::{
    FilenameFields, JobDefinition, JobName, FAILURE_SUFFIX_PREFIX, INPROGRESS_SUFFIX_PREFIX, LARGE_SUFFIX,
    PARTIAL_SUCCESS_SUFFIX, SUCCESS_SUFFIX,
};

/// One input file of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInput {
    pub request_dir: PathBuf,
    pub done_dir: PathBuf,
    pub original_name: String,
    /// Set once the file has been renamed to its in-progress name.
    pub locked_name: Option<String>,
    pub fields: FilenameFields,
    /// `original_name` without the large marker and failure suffixes.
    pub stem: String,
}

impl JobInput {
    pub fn original_path(&self) -> PathBuf {
        self.request_dir.join(&self.original_name)
    }

    /// Path of the file as it is on disk right now.
    pub fn current_path(&self) -> PathBuf {
        self.request_dir.join(self.locked_name.as_deref().unwrap_or(&self.original_name))
    }

    pub fn lock_name(&self, local_id: &str) -> String {
        format!("{}{INPROGRESS_SUFFIX_PREFIX}{local_id}", self.original_name)
    }

    /// Done-directory path after a successful run. Failure history is dropped, the large marker kept.
    pub fn success_path(&self) -> PathBuf {
        let large = if self.fields.large { LARGE_SUFFIX } else { "" };
        self.done_dir.join(format!("{}{large}{SUCCESS_SUFFIX}", self.stem))
    }

    /// Done-directory path after a hard failure. Every previous suffix is kept.
    pub fn failure_path(&self, exit_code: i32) -> PathBuf {
        self.done_dir.join(format!("{}{FAILURE_SUFFIX_PREFIX}{exit_code}", self.original_name))
    }

    /// Request-directory path of a bootstrap request whose conflation is still being proved.
    pub fn partial_success_path(&self) -> PathBuf {
        self.request_dir.join(format!("{}{PARTIAL_SUCCESS_SUFFIX}", self.original_name))
    }

    /// Request-directory path that hands the job to a large-capacity worker.
    pub fn defer_to_large_path(&self, exit_code: i32) -> PathBuf {
        self.request_dir.join(format!("{}{LARGE_SUFFIX}{FAILURE_SUFFIX_PREFIX}{exit_code}", self.stem))
    }
}

/// A concrete unit of work, built from matched file names during one scheduling pass.
#[derive(Debug, Clone)]
pub struct Job {
    pub definition: Arc<JobDefinition>,
    /// One per input of the definition, all covering the same block range.
    pub inputs: Vec<JobInput>,
}

impl Job {
    pub fn name(&self) -> JobName {
        self.definition.name
    }

    /// Fields of the first input. They drive output naming and ordering.
    pub fn fields(&self) -> &FilenameFields {
        &self.inputs[0].fields
    }

    pub fn start(&self) -> u64 {
        self.fields().start
    }

    pub fn end(&self) -> u64 {
        self.fields().end
    }

    pub fn is_large(&self) -> bool {
        self.fields().large
    }

    /// Lower is better: block range first, job type priority breaks ties.
    pub fn score(&self) -> u64 {
        100 * self.end() + u64::from(self.definition.priority)
    }

    pub fn is_locked(&self) -> bool {
        self.inputs.iter().all(|input| input.locked_name.is_some())
    }

    /// Paths handed to the worker command. Only meaningful once locked.
    pub fn input_paths(&self) -> Vec<PathBuf> {
        self.inputs.iter().map(JobInput::current_path).collect()
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.definition.outputs.iter().map(|output| output.path_for(self.fields())).collect()
    }

    /// Temporary output paths, hidden from every pattern by the leading dot and owned by `local_id`.
    pub fn tmp_output_paths(&self, local_id: &str) -> Vec<PathBuf> {
        self.definition
            .outputs
            .iter()
            .map(|output| output.dir.join(format!(".tmp.{}.{local_id}", output.template.render(self.fields()))))
            .collect()
    }

    pub fn display_name(&self) -> &str {
        &self.inputs[0].original_name
    }
}
