use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::metadata::PipelineMetadata;
use crate::types::jobs::definition::{GL_WITNESS_TEMPLATE, INPROGRESS_SUFFIX_PREFIX, LPP_WITNESS_TEMPLATE};
use crate::types::jobs::template::FilenameTemplate;
use crate::types::jobs::{FilenameFields, JobDefinition, JobName, Tag};

/// Where every artifact of the distributed pipeline lives, derived from the job catalog.
///
/// Stages never take directories on the command line: a witness written by bootstrap lands in
/// the request directory of the GL or LPP job type, and every rendezvous path recorded in the
/// metadata is the final output path of the job that produces it.
#[derive(Debug, Clone)]
pub struct PipelineLayout {
    catalog: BTreeMap<JobName, Arc<JobDefinition>>,
    gl_witness: FilenameTemplate,
    lpp_witness: FilenameTemplate,
}

impl PipelineLayout {
    pub fn new(catalog: BTreeMap<JobName, Arc<JobDefinition>>) -> PipelineResult<Self> {
        for name in [JobName::Gl, JobName::RandomnessBeacon, JobName::Lpp] {
            if !catalog.contains_key(&name) {
                return Err(PipelineError::InvalidRequest(format!("no `jobs.{name}` section, cannot lay out the pipeline")));
            }
        }
        let template = |raw: &str| {
            FilenameTemplate::parse(raw).map_err(|e| PipelineError::InvalidRequest(format!("witness template: {e}")))
        };
        Ok(Self { gl_witness: template(GL_WITNESS_TEMPLATE)?, lpp_witness: template(LPP_WITNESS_TEMPLATE)?, catalog })
    }

    fn definition(&self, name: JobName) -> PipelineResult<&JobDefinition> {
        self.catalog
            .get(&name)
            .map(Arc::as_ref)
            .ok_or_else(|| PipelineError::InvalidRequest(format!("no `jobs.{name}` section")))
    }

    /// Fields of a stage input, read from its file name. The in-progress suffix added by the
    /// controller is ignored.
    pub fn request_fields(&self, name: JobName, index: usize, path: &Path) -> PipelineResult<FilenameFields> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::InvalidRequest(format!("{} has no file name", path.display())))?;
        let file_name = file_name.find(INPROGRESS_SUFFIX_PREFIX).map_or(file_name, |pos| &file_name[..pos]);
        self.definition(name)?
            .parse(index, file_name)
            .map(|parsed| parsed.fields)
            .ok_or_else(|| PipelineError::InvalidRequest(format!("{file_name} is not a {name} request")))
    }

    /// Names of the `job` request files a worker already took: locked in the request directory or
    /// moved to the done directory.
    pub async fn claimed_requests(&self, job: JobName) -> PipelineResult<Vec<String>> {
        let spec = &self.definition(job)?.inputs[0];
        let mut claimed: Vec<String> = list_names(&spec.request_dir)
            .await?
            .into_iter()
            .filter(|name| name.contains(INPROGRESS_SUFFIX_PREFIX))
            .collect();
        claimed.extend(list_names(&spec.done_dir).await?);
        Ok(claimed)
    }

    pub fn gl_witness_path(&self, fields: &FilenameFields, segment: u32) -> PipelineResult<PathBuf> {
        let dir = &self.definition(JobName::Gl)?.inputs[0].request_dir;
        Ok(dir.join(self.gl_witness.render(&segment_fields(fields, segment))))
    }

    pub fn lpp_witness_path(&self, fields: &FilenameFields, segment: u32) -> PipelineResult<PathBuf> {
        let dir = &self.definition(JobName::Lpp)?.inputs[0].request_dir;
        Ok(dir.join(self.lpp_witness.render(&segment_fields(fields, segment))))
    }

    pub fn gl_subproof_path(&self, fields: &FilenameFields, segment: u32) -> PipelineResult<PathBuf> {
        Ok(self.definition(JobName::Gl)?.outputs[0].path_for(&segment_fields(fields, segment)))
    }

    pub fn commitment_path(&self, fields: &FilenameFields, segment: u32) -> PipelineResult<PathBuf> {
        Ok(self.definition(JobName::Gl)?.outputs[1].path_for(&segment_fields(fields, segment)))
    }

    pub fn lpp_subproof_path(&self, fields: &FilenameFields, segment: u32) -> PipelineResult<PathBuf> {
        Ok(self.definition(JobName::Lpp)?.outputs[0].path_for(&segment_fields(fields, segment)))
    }

    pub fn shared_randomness_path(&self, fields: &FilenameFields) -> PipelineResult<PathBuf> {
        Ok(self.definition(JobName::RandomnessBeacon)?.outputs[0].path_for(&range_fields(fields)))
    }

    /// Metadata of the conflation described by `fields`, with `num_gl` and `num_lpp` modules.
    pub fn metadata(&self, fields: &FilenameFields, num_gl: usize, num_lpp: usize) -> PipelineResult<PipelineMetadata> {
        let segments = |count: usize| 0..count as u32;
        Ok(PipelineMetadata {
            start_block: fields.start,
            end_block: fields.end,
            num_gl,
            num_lpp,
            gl_subproof_files: segments(num_gl).map(|s| self.gl_subproof_path(fields, s)).collect::<Result<_, _>>()?,
            lpp_subproof_files: segments(num_lpp).map(|s| self.lpp_subproof_path(fields, s)).collect::<Result<_, _>>()?,
            commitment_files: segments(num_gl).map(|s| self.commitment_path(fields, s)).collect::<Result<_, _>>()?,
            shared_randomness_file: self.shared_randomness_path(fields)?,
        })
    }
}

async fn list_names(dir: &Path) -> PipelineResult<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::io(dir, e)),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| PipelineError::io(dir, e))? {
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}

/// Range and version tags only: the large marker and failure history never reach derived names.
fn range_fields(fields: &FilenameFields) -> FilenameFields {
    let mut tags = fields.tags.clone();
    tags.remove(&Tag::Seg);
    FilenameFields { start: fields.start, end: fields.end, tags, large: false, failures: Vec::new() }
}

fn segment_fields(fields: &FilenameFields, segment: u32) -> FilenameFields {
    range_fields(fields).with_tag(Tag::Seg, segment.to_string())
}
