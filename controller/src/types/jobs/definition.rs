use std::collections::BTreeMap;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{ControllerError, ControllerResult};
use crate::types::jobs::template::FilenameTemplate;

pub const REQUESTS_DIR: &str = "requests";
pub const REQUESTS_DONE_DIR: &str = "requests-done";
pub const RESPONSES_DIR: &str = "responses";

pub const LARGE_SUFFIX: &str = ".large";
pub const FAILURE_SUFFIX_PREFIX: &str = ".failure.code_";
pub const SUCCESS_SUFFIX: &str = ".success";
pub const INPROGRESS_SUFFIX_PREFIX: &str = ".inprogress.";
/// Kept by a bootstrap request until the conglomeration of its conflation reaches a verdict.
pub const PARTIAL_SUCCESS_SUFFIX: &str = ".bootstrap.partial.success";

/// Every job type the controller knows how to schedule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString, EnumIter, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobName {
    Execution,
    Compression,
    Aggregation,
    Bootstrap,
    Gl,
    RandomnessBeacon,
    Lpp,
    Conglomeration,
}

const EXECUTION_BODY: &str = r"(?:etv(?P<etv>[^-]*)-)?(?:stv(?P<stv>[^-]*)-)?getZkProof\.json";
const COMPRESSION_BODY: &str = r"(?:bcv(?P<bcv>[^-]*)-)?(?:ccv(?P<ccv>[^-]*)-)?(?:(?P<hash>0x[0-9a-fA-F]*|[0-9a-fA-F]+)-)?getZkBlobCompressionProof\.json";
const AGGREGATION_BODY: &str = r"(?P<hash>0x[0-9a-fA-F]*|[0-9a-fA-F]+)-getZkAggregatedProof\.json";
const GL_WITNESS_BODY: &str = r"etv(?P<etv>[^-]*)-stv(?P<stv>[^-]*)-seg(?P<seg>\d+)-getZkProof_GLWitness\.bin";
const LPP_WITNESS_BODY: &str = r"etv(?P<etv>[^-]*)-stv(?P<stv>[^-]*)-seg(?P<seg>\d+)-getZkProof_LPPWitness\.bin";
const METADATA_BODY: &str = r"etv(?P<etv>[^-]*)-stv(?P<stv>[^-]*)-getZkProof_DistMetadata\.json";
const BEACON_RECORD_BODY: &str = r"etv(?P<etv>[^-]*)-stv(?P<stv>[^-]*)-getZkProof_RndBeacon\.bin";

pub const GL_WITNESS_TEMPLATE: &str = "{{start}}-{{end}}-etv{{etv}}-stv{{stv}}-seg{{seg}}-getZkProof_GLWitness.bin";
pub const LPP_WITNESS_TEMPLATE: &str = "{{start}}-{{end}}-etv{{etv}}-stv{{stv}}-seg{{seg}}-getZkProof_LPPWitness.bin";
const METADATA_TEMPLATE: &str = "{{start}}-{{end}}-etv{{etv}}-stv{{stv}}-getZkProof_DistMetadata.json";

impl JobName {
    /// One file-name body pattern per input directory, matched after `<start>-<end>-`.
    fn input_bodies(&self) -> &'static [&'static str] {
        match self {
            JobName::Execution | JobName::Bootstrap => &[EXECUTION_BODY],
            JobName::Compression => &[COMPRESSION_BODY],
            JobName::Aggregation => &[AGGREGATION_BODY],
            JobName::Gl => &[GL_WITNESS_BODY],
            JobName::RandomnessBeacon => &[METADATA_BODY],
            JobName::Lpp => &[LPP_WITNESS_BODY],
            JobName::Conglomeration => &[METADATA_BODY, BEACON_RECORD_BODY],
        }
    }

    /// One file-name template per output artifact.
    pub fn output_templates(&self) -> &'static [&'static str] {
        match self {
            JobName::Execution | JobName::Conglomeration => &["{{start}}-{{end}}-getZkProof.json"],
            JobName::Compression => &["{{start}}-{{end}}-{{hash-}}getZkBlobCompressionProof.json"],
            JobName::Aggregation => &["{{start}}-{{end}}-{{hash}}-getZkAggregatedProof.json"],
            JobName::Bootstrap => &[METADATA_TEMPLATE, METADATA_TEMPLATE],
            JobName::Gl => &[
                "{{start}}-{{end}}-etv{{etv}}-stv{{stv}}-seg{{seg}}-getZkProof_GL.bin",
                "{{start}}-{{end}}-etv{{etv}}-stv{{stv}}-seg{{seg}}-getZkProof_GLCommitment.bin",
            ],
            JobName::RandomnessBeacon => &[
                "{{start}}-{{end}}-etv{{etv}}-stv{{stv}}-getZkProof_SharedRandomness.bin",
                "{{start}}-{{end}}-etv{{etv}}-stv{{stv}}-getZkProof_RndBeacon.bin",
            ],
            JobName::Lpp => &["{{start}}-{{end}}-etv{{etv}}-stv{{stv}}-seg{{seg}}-getZkProof_LPP.bin"],
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.input_bodies().len()
    }

    pub fn num_outputs(&self) -> usize {
        self.output_templates().len()
    }

    pub fn default_priority(&self) -> u32 {
        match self {
            JobName::Execution | JobName::Bootstrap => 0,
            JobName::Compression | JobName::Gl => 1,
            JobName::Aggregation | JobName::RandomnessBeacon => 2,
            JobName::Lpp => 3,
            JobName::Conglomeration => 4,
        }
    }

    /// Whether the job is one stage of the distributed proof of a conflation.
    pub fn is_distributed(&self) -> bool {
        matches!(
            self,
            JobName::Bootstrap | JobName::Gl | JobName::RandomnessBeacon | JobName::Lpp | JobName::Conglomeration
        )
    }

    /// Whether a failed job of this type may be handed over to a large-capacity worker.
    pub fn supports_large_escalation(&self) -> bool {
        matches!(self, JobName::Execution | JobName::Bootstrap)
    }
}

/// Opaque version/content tags carried by file names. Propagated, never interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Tag {
    Etv,
    Stv,
    Bcv,
    Ccv,
    Hash,
    Seg,
}

/// Fields extracted from a file name matched by a job definition pattern.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilenameFields {
    pub start: u64,
    pub end: u64,
    pub tags: BTreeMap<Tag, String>,
    pub large: bool,
    /// Exit codes of previous failed attempts, oldest first.
    pub failures: Vec<i32>,
}

impl FilenameFields {
    pub fn tag(&self, tag: Tag) -> Option<&str> {
        self.tags.get(&tag).map(String::as_str)
    }

    pub fn with_tag(mut self, tag: Tag, value: impl Into<String>) -> Self {
        self.tags.insert(tag, value.into());
        self
    }

    pub fn segment_index(&self) -> Option<u32> {
        self.tag(Tag::Seg).and_then(|seg| seg.parse().ok())
    }
}

/// A matched input file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub fields: FilenameFields,
    /// The name without the large marker and failure suffixes.
    pub stem: String,
}

#[derive(Debug, Clone)]
pub struct InputSpec {
    pub request_dir: PathBuf,
    pub done_dir: PathBuf,
    pub pattern: Regex,
}

#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub dir: PathBuf,
    pub template: FilenameTemplate,
}

impl OutputSpec {
    pub fn path_for(&self, fields: &FilenameFields) -> PathBuf {
        self.dir.join(self.template.render(fields))
    }
}

/// Static descriptor of one job type as seen by this worker instance.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub name: JobName,
    /// Lower is served first among jobs ending at the same block.
    pub priority: u32,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    /// This instance only accepts large-marked inputs, and only those.
    pub large_mode: bool,
    pub allow_large_escalation: bool,
}

impl JobDefinition {
    /// Builds a definition from one root directory per input and one directory per output.
    /// Each input root provides `requests/` and `requests-done/`.
    pub fn new(
        name: JobName,
        priority: u32,
        request_roots: &[PathBuf],
        output_dirs: &[PathBuf],
        large_mode: bool,
    ) -> ControllerResult<Self> {
        if request_roots.len() != name.num_inputs() {
            return Err(ControllerError::ConfigError(format!(
                "job {name} needs {} request root dirs, got {}",
                name.num_inputs(),
                request_roots.len()
            )));
        }
        if output_dirs.len() != name.num_outputs() {
            return Err(ControllerError::ConfigError(format!(
                "job {name} needs {} response dirs, got {}",
                name.num_outputs(),
                output_dirs.len()
            )));
        }

        let inputs = name
            .input_bodies()
            .iter()
            .zip(request_roots)
            .map(|(body, root)| {
                Ok(InputSpec {
                    request_dir: root.join(REQUESTS_DIR),
                    done_dir: root.join(REQUESTS_DONE_DIR),
                    pattern: build_pattern(body, large_mode)?,
                })
            })
            .collect::<ControllerResult<Vec<_>>>()?;

        let outputs = name
            .output_templates()
            .iter()
            .zip(output_dirs)
            .map(|(template, dir)| Ok(OutputSpec { dir: dir.clone(), template: FilenameTemplate::parse(template)? }))
            .collect::<ControllerResult<Vec<_>>>()?;

        Ok(Self {
            name,
            priority,
            inputs,
            outputs,
            large_mode,
            allow_large_escalation: name.supports_large_escalation(),
        })
    }

    /// Parses `filename` with the pattern of input `index`. Returns `None` when it does not match,
    /// including names whose block numbers or failure codes overflow their integer type.
    pub fn parse(&self, index: usize, filename: &str) -> Option<ParsedFilename> {
        let captures = self.inputs.get(index)?.pattern.captures(filename)?;

        let start: u64 = captures.name("start")?.as_str().parse().ok()?;
        let end: u64 = captures.name("end")?.as_str().parse().ok()?;

        let tags = Tag::iter()
            .filter_map(|tag| {
                let name: &'static str = tag.into();
                captures
                    .name(name)
                    .filter(|m| !m.as_str().is_empty())
                    .map(|m| (tag, m.as_str().to_string()))
            })
            .collect();

        let failures_match = captures.name("failures")?;
        let failures = failures_match
            .as_str()
            .split(FAILURE_SUFFIX_PREFIX)
            .filter(|code| !code.is_empty())
            .map(|code| code.parse::<i32>().ok())
            .collect::<Option<Vec<_>>>()?;

        let large = captures.name("large").is_some();
        let suffix_start = captures.name("large").map(|m| m.start()).unwrap_or(failures_match.start());

        Some(ParsedFilename {
            fields: FilenameFields { start, end, tags, large, failures },
            stem: filename[..suffix_start].to_string(),
        })
    }
}

fn build_pattern(body: &str, large_mode: bool) -> Result<Regex, regex::Error> {
    let large = if large_mode { r"(?P<large>\.large)" } else { "" };
    Regex::new(&format!(r"^(?P<start>\d+)-(?P<end>\d+)-{body}{large}(?P<failures>(?:\.failure\.code_\d+)*)$"))
}
