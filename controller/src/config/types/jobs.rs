use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Per job type section, e.g. `jobs.execution`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSection {
    /// Whether this instance schedules the job type. Disabled sections still describe the
    /// directory layout for the pipeline stages.
    #[serde(default)]
    pub enabled: bool,

    /// Accept only large-marked requests, and only those.
    #[serde(default)]
    pub can_run_full_large: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,

    /// One root per input; each holds `requests/` and `requests-done/`.
    pub requests_root_dirs: Vec<PathBuf>,

    /// One directory per output. Defaults to `<first root>/responses` for single-output job types.
    #[serde(default)]
    pub responses_dirs: Vec<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_cmd: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_cmd_large: Option<String>,
}
