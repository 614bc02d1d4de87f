//! Turns a config file into the validated runtime configuration: CLI > ENV > Config File > Defaults

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};
use url::Url;

use super::{ControllerConfigFile, ControllerConfigVersioned, JobSection, LimitlessSection};
use crate::types::jobs::definition::RESPONSES_DIR;
use crate::types::jobs::template::CommandTemplate;
use crate::types::jobs::{ClassificationRules, JobDefinition, JobName};
use crate::worker::executor::WorkerCommands;

/// Validated configuration of one controller instance.
#[derive(Debug, Clone)]
pub struct Config {
    pub local_id: String,
    pub retry_delays: Vec<Duration>,
    pub termination_grace_period: Duration,
    pub spot_instance_reclaim_time: Duration,
    pub otel_endpoint: Option<Url>,
    pub rules: ClassificationRules,
    /// Every configured job type, enabled or not. Pipeline stages resolve their directories here.
    pub catalog: BTreeMap<JobName, Arc<JobDefinition>>,
    /// Job types this instance schedules.
    pub scheduled: Vec<Arc<JobDefinition>>,
    pub commands: HashMap<JobName, WorkerCommands>,
    pub limitless: LimitlessSection,
}

impl Config {
    pub fn definition(&self, name: JobName) -> Result<&Arc<JobDefinition>> {
        self.catalog.get(&name).with_context(|| format!("No `jobs.{name}` section in the configuration"))
    }
}

/// Configuration builder that merges config from multiple sources
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    /// Base config loaded from file
    base_config: Option<ControllerConfigFile>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from a file path
    pub fn with_config_file(mut self, path: &Path) -> Result<Self> {
        info!("Loading configuration from file: {}", path.display());
        self.base_config = Some(ControllerConfigVersioned::from_yaml_file(path)?.into_canonical());
        Ok(self)
    }

    /// Load config from YAML content
    pub fn with_yaml_str(mut self, content: &str) -> Result<Self> {
        self.base_config = Some(ControllerConfigVersioned::from_yaml_str(content)?.into_canonical());
        Ok(self)
    }

    /// Apply CLI overrides on top of the base config
    pub fn with_local_id(mut self, local_id: Option<&str>) -> Result<Self> {
        let config = self.base_config.as_mut().context(
            "Cannot apply CLI overrides without a base config (use with_config_file or with_yaml_str first)",
        )?;
        if let Some(local_id) = local_id {
            debug!("Overriding controller.local_id from CLI: {}", local_id);
            config.controller.local_id = local_id.to_string();
        }
        Ok(self)
    }

    /// Build and validate the final configuration
    pub fn build(self) -> Result<Config> {
        let file = self.base_config.context("No configuration loaded")?;
        info!("Validating configuration");

        let controller = &file.controller;
        validate_local_id(&controller.local_id)?;
        if controller.retry_delays_ms.is_empty() {
            anyhow::bail!("controller.retry_delays_ms must not be empty");
        }
        if file.limitless.witness_writer_concurrency == 0 {
            anyhow::bail!("limitless.witness_writer_concurrency must be at least 1");
        }
        if file.limitless.shared_failure_dir.as_ref().is_some_and(|dir| dir.as_os_str().is_empty()) {
            anyhow::bail!("limitless.shared_failure_dir must not be empty when set");
        }

        let mut catalog = BTreeMap::new();
        let mut scheduled = Vec::new();
        let mut commands = HashMap::new();
        for (&name, section) in &file.jobs {
            let definition = Arc::new(build_definition(name, section)?);
            if section.enabled {
                let normal = section
                    .worker_cmd
                    .as_deref()
                    .or(controller.worker_cmd.as_deref())
                    .with_context(|| format!("jobs.{name} is enabled but no worker_cmd is configured"))?;
                let large = section.worker_cmd_large.as_deref().or(controller.worker_cmd_large.as_deref());
                commands.insert(name, parse_commands(name, normal, large)?);
                scheduled.push(definition.clone());
            }
            catalog.insert(name, definition);
        }
        if scheduled.is_empty() {
            anyhow::bail!("At least one job type must be enabled");
        }

        let config = Config {
            local_id: controller.local_id.clone(),
            retry_delays: controller.retry_delays(),
            termination_grace_period: controller.termination_grace_period(),
            spot_instance_reclaim_time: controller.spot_instance_reclaim_time(),
            otel_endpoint: controller.otel_endpoint.clone(),
            rules: ClassificationRules {
                killed_by_scheduler_code: controller.killed_by_scheduler_code,
                defer_to_other_large_codes: controller.defer_to_other_large_codes.iter().copied().collect(),
                retry_locally_with_large_codes: controller.retry_locally_with_large_codes.iter().copied().collect(),
            },
            catalog,
            scheduled,
            commands,
            limitless: file.limitless,
        };
        info!(
            local_id = %config.local_id,
            jobs = ?config.scheduled.iter().map(|d| d.name).collect::<Vec<_>>(),
            "Configuration loaded and validated successfully"
        );
        Ok(config)
    }
}

/// Loads the configuration of a `run` or `stage` invocation.
pub fn load_config(path: &Path, local_id: Option<&str>) -> Result<Config> {
    ConfigBuilder::new().with_config_file(path)?.with_local_id(local_id)?.build()
}

fn validate_local_id(local_id: &str) -> Result<()> {
    if local_id.is_empty() {
        anyhow::bail!("controller.local_id must not be empty");
    }
    // The id becomes the last component of in-progress file names
    if local_id.contains(['.', '/']) {
        anyhow::bail!("controller.local_id must not contain '.' or '/', got {local_id:?}");
    }
    Ok(())
}

fn build_definition(name: JobName, section: &JobSection) -> Result<JobDefinition> {
    let responses_dirs: Vec<PathBuf> = match (section.responses_dirs.is_empty(), section.requests_root_dirs.first()) {
        (false, _) => section.responses_dirs.clone(),
        (true, Some(root)) if name.num_outputs() == 1 => vec![root.join(RESPONSES_DIR)],
        _ => anyhow::bail!("jobs.{name} needs {} responses_dirs", name.num_outputs()),
    };
    let priority = section.priority.unwrap_or_else(|| name.default_priority());
    JobDefinition::new(name, priority, &section.requests_root_dirs, &responses_dirs, section.can_run_full_large)
        .with_context(|| format!("Invalid jobs.{name} section"))
}

fn parse_commands(name: JobName, normal: &str, large: Option<&str>) -> Result<WorkerCommands> {
    let parse = |raw: &str| -> Result<CommandTemplate> {
        let template = CommandTemplate::parse(raw).with_context(|| format!("Invalid worker command for {name}"))?;
        template
            .check_arity(name.num_inputs(), name.num_outputs())
            .with_context(|| format!("Worker command for {name} does not fit the job type"))?;
        Ok(template)
    };
    Ok(WorkerCommands { normal: parse(normal)?, large: large.map(parse).transpose()? })
}
