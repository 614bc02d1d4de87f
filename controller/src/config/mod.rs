pub mod builder;
pub mod env_interpolation;
pub mod types;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::jobs::JobName;

pub use builder::{load_config, Config, ConfigBuilder};
pub use types::*;

/// Versioned configuration wrapper
/// This allows us to evolve the config format over time while maintaining backward compatibility
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "config_version")]
pub enum ControllerConfigVersioned {
    #[serde(rename = "1")]
    V1(ControllerConfigV1),
}

impl ControllerConfigVersioned {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string, resolving `${VAR}` references first
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let content = env_interpolation::interpolate_yaml_content(content)?;

        let yaml_value: serde_yaml::Value = serde_yaml::from_str(&content).context("Failed to parse YAML")?;
        if yaml_value.get("config_version").is_none() {
            anyhow::bail!(
                "Missing required field 'config_version' in config file. \
                 Current supported version: 1"
            );
        }

        let versioned: ControllerConfigVersioned =
            serde_yaml::from_str(&content).context("Failed to deserialize config")?;
        Ok(versioned)
    }

    /// Convert to the canonical (latest) config format
    pub fn into_canonical(self) -> ControllerConfigFile {
        match self {
            ControllerConfigVersioned::V1(v1) => v1,
        }
    }
}

/// Canonical configuration file (always latest version internally)
pub type ControllerConfigFile = ControllerConfigV1;

/// Version 1 of the controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfigV1 {
    pub controller: ControllerSection,
    pub jobs: BTreeMap<JobName, JobSection>,
    #[serde(default)]
    pub limitless: LimitlessSection,
}
