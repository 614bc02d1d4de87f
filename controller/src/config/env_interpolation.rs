//! `${VAR}` and `${VAR:-default}` references in config files, resolved before YAML parsing.
//!
//! Shell expansions inside worker commands must be written `$VAR`, since `${VAR}` is resolved here.

use std::collections::BTreeSet;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static ENV_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(?P<name>[A-Za-z_][A-Za-z0-9_]*)(?::-(?P<default>[^}]*))?\}").expect("valid regex"));

/// Resolves every reference outside of comment lines. Fails listing every variable that is
/// neither set nor given a default.
pub fn interpolate_yaml_content(content: &str) -> Result<String> {
    interpolate_with(content, |name| std::env::var(name).ok())
}

fn interpolate_with(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let mut missing = BTreeSet::new();
    let mut resolved = Vec::new();

    for line in content.lines() {
        if line.trim_start().starts_with('#') {
            resolved.push(line.to_string());
            continue;
        }
        let expanded = ENV_REFERENCE.replace_all(line, |caps: &Captures<'_>| {
            let name = &caps["name"];
            lookup(name).or_else(|| caps.name("default").map(|d| d.as_str().to_string())).unwrap_or_else(|| {
                missing.insert(name.to_string());
                String::new()
            })
        });
        resolved.push(expanded.into_owned());
    }

    if !missing.is_empty() {
        let names: Vec<_> = missing.into_iter().collect();
        anyhow::bail!("Missing required environment variables: {}", names.join(", "));
    }
    Ok(resolved.join("\n"))
}
