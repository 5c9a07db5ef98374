//! File inputs for the CLI

use std::path::Path;

use anyhow::{bail, Context, Result};
use draftgate_core::TargetRecord;
use draftgate_fingerprint::RuleConfiguration;

/// Load a rule configuration; the extension picks JSON, YAML, or TOML
///
/// # Errors
/// Unreadable file, unknown extension, or a configuration that cannot be
/// canonicalized
pub fn load_rules(path: &Path) -> Result<RuleConfiguration> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading rules from {}", path.display()))?;
    let rules = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => RuleConfiguration::from_json_str(&text),
        Some("yaml" | "yml") => RuleConfiguration::from_yaml_str(&text),
        Some("toml") => RuleConfiguration::from_toml_str(&text),
        other => bail!(
            "unsupported rules format {:?} for {}",
            other.unwrap_or("<none>"),
            path.display()
        ),
    };
    rules.with_context(|| format!("invalid rules in {}", path.display()))
}

/// Load catalog records from a JSON array
///
/// # Errors
/// Unreadable file or malformed records
pub fn load_catalog(path: &Path) -> Result<Vec<TargetRecord>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog from {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid catalog in {}", path.display()))
}
