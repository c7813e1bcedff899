use std::path::Path;

use anyhow::Context;
use labrisk_core::AnalysisConfig;
use serde::Deserialize;

/// Partial overrides read from a JSON file; missing keys keep the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
    #[serde(default)]
    batch_size: Option<usize>,
    #[serde(default)]
    max_reported_errors: Option<usize>,
}

impl From<FileConfig> for AnalysisConfig {
    fn from(cfg: FileConfig) -> Self {
        let mut base = AnalysisConfig::default();
        if let Some(batch_size) = cfg.batch_size {
            base.batch_size = batch_size.max(1);
        }
        if let Some(max_errors) = cfg.max_reported_errors {
            base.max_reported_errors = max_errors;
        }
        base
    }
}

pub fn load(path: Option<&Path>) -> anyhow::Result<AnalysisConfig> {
    let Some(path) = path else {
        return Ok(AnalysisConfig::default());
    };
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read config file {:?}", path))?;
    let cfg: FileConfig = serde_json::from_str(&data)
        .with_context(|| format!("Invalid config file {:?}", path))?;
    Ok(cfg.into())
}
