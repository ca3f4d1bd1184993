use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Output defaults, optionally loaded from a TOML file via `--config`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub json: bool,
    pub show_positions: bool,
    pub show_try_blocks: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            json: false,
            show_positions: true,
            show_try_blocks: true,
        }
    }
}

impl CliConfig {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        toml::from_str(input).context("invalid lkbc config")
    }

    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config '{}'", path.display()))?;
                Self::from_toml_str(&raw)
            }
            None => Ok(Self::default()),
        }
    }
}
