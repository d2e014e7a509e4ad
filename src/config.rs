//! Project configuration: `flowcraft.config.json` at the project root.
//!
//! All keys are optional; unknown keys are ignored silently.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE: &str = "flowcraft.config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Recognized configuration keys and their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowcraftConfig {
    /// Compilation entry points, relative to the project root.
    pub entry_points: Vec<String>,
    /// Type-checker configuration path.
    pub ts_config_path: String,
    /// Where the manifest artifact is written.
    pub manifest_path: String,
}

impl Default for FlowcraftConfig {
    fn default() -> Self {
        Self {
            entry_points: vec!["src/index.ts".to_string()],
            ts_config_path: "./tsconfig.json".to_string(),
            manifest_path: "dist/flowcraft.manifest.ts".to_string(),
        }
    }
}

impl FlowcraftConfig {
    /// Load the config from `root`, falling back to defaults when the
    /// file does not exist.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Entry points resolved against the project root.
    pub fn entry_files(&self, root: &Path) -> Vec<PathBuf> {
        self.entry_points.iter().map(|p| root.join(p)).collect()
    }

    pub fn manifest_file(&self, root: &Path) -> PathBuf {
        root.join(&self.manifest_path)
    }

    pub fn ts_config_file(&self, root: &Path) -> PathBuf {
        root.join(&self.ts_config_path)
    }
}
