//! Runtime configuration
//!
//! Construction-time world settings, loadable from YAML. Every field has a
//! default so a partial (or empty) document is a valid config.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::WorldError;
use crate::store::StoreMode;
use crate::world::DEFAULT_FLUSH_LIMIT;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub store_mode: StoreMode,
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_flush_limit")]
    pub flush_limit: usize,
    #[serde(default = "default_inspection")]
    pub inspection: bool,
}

fn default_flush_limit() -> usize {
    DEFAULT_FLUSH_LIMIT
}

fn default_inspection() -> bool {
    true
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            store_mode: StoreMode::default(),
            strict: false,
            flush_limit: default_flush_limit(),
            inspection: default_inspection(),
        }
    }
}

impl WorldConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, WorldError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorldError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String, WorldError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
