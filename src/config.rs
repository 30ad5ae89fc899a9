use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::btree::{MAX_NODE_CAPACITY, MIN_NODE_CAPACITY, NODE_NUM};
use crate::file::BUFFER_POOL_SIZE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid pool capacity: {0} (must be >= 2)")]
    InvalidPoolCapacity(usize),

    #[error("Invalid node capacity: {0} (must be 4..=255)")]
    InvalidNodeCapacity(usize),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Storage settings, loadable from a JSON file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the `.idx` / `.db` files
    pub data_dir: PathBuf,
    /// Buffer pool frames
    pub pool_capacity: usize,
    /// Entries per node for newly created tables
    pub node_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("static"),
            pool_capacity: BUFFER_POOL_SIZE,
            node_capacity: NODE_NUM,
        }
    }
}

impl StorageConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(&self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// A pool needs room for at least one header and one data page
    pub fn validate(&self) -> ConfigResult<()> {
        if self.pool_capacity < 2 {
            return Err(ConfigError::InvalidPoolCapacity(self.pool_capacity));
        }
        if !(MIN_NODE_CAPACITY..=MAX_NODE_CAPACITY).contains(&self.node_capacity) {
            return Err(ConfigError::InvalidNodeCapacity(self.node_capacity));
        }
        Ok(())
    }
}
