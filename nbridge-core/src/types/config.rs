//! Bridge configuration (`nbridge.toml`).

use std::path::{Path, PathBuf};

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::BridgeError;

/// Name of the config file looked up by [`BridgeConfig::find`].
pub const CONFIG_FILE_NAME: &str = "nbridge.toml";

/// Default number of slots a fresh pointer registry reserves.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 64;

/// Whether the bridge may hand out real native memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Vectors may be promoted to native buffers.
    #[default]
    Native,
    /// Everything stays managed; native promotion is reported as unsupported.
    ManagedOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub mode: ExecutionMode,
    /// Record every native allocation and report double frees and leaks.
    pub memory_check: bool,
    pub registry_initial_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Native,
            memory_check: false,
            registry_initial_capacity: DEFAULT_REGISTRY_CAPACITY,
        }
    }
}

impl BridgeConfig {
    /// Parse a config from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, BridgeError> {
        let config: BridgeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn save(&self, directory: impl AsRef<Path>) -> Result<(), BridgeError> {
        self.validate()?;
        let config_path = directory.as_ref().join(CONFIG_FILE_NAME);
        let content = toml::to_string_pretty(&self)?;
        fs::write(&config_path, content)?;
        log::info!("Configuration saved to {}", config_path.display());
        Ok(())
    }

    /// Look for `nbridge.toml` in `current_directory` and its ancestors.
    ///
    /// Returns `None` when no config file exists anywhere up the tree.
    pub fn find(current_directory: impl AsRef<Path>) -> Option<Result<Self, BridgeError>> {
        let config_path = find_config_file(current_directory.as_ref())?;
        log::debug!("Loading config from {}", config_path.display());
        Some(Self::load(&config_path))
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.registry_initial_capacity == 0 {
            return Err(BridgeError::config_error(
                "registry_initial_capacity must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn allows_native(&self) -> bool {
        self.mode == ExecutionMode::Native
    }
}

fn find_config_file(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        let candidate = dir.join(CONFIG_FILE_NAME);
        log::debug!("Looking for config at {}", candidate.display());
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    log::debug!("No config file found above {}", start.display());
    None
}
