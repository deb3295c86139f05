use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{
    engine_config::EngineConfig, logging_config::LoggingConfig, paths::ProjectPaths,
    scripting_config::ScriptingConfig,
};

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Config file not found")]
    NotFound,
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("IO error reading config: {0}")]
    IoError(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TacticianConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub scripting: ScriptingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TacticianConfig {
    pub fn config_path() -> PathBuf {
        ProjectPaths::new("tactician")
            .config_dir()
            .join("config.toml")
    }

    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigLoadError> {
        if !path.exists() {
            return Err(ConfigLoadError::NotFound);
        }

        let content =
            fs::read_to_string(path).map_err(|e| ConfigLoadError::IoError(e.to_string()))?;
        let config: TacticianConfig =
            toml::from_str(&content).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        info!("Loaded config from {}", path.display());
        Ok(config.normalized())
    }

    pub fn save(&self) -> Result<(), ConfigLoadError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigLoadError> {
        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigLoadError::IoError(e.to_string()))?;
        }

        let content =
            toml::to_string_pretty(&self).map_err(|e| ConfigLoadError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(|e| ConfigLoadError::IoError(e.to_string()))?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn normalized(mut self) -> Self {
        self.engine = self.engine.normalized();
        if self.scripting.max_steps == 0 {
            self.scripting.max_steps = ScriptingConfig::default().max_steps;
        }
        if self.scripting.max_value_len == 0 {
            self.scripting.max_value_len = ScriptingConfig::default().max_value_len;
        }
        self
    }
}
