use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Core configuration, persisted as JSON under the user config dir
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub schema_version: u32,
    pub narrative_base_url: String,
    pub narrative_model: String,
    pub narrative_timeout_secs: u64,
    pub stt_base_url: String,
    pub stt_language: String,
    pub stt_timeout_secs: u64,
    /// Minimum completed sessions with clinical content before an evolution
    /// report can be generated
    pub evolution_min_completed_sessions: usize,
    /// Most recent qualifying sessions sent to the narrative collaborator
    pub evolution_recent_session_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            narrative_base_url: "http://localhost:8080".to_string(),
            narrative_model: "clinic-notes".to_string(),
            narrative_timeout_secs: 120,
            stt_base_url: "http://localhost:9000".to_string(),
            stt_language: "pt".to_string(),
            stt_timeout_secs: 300,
            evolution_min_completed_sessions: 2,
            evolution_recent_session_limit: 10,
        }
    }
}

impl CoreConfig {
    /// Get the default config directory
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".clinic-core"))
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file or return default
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(e) => {
                debug!("Failed to load config, using default: {}", e);
                Self::default()
            }
        }
    }

    /// Load config from file
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: CoreConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }
}
