use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::orchestration::{ExecutionMode, FallbackSources, GateLimits, DEFAULT_MAX_OPTIONS};
use crate::{Error, Result};

/// User configuration, read from `~/.quest/quest.toml`.
///
/// ```toml
/// store_dir = "~/research/checkpoints"
/// max_options = 4
///
/// [execution]
/// mode = "batch"
/// max_parallel = 3
///
/// [fallback_sources]
/// gene_disease = "clingen"
///
/// [gate]
/// sample_records = 5
/// sample_chars = 2000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Where the file-backed checkpoint store lives.
    pub store_dir: Option<String>,
    /// Cap on advisor-proposed checkpoint options.
    #[serde(default = "default_max_options")]
    pub max_options: usize,
    #[serde(default)]
    pub execution: ExecutionMode,
    #[serde(default)]
    pub fallback_sources: FallbackSources,
    #[serde(default)]
    pub gate: GateLimits,
}

fn default_max_options() -> usize {
    DEFAULT_MAX_OPTIONS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: None,
            max_options: DEFAULT_MAX_OPTIONS,
            execution: ExecutionMode::default(),
            fallback_sources: FallbackSources::default(),
            gate: GateLimits::default(),
        }
    }
}

impl Config {
    pub fn quest_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".quest"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::quest_dir()?.join("quest.toml"))
    }

    pub fn log_path() -> Result<PathBuf> {
        Ok(Self::quest_dir()?.join("quest.log"))
    }

    /// Effective store directory: the configured one, or `~/.quest/store`.
    pub fn store_dir(&self) -> Result<PathBuf> {
        match &self.store_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::quest_dir()?.join("store")),
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading config");
        if !path.exists() {
            tracing::debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        tracing::debug!(
            store_dir = ?config.store_dir,
            execution = ?config.execution,
            max_options = config.max_options,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "config saved");
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
