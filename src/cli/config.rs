// ABOUTME: Configuration management for the labgraph application
// ABOUTME: Handles loading and merging configuration from files and environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{EngineConfig, ExistingRunningPolicy};
use crate::output::OutputOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,

    #[serde(default)]
    pub fail_fast: bool,

    #[serde(default)]
    pub on_existing_running: ExistingRunningPolicy,

    #[serde(default, with = "humantime_serde")]
    pub wait_timeout: Option<Duration>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub output: OutputOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("labgraph"))
        .unwrap_or_else(|| PathBuf::from(".labgraph"))
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            max_concurrent_tasks: default_max_concurrent(),
            fail_fast: false,
            on_existing_running: ExistingRunningPolicy::Wait,
            wait_timeout: None,
            logging: LoggingConfig::default(),
            output: OutputOptions::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let explicit = path.is_some();
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file(),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid configuration in {}", config_path.display()))?
        } else if explicit {
            return Err(anyhow::anyhow!(
                "Configuration file not found: {}",
                config_path.display()
            ));
        } else {
            Config::default()
        };

        config.merge_env()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> PathBuf {
        let possible_paths = vec![
            PathBuf::from("labgraph.yaml"),
            PathBuf::from("labgraph.yml"),
            PathBuf::from(".labgraph.yaml"),
        ];

        for path in possible_paths {
            if path.exists() {
                return path;
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".labgraph").join("config.yaml");
            if home_config.exists() {
                return home_config;
            }
        }

        // Default path (may not exist)
        PathBuf::from("labgraph.yaml")
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var("LABGRAPH_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(root);
        }

        if let Ok(max_tasks) = std::env::var("LABGRAPH_MAX_CONCURRENT") {
            self.max_concurrent_tasks = max_tasks
                .parse()
                .with_context(|| format!("Invalid LABGRAPH_MAX_CONCURRENT '{}'", max_tasks))?;
        }

        if let Ok(fail_fast) = std::env::var("LABGRAPH_FAIL_FAST") {
            self.fail_fast = fail_fast
                .parse()
                .with_context(|| format!("Invalid LABGRAPH_FAIL_FAST '{}'", fail_fast))?;
        }

        if let Ok(level) = std::env::var("LABGRAPH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("LABGRAPH_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Engine settings derived from this configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrent: self.max_concurrent_tasks.max(1),
            fail_fast: self.fail_fast,
            on_existing_running: self.on_existing_running,
            wait_timeout: self.wait_timeout,
        }
    }
}
