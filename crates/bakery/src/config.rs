//! Configuration management for the bakery.
//!
//! Loads the TOML configuration file, writing a default one on first run,
//! and validates it before anything is baked.

use crate::cli::CliArgs;
use layer_baker::BakerSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

fn default_workers() -> usize {
    4
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Baking engine tunables
    #[serde(default)]
    pub baker: BakerSettings,
    /// Local worker pool
    #[serde(default)]
    pub worker: WorkerSettings,
    /// The synthetic layer to bake
    #[serde(default)]
    pub demo: DemoSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Number of workers pulling from the queue
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

/// Shape of the synthetic layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    pub layer_name: String,
    pub entity_count: usize,
    /// Seed for the entity generator; the same seed bakes the same tree
    pub seed: u64,
    /// Per-layer division size; unset uses `baker.default_division_size`
    pub division_size: Option<u32>,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            layer_name: "Synthetic landmarks".to_string(),
            entity_count: 10_000,
            seed: 42,
            division_size: None,
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(entities) = args.entities {
            self.demo.entity_count = entities;
        }
        if let Some(workers) = args.workers {
            self.worker.workers = workers;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<(), String> {
        self.baker.validate().map_err(|e| e.to_string())?;

        if self.worker.workers == 0 {
            return Err("At least one worker is required".to_string());
        }

        if self.demo.layer_name.trim().is_empty() {
            return Err("Demo layer name cannot be empty".to_string());
        }
        if self.demo.division_size == Some(0) {
            return Err("Demo division size must be at least 1".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.baker, BakerSettings::default());
        assert_eq!(config.worker.workers, 4);
        assert_eq!(config.demo.entity_count, 10_000);
        assert_eq!(config.demo.seed, 42);
        assert!(config.demo.division_size.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bakery.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.worker.workers, 4);
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.demo.layer_name, config.demo.layer_name);
        assert_eq!(reloaded.baker, config.baker);
    }

    #[tokio::test]
    async fn test_load_partial_file_uses_defaults() {
        let file = NamedTempFile::new().unwrap();
        let content = r#"
[baker]
default_division_size = 41
monitor_delay_secs = 1

[demo]
entity_count = 500
division_size = 25

[logging]
level = "debug"
json_format = true
"#;
        tokio::fs::write(file.path(), content).await.unwrap();

        let config = AppConfig::load_from_file(&file.path().to_path_buf()).await.unwrap();
        assert_eq!(config.baker.default_division_size, 41);
        assert_eq!(config.baker.monitor_delay_secs, 1);
        assert_eq!(config.baker.setup_page_size, layer_baker::config::SETUP_PAGE_SIZE);
        assert_eq!(config.worker.workers, 4);
        assert_eq!(config.demo.entity_count, 500);
        assert_eq!(config.demo.division_size, Some(25));
        assert_eq!(config.demo.seed, 42);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_file() {
        let file = NamedTempFile::new().unwrap();
        tokio::fs::write(file.path(), "[worker]\nworkers = \"lots\"\n").await.unwrap();
        assert!(AppConfig::load_from_file(&file.path().to_path_buf()).await.is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        let args = CliArgs::try_parse_from(["bakery", "-n", "12", "-w", "2", "-l", "warn", "--json-logs"]).unwrap();
        config.apply_overrides(&args);
        assert_eq!(config.demo.entity_count, 12);
        assert_eq!(config.worker.workers, 2);
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.worker.workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.baker.division_growth_limit = -1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.demo.division_size = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        for level in ["trace", "debug", "info", "warn", "error"] {
            let mut config = AppConfig::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok());
        }
    }
}
