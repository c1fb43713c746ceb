use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Directory holding project configuration, relative to the project root.
pub const CONFIG_DIR: &str = ".forgeloop";

/// Prefix of environment overrides; `__` separates nested keys.
pub const ENV_PREFIX: &str = "FORGELOOP_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrency: {0}. Must be between 1 and 64")]
    InvalidMaxConcurrency(usize),

    #[error("Invalid default_max_attempts: {0}. Must be at least 1")]
    InvalidMaxAttempts(u32),

    #[error("Invalid {0}: must be at least 1 second")]
    InvalidTimeout(&'static str),

    #[error("Invalid similarity_threshold: {0}. Must be in (0, 1]")]
    InvalidSimilarityThreshold(f64),

    #[error("Invalid memory_capacity: {0}. Must be at least 1")]
    InvalidMemoryCapacity(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the project in the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. `.forgeloop/config.yaml`
    /// 3. `.forgeloop/local.yaml` (optional local overrides)
    /// 4. `FORGELOOP_*` environment variables
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`ConfigLoader::load`] with an explicit project root.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, without environment overrides.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.trim().is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if !(1..=64).contains(&config.scheduler.max_concurrency) {
            return Err(ConfigError::InvalidMaxConcurrency(config.scheduler.max_concurrency));
        }
        if config.scheduler.default_max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(config.scheduler.default_max_attempts));
        }

        if config.sandbox.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("sandbox.timeout_secs"));
        }
        if config.sandbox.interpreter.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "sandbox interpreter cannot be empty".to_string(),
            ));
        }
        if config.generator.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout("generator.timeout_secs"));
        }
        if config.generator.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "generator command cannot be empty when set".to_string(),
            ));
        }

        let threshold = config.knowledge.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidSimilarityThreshold(threshold));
        }
        if config.knowledge.memory_capacity == 0 {
            return Err(ConfigError::InvalidMemoryCapacity(config.knowledge.memory_capacity));
        }
        if config.knowledge.layer_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "knowledge layer_timeout_ms must be positive".to_string(),
            ));
        }

        if config.reflection.interval_secs == 0 {
            return Err(ConfigError::InvalidTimeout("reflection.interval_secs"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, yaml: &str) {
        let config_dir = dir.path().join(CONFIG_DIR);
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join(name), yaml).unwrap();
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.scheduler.max_concurrency, 4);
        assert_eq!(config.database.path, ".forgeloop/forgeloop.db");
        assert!((config.knowledge.similarity_threshold - 0.6).abs() < f64::EPSILON);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
scheduler:
  max_concurrency: 8
sandbox:
  interpreter: python3.12
  timeout_secs: 10
knowledge:
  similarity_threshold: 0.75
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.scheduler.max_concurrency, 8);
        assert_eq!(config.scheduler.default_max_attempts, 3);
        assert_eq!(config.sandbox.interpreter, "python3.12");
        assert_eq!(config.sandbox.timeout_secs, 10);
        assert!((config.knowledge.similarity_threshold - 0.75).abs() < f64::EPSILON);
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_concurrency_bounds() {
        let mut config = Config::default();
        config.scheduler.max_concurrency = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConcurrency(0))
        ));

        config.scheduler.max_concurrency = 65;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConcurrency(65))
        ));
    }

    #[test]
    fn test_validate_zero_attempts() {
        let mut config = Config::default();
        config.scheduler.default_max_attempts = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxAttempts(0))
        ));
    }

    #[test]
    fn test_validate_similarity_threshold() {
        let mut config = Config::default();
        config.knowledge.similarity_threshold = 0.0;
        assert!(ConfigLoader::validate(&config).is_err());
        config.knowledge.similarity_threshold = 1.0;
        assert!(ConfigLoader::validate(&config).is_ok());
        config.knowledge.similarity_threshold = 1.5;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_logging() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));
    }

    #[test]
    fn test_validate_timeouts_and_paths() {
        let mut config = Config::default();
        config.sandbox.timeout_secs = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidTimeout("sandbox.timeout_secs"))
        ));

        let mut config = Config::default();
        config.database.path = "  ".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyDatabasePath)
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "config.yaml",
            "scheduler:\n  max_concurrency: 6\n  default_max_attempts: 4\n",
        );
        write_config(&dir, "local.yaml", "scheduler:\n  max_concurrency: 2\n");

        temp_env::with_vars_unset(["FORGELOOP_SCHEDULER__MAX_CONCURRENCY"], || {
            let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
            assert_eq!(config.scheduler.max_concurrency, 2);
            assert_eq!(config.scheduler.default_max_attempts, 4);
        });
    }

    #[test]
    fn test_env_override() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "config.yaml", "scheduler:\n  max_concurrency: 6\n");

        temp_env::with_vars(
            [
                ("FORGELOOP_SCHEDULER__MAX_CONCURRENCY", Some("12")),
                ("FORGELOOP_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
                assert_eq!(config.scheduler.max_concurrency, 12);
                assert_eq!(config.logging.level, "debug");
            },
        );
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "scheduler:\n  max_concurrency: 500\n").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }
}
