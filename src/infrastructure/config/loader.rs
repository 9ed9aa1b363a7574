use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;

use crate::domain::error::ConfigError;
use crate::domain::models::config::Config;

/// Configuration loader with hierarchical merging.
///
/// Precedence (lowest to highest):
/// 1. Programmatic defaults (`Config::default()`)
/// 2. `.swarmengine/config.yaml` (project config)
/// 3. `.swarmengine/local.yaml` (project-local overrides, optional)
/// 4. Environment variables (`SWARMENGINE_*`, double-underscore nesting),
///    except `execution_mode`, which is read from `CORPCRAFT_EXECUTION_MODE`
///    to stay compatible with the original operator tooling.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load() -> Result<Config> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".swarmengine/config.yaml"))
            .merge(Yaml::file(".swarmengine/local.yaml"))
            .merge(Env::prefixed("SWARMENGINE_").split("__"))
            .extract()
            .context("failed to extract configuration from layered sources")?;

        if let Ok(mode) = std::env::var("CORPCRAFT_EXECUTION_MODE") {
            config.execution_mode = mode;
        }

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if crate::services::execution_mode::ExecutionMode::parse(&config.execution_mode).is_none() {
            return Err(ConfigError::Invalid {
                field: "execution_mode".into(),
                reason: format!("must be one of mock, claude, team, got {}", config.execution_mode),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::Invalid {
                field: "logging.level".into(),
                reason: format!("must be one of {valid_levels:?}, got {}", config.logging.level),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::Invalid {
                field: "logging.format".into(),
                reason: format!("must be one of {valid_formats:?}, got {}", config.logging.format),
            });
        }

        if config.recovery.max_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "recovery.max_retries".into(),
                reason: "must be at least 1".into(),
            });
        }

        if config.recovery.base_backoff_ms >= config.recovery.max_backoff_ms {
            return Err(ConfigError::Invalid {
                field: "recovery.max_backoff_ms".into(),
                reason: format!(
                    "base_backoff_ms ({}) must be less than max_backoff_ms ({})",
                    config.recovery.base_backoff_ms, config.recovery.max_backoff_ms
                ),
            });
        }

        if !(0.0..=1.0).contains(&config.summoner.hp_budget_floor) || !(0.0..=1.0).contains(&config.summoner.mp_budget_floor) {
            return Err(ConfigError::Invalid {
                field: "summoner budget floor".into(),
                reason: "must be a fraction between 0.0 and 1.0".into(),
            });
        }

        if config.event_bus.dlq_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "event_bus.dlq_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("default config should validate");
    }

    #[test]
    fn yaml_overrides_merge_over_defaults() {
        let yaml = r"
execution_mode: team
logging:
  level: debug
  format: json
recovery:
  max_retries: 5
";
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(figment::providers::Yaml::string(yaml))
            .extract()
            .unwrap();

        assert_eq!(config.execution_mode, "team");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.recovery.max_retries, 5);
        assert_eq!(config.event_bus.dlq_capacity, 1000, "unset fields keep defaults");
        ConfigLoader::validate(&config).unwrap();
    }

    #[test]
    fn rejects_unknown_execution_mode() {
        let mut config = Config::default();
        config.execution_mode = "bogus".into();
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field, .. } if field == "execution_mode"));
    }

    #[test]
    fn rejects_backoff_where_base_exceeds_max() {
        let mut config = Config::default();
        config.recovery.base_backoff_ms = 90_000;
        config.recovery.max_backoff_ms = 10_000;
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field, .. } if field == "recovery.max_backoff_ms"));
    }

    #[test]
    fn rejects_budget_floor_outside_unit_range() {
        let mut config = Config::default();
        config.summoner.hp_budget_floor = 1.5;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn hierarchical_merge_lets_later_layers_win() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base = NamedTempFile::new().unwrap();
        writeln!(base, "execution_mode: mock\nlogging:\n  level: info\n  format: json").unwrap();
        base.flush().unwrap();

        let mut over = NamedTempFile::new().unwrap();
        writeln!(over, "execution_mode: claude\nlogging:\n  level: debug").unwrap();
        over.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base.path()))
            .merge(Yaml::file(over.path()))
            .extract()
            .unwrap();

        assert_eq!(config.execution_mode, "claude", "later layer should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json", "unmentioned field should persist from base layer");
    }
}
