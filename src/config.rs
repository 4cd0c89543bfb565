//! Configuration management for the studio limiter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::ratelimit::{
    BucketStore, ClassConfig, Clock, InMemoryBucketStore, LimitTable, RateLimiter, RetryAfter,
};

/// Prefix for environment overrides, e.g. `STUDIO_LIMITER__LOGGING__LEVEL=debug`.
pub const ENV_PREFIX: &str = "STUDIO_LIMITER";

/// Main configuration for the limiter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// How retry delays are reported on denial
    #[serde(default)]
    pub retry_after: RetryAfter,

    /// Classes replacing or extending the built-in table
    #[serde(default)]
    pub classes: BTreeMap<String, ClassConfig>,
}

impl LimitsConfig {
    /// The built-in table with configured classes merged over it.
    pub fn table(&self) -> Result<LimitTable> {
        LimitTable::default().merged(self.classes.clone())
    }
}

impl LimiterConfig {
    /// Load configuration from an optional YAML file layered under
    /// `STUDIO_LIMITER__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: LimiterConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Build a limiter over the given store and clock, validating the class
    /// table first.
    pub fn build_limiter(
        &self,
        store: Arc<dyn BucketStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<RateLimiter> {
        let table = self.limits.table()?;
        Ok(RateLimiter::new(table, store, clock).with_retry_after(self.limits.retry_after))
    }
}

/// Convenience for callers that only need the default store.
pub fn default_store() -> Arc<dyn BucketStore> {
    Arc::new(InMemoryBucketStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimiterError;
    use crate::ratelimit::ManualClock;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = LimiterConfig::default();
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
        assert_eq!(config.limits.retry_after, RetryAfter::FullInterval);
        assert_eq!(config.limits.table().unwrap(), LimitTable::default());
    }

    #[test]
    fn test_parse_yaml_overrides() {
        let yaml = r#"
logging:
  level: debug
  json: true
limits:
  retry_after: next_refill
  classes:
    writing:
      max_tokens: 40
      refill_rate: 20
      refill_interval_ms: 3600000
"#;
        let config: LimiterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.limits.retry_after, RetryAfter::NextRefill);

        let table = config.limits.table().unwrap();
        assert_eq!(table.get("writing").unwrap().max_tokens, 40);
        assert_eq!(table.get("image").unwrap().max_tokens, 30);
    }

    #[test]
    fn test_invalid_class_rejected_when_building() {
        let mut config = LimiterConfig::default();
        config
            .limits
            .classes
            .insert("image".into(), ClassConfig::new(1, 2, 1_000));

        let err = config
            .build_limiter(default_store(), Arc::new(ManualClock::new(0)))
            .unwrap_err();
        assert!(matches!(err, LimiterError::InvalidClass { class, .. } if class == "image"));
    }

    #[test]
    fn test_build_limiter_applies_retry_policy() {
        let mut config = LimiterConfig::default();
        config.limits.retry_after = RetryAfter::NextRefill;

        let limiter = config
            .build_limiter(default_store(), Arc::new(ManualClock::new(0)))
            .unwrap();
        assert_eq!(limiter.retry_after(), RetryAfter::NextRefill);
        assert_eq!(limiter.table().len(), 4);
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("studio-limiter-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "limits:\n  classes:\n    video:\n      max_tokens: 2\n      refill_rate: 1\n      refill_interval_ms: 1000"
        )
        .unwrap();

        let config = LimiterConfig::load(Some(&path)).unwrap();
        let table = config.limits.table().unwrap();
        assert_eq!(table.get("video"), Some(&ClassConfig::new(2, 1, 1_000)));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_env_overrides_layer_over_file() {
        let path = std::env::temp_dir().join(format!("studio-limiter-env-{}.yaml", std::process::id()));
        std::fs::write(&path, "logging:\n  level: warn\nlimits:\n  retry_after: full_interval\n").unwrap();

        std::env::set_var("STUDIO_LIMITER__LIMITS__RETRY_AFTER", "next_refill");
        let loaded = LimiterConfig::load(Some(&path));
        std::env::remove_var("STUDIO_LIMITER__LIMITS__RETRY_AFTER");
        std::fs::remove_file(&path).unwrap();

        let config = loaded.unwrap();
        assert_eq!(config.limits.retry_after, RetryAfter::NextRefill);
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = LimiterConfig::load(Some(Path::new("/nonexistent/studio-limiter.yaml")));
        assert!(matches!(err, Err(LimiterError::Config(_))));
    }
}
