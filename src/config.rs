//! Layered pipeline configuration.
//!
//! Sources in increasing priority:
//! 1. Built-in defaults
//! 2. TOML file (`--config <path>`, else `watershed.toml` in the working directory if present)
//! 3. Environment variables prefixed `WATERSHED_`, nested keys joined by `__`
//!    (e.g. `WATERSHED_LOADER__MAX_ATTEMPTS=6`)
//! 4. CLI flags, applied by the caller

use crate::error::{PipelineError, Result};
use crate::processors::MatchStrategy;
use crate::utils::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_BATCH_TIMEOUT_SECS, DEFAULT_CONFIG_FILE,
    DEFAULT_LOAD_BATCH_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS, DEFAULT_ROW_GROUP_SIZE,
    DEFAULT_SQLITE_PATH, DEFAULT_TIME_BUDGET_SECS, ENV_PREFIX,
};
use crate::writers::RetryPolicy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    /// Wall-clock budget for the whole run
    pub time_budget_secs: u64,

    /// Rayon worker threads for normalization and matching
    #[validate(range(min = 1))]
    pub workers: usize,

    pub matcher: MatchStrategy,

    /// Only keep observations from this state/province
    pub state_province: Option<String>,

    #[validate(nested)]
    pub loader: LoaderConfig,

    pub store: StoreConfig,

    pub blob: BlobConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            time_budget_secs: DEFAULT_TIME_BUDGET_SECS,
            workers: num_cpus::get(),
            matcher: MatchStrategy::default(),
            state_province: None,
            loader: LoaderConfig::default(),
            store: StoreConfig::default(),
            blob: BlobConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoaderConfig {
    #[validate(range(min = 1))]
    pub batch_size: usize,

    pub batch_timeout_secs: u64,

    #[validate(range(min = 1))]
    pub max_attempts: u32,

    pub base_delay_ms: u64,

    pub max_delay_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_LOAD_BATCH_SIZE,
            batch_timeout_secs: DEFAULT_BATCH_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl LoaderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub sqlite_path: PathBuf,
    pub postgres_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: PathBuf::from(DEFAULT_SQLITE_PATH),
            postgres_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Audit snapshots are skipped when unset
    pub root: Option<PathBuf>,
    pub compression: String,
    pub row_group_size: usize,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            root: None,
            compression: "snappy".to_string(),
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Merge defaults, the config file and `WATERSHED_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: PipelineConfig = config.try_deserialize()?;
        Ok(loaded)
    }

    /// Range checks plus cross-field rules the derive cannot express
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        if self.loader.max_delay_ms < self.loader.base_delay_ms {
            return Err(PipelineError::Config(format!(
                "loader.max_delay_ms ({}) must be >= loader.base_delay_ms ({})",
                self.loader.max_delay_ms, self.loader.base_delay_ms
            )));
        }

        if self.store.backend == StoreBackend::Postgres && self.store.postgres_url.is_none() {
            return Err(PipelineError::Config(
                "store.postgres_url is required for the postgres backend".to_string(),
            ));
        }

        Ok(())
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.check().is_ok());
        assert_eq!(config.time_budget(), Duration::from_secs(900));
        assert_eq!(config.loader.batch_size, 500);
        assert_eq!(config.matcher, MatchStrategy::Indexed);
    }

    #[test]
    fn test_file_overrides_defaults() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(
            file,
            r#"
time_budget_secs = 60
matcher = "brute_force"

[loader]
batch_size = 25
max_attempts = 2

[store]
sqlite_path = "/tmp/joined.db"
"#
        )?;

        let config = PipelineConfig::load(Some(file.path()))?;
        assert_eq!(config.time_budget_secs, 60);
        assert_eq!(config.matcher, MatchStrategy::BruteForce);
        assert_eq!(config.loader.batch_size, 25);
        assert_eq!(config.loader.max_attempts, 2);
        assert_eq!(config.loader.base_delay_ms, DEFAULT_BASE_DELAY_MS);
        assert_eq!(config.store.sqlite_path, PathBuf::from("/tmp/joined.db"));
        Ok(())
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(PipelineConfig::load(Some(Path::new("/nonexistent/watershed.toml"))).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = PipelineConfig::default();
        config.loader.batch_size = 0;
        assert!(matches!(config.check(), Err(PipelineError::Validation(_))));

        let mut config = PipelineConfig::default();
        config.loader.max_delay_ms = 10;
        config.loader.base_delay_ms = 100;
        assert!(matches!(config.check(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::default();
        config.store.backend = StoreBackend::Postgres;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_retry_policy_from_loader_config() {
        let loader = LoaderConfig {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 150,
            ..Default::default()
        };
        let policy = loader.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(3), Duration::from_millis(150));
    }
}
