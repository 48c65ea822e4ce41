use crate::logic::weights::AggregationPolicy;
use crate::utils::config_loader::{LoadConfigError, SectionLoader, SectionLoaderSync, load_from_file, load_from_file_sync};
use crate::utils::constants::{DAY_SECONDS, DEFAULT_INTERVAL_SECS, DEFAULT_MAX_RESPONSE_BYTES};
use crate::utils::roster::RosterSection;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of the validator loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Seconds between two rounds
    pub iteration_interval_secs: u64,
    /// Per-miner deadline of one round in milliseconds
    pub query_timeout_ms: u64,
    /// Rounds allowed in flight at once
    pub max_concurrent_rounds: usize,
    /// Length of the queried time window in seconds
    pub window_secs: u64,
    /// Sampling interval of the queried records in seconds
    pub interval_secs: u64,
    /// Queries end at least this many seconds before now, so miners see finalized blocks
    pub query_lag_secs: u64,
    pub aggregation: AggregationPolicy,
    pub enable_parallel_scoring: bool,
    /// Number of miners kept when exporting weights to the chain
    pub max_allowed_weights: usize,
    /// Directory for the JSON-lines archive; archiving is off when unset
    pub archive_dir: Option<String>,
    /// Only dispatch to miners whose synced history reaches the end of the query
    pub health_check: bool,
    /// Largest miner response body accepted over HTTP
    pub max_response_bytes: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            iteration_interval_secs: 60,
            query_timeout_ms: 10_000,
            max_concurrent_rounds: 4,
            window_secs: DAY_SECONDS,
            interval_secs: DEFAULT_INTERVAL_SECS,
            query_lag_secs: 3_600,
            aggregation: AggregationPolicy::default(),
            enable_parallel_scoring: true,
            max_allowed_weights: 420,
            archive_dir: None,
            health_check: true,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl ValidatorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> eyre::Result<Self> {
        let mut config = Self::default();

        if let Ok(interval_str) = std::env::var("ITERATION_INTERVAL_SECS") {
            config.iteration_interval_secs =
                interval_str.parse().map_err(|e| eyre::eyre!("Invalid ITERATION_INTERVAL_SECS: {}", e))?;
        }

        if let Ok(timeout_str) = std::env::var("QUERY_TIMEOUT_MS") {
            config.query_timeout_ms =
                timeout_str.parse().map_err(|e| eyre::eyre!("Invalid QUERY_TIMEOUT_MS: {}", e))?;
        }

        if let Ok(rounds_str) = std::env::var("MAX_CONCURRENT_ROUNDS") {
            config.max_concurrent_rounds =
                rounds_str.parse().map_err(|e| eyre::eyre!("Invalid MAX_CONCURRENT_ROUNDS: {}", e))?;
        }

        if let Ok(alpha_str) = std::env::var("WEIGHT_ALPHA") {
            let alpha: f64 = alpha_str.parse().map_err(|e| eyre::eyre!("Invalid WEIGHT_ALPHA: {}", e))?;
            config.aggregation = AggregationPolicy::Ema { alpha };
        }

        if let Ok(window_str) = std::env::var("WEIGHT_WINDOW") {
            let size: usize = window_str.parse().map_err(|e| eyre::eyre!("Invalid WEIGHT_WINDOW: {}", e))?;
            config.aggregation = AggregationPolicy::MovingWindow { size };
        }

        if let Ok(max_weights_str) = std::env::var("MAX_ALLOWED_WEIGHTS") {
            config.max_allowed_weights =
                max_weights_str.parse().map_err(|e| eyre::eyre!("Invalid MAX_ALLOWED_WEIGHTS: {}", e))?;
        }

        if let Ok(archive_dir) = std::env::var("ARCHIVE_DIR") {
            config.archive_dir = Some(archive_dir);
        }

        if let Ok(health_str) = std::env::var("HEALTH_CHECK") {
            config.health_check = health_str.parse().map_err(|e| eyre::eyre!("Invalid HEALTH_CHECK: {}", e))?;
        }

        if let Ok(bytes_str) = std::env::var("MAX_RESPONSE_BYTES") {
            config.max_response_bytes =
                bytes_str.parse().map_err(|e| eyre::eyre!("Invalid MAX_RESPONSE_BYTES: {}", e))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.query_timeout_ms == 0 {
            return Err(eyre::eyre!("query_timeout_ms must be positive"));
        }
        if self.max_concurrent_rounds == 0 {
            return Err(eyre::eyre!("max_concurrent_rounds must be positive"));
        }
        if self.max_response_bytes == 0 {
            return Err(eyre::eyre!("max_response_bytes must be positive"));
        }
        if self.interval_secs == 0 || self.interval_secs > self.window_secs {
            return Err(eyre::eyre!(
                "interval_secs {} must be positive and within window_secs {}",
                self.interval_secs,
                self.window_secs
            ));
        }
        if let AggregationPolicy::Ema { alpha } = self.aggregation {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(eyre::eyre!("EMA alpha {} outside (0, 1]", alpha));
            }
        }
        Ok(())
    }

    pub fn iteration_interval(&self) -> Duration {
        Duration::from_secs(self.iteration_interval_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ValidatorConfigRoot {
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub roster: RosterSection,
}

#[async_trait]
impl SectionLoader for ValidatorConfig {
    type SectionType = ValidatorConfig;

    async fn load_section_from_file(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let root: ValidatorConfigRoot = load_from_file(file_name).await?;
        root.validator.validate().map_err(|e| LoadConfigError::ConfigError(e.to_string()))?;
        Ok(root.validator)
    }
}

impl SectionLoaderSync for ValidatorConfig {
    type SectionType = ValidatorConfig;

    fn load_section_from_file_sync(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let root: ValidatorConfigRoot = load_from_file_sync(file_name)?;
        root.validator.validate().map_err(|e| LoadConfigError::ConfigError(e.to_string()))?;
        Ok(root.validator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config_loader::parse_config;

    #[test]
    fn test_default_config() {
        let config = ValidatorConfig::default();
        assert_eq!(config.query_timeout(), Duration::from_secs(10));
        assert_eq!(config.iteration_interval(), Duration::from_secs(60));
        assert_eq!(config.max_allowed_weights, 420);
        assert!(config.health_check);
        assert_eq!(config.max_response_bytes, DEFAULT_MAX_RESPONSE_BYTES);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
[validator]
query_timeout_ms = 2500
max_concurrent_rounds = 2
health_check = false
max_response_bytes = 65536
aggregation = { policy = "moving_window", size = 16 }

[roster]
trusted = [0]
"#;
        let root: ValidatorConfigRoot = parse_config(raw).unwrap();
        assert_eq!(root.validator.query_timeout(), Duration::from_millis(2_500));
        assert_eq!(root.validator.max_concurrent_rounds, 2);
        assert!(!root.validator.health_check);
        assert_eq!(root.validator.max_response_bytes, 65_536);
        assert_eq!(root.validator.aggregation, AggregationPolicy::MovingWindow { size: 16 });
        assert_eq!(root.validator.window_secs, DAY_SECONDS);
        assert_eq!(root.roster.trusted, vec![0]);
    }

    #[test]
    fn test_validate() {
        let config = ValidatorConfig { aggregation: AggregationPolicy::Ema { alpha: 0.0 }, ..Default::default() };
        assert!(config.validate().is_err());

        let config = ValidatorConfig { interval_secs: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = ValidatorConfig { max_concurrent_rounds: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = ValidatorConfig { max_response_bytes: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }
}
