use crate::error::{EngineError, EngineResult};
use serde::Deserialize;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `ADSELECT__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Ordered feature names. This list is the contract between the feature
    /// extractor and every model trained against it.
    #[serde(default = "default_features")]
    pub features: Vec<String>,
    #[serde(default)]
    pub heuristic: HeuristicConfig,
    #[serde(default)]
    pub bandit: BanditConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Cold-start CTR prior used while no trained model is installed.
#[derive(Debug, Clone, Deserialize)]
pub struct HeuristicConfig {
    #[serde(default = "default_base_ctr")]
    pub base_ctr: f64,
    #[serde(default = "default_preferred_countries")]
    pub preferred_countries: Vec<String>,
    #[serde(default = "default_preferred_country_multiplier")]
    pub preferred_country_multiplier: f64,
    #[serde(default = "default_premium_categories")]
    pub premium_categories: Vec<String>,
    #[serde(default = "default_premium_category_multiplier")]
    pub premium_category_multiplier: f64,
    #[serde(default = "default_max_ctr")]
    pub max_ctr: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanditConfig {
    /// Pseudo-observations granted to the model's CTR prediction in the
    /// Beta prior. A tunable, not derived from model confidence.
    #[serde(default = "default_prior_weight")]
    pub prior_weight: f64,
    /// Fixed entropy seed. `None` draws from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Maximum number of most recent labeled impressions pulled per retrain.
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_min_examples")]
    pub min_examples: usize,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_features() -> Vec<String> {
    [
        "historical_ctr",
        "revenue_per_view",
        "bid_price",
        "user_recency",
        "purchase_score",
        "page_is_home",
        "device_is_mobile",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_base_ctr() -> f64 {
    0.015
}
fn default_preferred_countries() -> Vec<String> {
    vec!["US".to_string(), "CA".to_string(), "GB".to_string()]
}
fn default_preferred_country_multiplier() -> f64 {
    1.2
}
fn default_premium_categories() -> Vec<String> {
    vec!["healthcare".to_string(), "finance".to_string()]
}
fn default_premium_category_multiplier() -> f64 {
    1.1
}
fn default_max_ctr() -> f64 {
    0.05
}
fn default_prior_weight() -> f64 {
    10.0
}
fn default_epochs() -> usize {
    50
}
fn default_learning_rate() -> f64 {
    0.05
}
fn default_window() -> usize {
    50_000
}
fn default_min_examples() -> usize {
    100
}
fn default_interval_secs() -> u64 {
    300
}
fn default_history_capacity() -> usize {
    200_000
}
fn default_channel_capacity() -> usize {
    100_000
}
fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            base_ctr: default_base_ctr(),
            preferred_countries: default_preferred_countries(),
            preferred_country_multiplier: default_preferred_country_multiplier(),
            premium_categories: default_premium_categories(),
            premium_category_multiplier: default_premium_category_multiplier(),
            max_ctr: default_max_ctr(),
        }
    }
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            prior_weight: default_prior_weight(),
            seed: None,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            window: default_window(),
            min_examples: default_min_examples(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            features: default_features(),
            heuristic: HeuristicConfig::default(),
            bandit: BanditConfig::default(),
            training: TrainingConfig::default(),
            history: HistoryConfig::default(),
            ingest: IngestConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file, overlaid with
    /// environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("ADSELECT")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("features")
                .with_list_parse_key("heuristic.preferred_countries")
                .with_list_parse_key("heuristic.premium_categories"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject values that would make training or scoring meaningless.
    pub fn validate(&self) -> EngineResult<()> {
        if self.features.is_empty() {
            return Err(EngineError::Config("feature list is empty".to_string()));
        }

        let h = &self.heuristic;
        if !(h.max_ctr > 0.0 && h.max_ctr <= 1.0) {
            return Err(EngineError::Config(format!(
                "heuristic.max_ctr must be in (0, 1], got {}",
                h.max_ctr
            )));
        }
        if !(h.base_ctr >= 0.0 && h.base_ctr.is_finite()) {
            return Err(EngineError::Config(format!(
                "heuristic.base_ctr must be a non-negative number, got {}",
                h.base_ctr
            )));
        }
        for (name, m) in [
            ("preferred_country_multiplier", h.preferred_country_multiplier),
            ("premium_category_multiplier", h.premium_category_multiplier),
        ] {
            if !(m > 0.0 && m.is_finite()) {
                return Err(EngineError::Config(format!(
                    "heuristic.{name} must be positive, got {m}"
                )));
            }
        }

        if !(self.bandit.prior_weight >= 0.0 && self.bandit.prior_weight.is_finite()) {
            return Err(EngineError::Config(format!(
                "bandit.prior_weight must be a non-negative number, got {}",
                self.bandit.prior_weight
            )));
        }

        let t = &self.training;
        if t.epochs == 0 {
            return Err(EngineError::Config("training.epochs must be > 0".to_string()));
        }
        if !(t.learning_rate > 0.0 && t.learning_rate.is_finite()) {
            return Err(EngineError::Config(format!(
                "training.learning_rate must be positive, got {}",
                t.learning_rate
            )));
        }
        if t.window == 0 || t.interval_secs == 0 {
            return Err(EngineError::Config(
                "training.window and training.interval_secs must be > 0".to_string(),
            ));
        }

        if self.history.capacity == 0 || self.ingest.channel_capacity == 0 {
            return Err(EngineError::Config(
                "history.capacity and ingest.channel_capacity must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
