use crate::yaml_include::load_yaml_with_includes;
use serde::Deserialize;
use std::{error::Error, fs, path::Path};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CommonConfig {
    pub project_name: String,
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub log_level: String,
    /// Maximum number of analyses in flight for one batch call
    pub batch_concurrency: usize,
    /// Overall deadline for the ML leg of a single analysis
    pub analysis_timeout_ms: u64,
    /// Length of the payer/group history window fed to the context builder
    pub history_window_days: i64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            batch_concurrency: 4,
            analysis_timeout_ms: 5_000,
            history_window_days: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MlConfig {
    /// Inference endpoint; `None` runs the engine in rule-only mode
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub rate_limit_max_calls: u32,
    pub rate_limit_window_secs: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_open_secs: u64,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 2_000,
            cache_ttl_secs: 300,
            rate_limit_max_calls: 60,
            rate_limit_window_secs: 60,
            circuit_failure_threshold: 5,
            circuit_open_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ThresholdConfig {
    pub auto_flag: f64,
    pub alert: f64,
    pub review: f64,
    pub medium: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            auto_flag: 0.9,
            alert: 0.8,
            review: 0.6,
            medium: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    pub ml_weight: f64,
    pub rule_weight: f64,
    pub fallback_confidence: f64,
    pub thresholds: ThresholdConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ml_weight: 0.7,
            rule_weight: 0.3,
            fallback_confidence: 0.5,
            thresholds: ThresholdConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RulesConfig {
    /// Window applied to rule rate limits that do not declare their own
    pub rate_limit_window_secs: u64,
    /// Merchants matched case-insensitively by the default catalogue
    pub blacklisted_merchants: Vec<String>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_secs: 3_600,
            blacklisted_merchants: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendConfig {
    pub server_address: String,
    pub log_level: String,
    #[serde(default)]
    pub metrics_address: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlertsConfig {
    pub webhook_urls: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_urls: Vec::new(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub common: CommonConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub ml: MlConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

impl Config {
    pub fn load(config_path: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let contents = fs::read_to_string(config_path)?;
        Self::from_yaml_str(&contents)
    }

    /// Loads a config file that may pull in other files through `!include` lines.
    pub fn load_with_includes(config_path: &Path) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let yaml = load_yaml_with_includes(config_path).map_err(|e| e.to_string())?;

        let mut out_str = String::new();
        {
            let mut emitter = yaml_rust2::YamlEmitter::new(&mut out_str);
            emitter.dump(&yaml)?;
        }
        Self::from_yaml_str(&out_str)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let mut config: Config = serde_yml::from_str(contents)?;
        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            config.common.database_url = database_url;
        }
        Ok(config)
    }
}
