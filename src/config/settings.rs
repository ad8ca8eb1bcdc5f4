use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataSettings,
    pub retrain: RetrainSettings,
    pub validation: ValidationSettings,
    pub strategy: StrategySettings,
    pub orchestrator: OrchestratorSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.data.window_capacity == 0 {
            errors.push("data.window_capacity must be > 0".to_string());
        }
        if self.data.fetch_limit == 0 {
            errors.push("data.fetch_limit must be > 0".to_string());
        }
        if self.data.symbol.trim().is_empty() {
            errors.push("data.symbol must not be empty".to_string());
        }

        if self.retrain.retrain_interval_days <= 0 {
            errors.push("retrain.retrain_interval_days must be > 0".to_string());
        }
        if self.retrain.min_usable_rows < 2 {
            errors.push("retrain.min_usable_rows must be >= 2".to_string());
        }
        if self.retrain.test_ratio <= 0.0 || self.retrain.test_ratio >= 1.0 {
            errors.push("retrain.test_ratio must be between 0 and 1".to_string());
        }

        if self.validation.accuracy_threshold <= 0.0 || self.validation.accuracy_threshold > 1.0 {
            errors.push("validation.accuracy_threshold must be in (0, 1]".to_string());
        }
        if self.validation.validation_sample_size == 0 {
            errors.push("validation.validation_sample_size must be > 0".to_string());
        }

        if self.strategy.min_confidence < 0.5 || self.strategy.min_confidence > 1.0 {
            errors.push("strategy.min_confidence must be between 0.5 and 1".to_string());
        }

        if self.orchestrator.cycle_interval_seconds == 0 {
            errors.push("orchestrator.cycle_interval_seconds must be > 0".to_string());
        }
        if self.orchestrator.max_cycles == Some(0) {
            errors.push("orchestrator.max_cycles must be > 0 when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub data_file: PathBuf,
    pub update_log: PathBuf,
    pub symbol: String,
    pub interval: String,
    /// Bars requested per daily fetch
    pub fetch_limit: u32,
    /// Trading days kept in the rolling window (494 ~ 2 years)
    pub window_capacity: usize,
    pub base_url: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("data/market_data.csv"),
            update_log: PathBuf::from("logs/data_update_log.jsonl"),
            symbol: "BTCUSDT".to_string(),
            interval: "1d".to_string(),
            fetch_limit: 5,
            window_capacity: 494,
            base_url: "https://api.binance.us".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainSettings {
    pub retrain_interval_days: i64,
    pub min_usable_rows: usize,
    pub test_ratio: f64,
    pub split_seed: u64,
    pub model_dir: PathBuf,
    pub retrain_log: PathBuf,
}

impl Default for RetrainSettings {
    fn default() -> Self {
        Self {
            retrain_interval_days: 7,
            min_usable_rows: 100,
            test_ratio: 0.3,
            split_seed: 42,
            model_dir: PathBuf::from("models"),
            retrain_log: PathBuf::from("logs/retraining_log.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub accuracy_threshold: f64,
    pub validation_sample_size: usize,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            accuracy_threshold: 0.70,
            validation_sample_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySettings {
    pub min_confidence: f64,
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self { min_confidence: 0.60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub cycle_interval_seconds: u64,
    /// None runs until interrupted
    pub max_cycles: Option<u64>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            cycle_interval_seconds: 3600,
            max_cycles: None,
        }
    }
}
