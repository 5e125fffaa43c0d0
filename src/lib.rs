//! Electric vehicle registration demand prediction
//!
//! Trains a regressor over (year, month, region) observations and serves
//! predictions through a feature schema that is fixed at training time.

pub mod data;
pub mod features;
pub mod model;
pub mod predict;
pub mod training;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One training record: registrations observed for a region in a month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub year: i32,
    /// Calendar month, 1-12
    pub month: u32,
    /// County and state label, e.g. "King, WA"
    pub region: String,
    /// Electric vehicle total (non-negative)
    pub target: f64,
}

impl Observation {
    pub fn new(year: i32, month: u32, region: impl Into<String>, target: f64) -> Self {
        Observation {
            year,
            month,
            region: region.into(),
            target,
        }
    }
}

/// Raw prediction request as collected from a front end
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub year: i32,
    pub month: u32,
    pub region: String,
}

impl PredictionRequest {
    pub fn new(year: i32, month: u32, region: impl Into<String>) -> Self {
        PredictionRequest {
            year,
            month,
            region: region.into(),
        }
    }
}

impl fmt::Display for PredictionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02} {}", self.year, self.month, self.region)
    }
}

/// Model prediction output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub request: PredictionRequest,
    /// Predicted registrations, clamped to a non-negative whole count
    pub registrations: u64,
    /// Unclamped regression output
    pub raw_estimate: f64,
    /// False when the region had no indicator column in the schema
    pub region_known: bool,
}

/// How the predictor treats a region that was not present at training time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownRegionPolicy {
    /// Leave every indicator at zero and score the vector anyway
    #[default]
    ZeroFill,
    /// Fail the request with `EvError::UnknownRegion`
    Reject,
    /// Average the predictions over every known region
    Average,
}

impl fmt::Display for UnknownRegionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnknownRegionPolicy::ZeroFill => write!(f, "zero-fill"),
            UnknownRegionPolicy::Reject => write!(f, "reject"),
            UnknownRegionPolicy::Average => write!(f, "average"),
        }
    }
}

impl FromStr for UnknownRegionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "zero-fill" => Ok(UnknownRegionPolicy::ZeroFill),
            "reject" => Ok(UnknownRegionPolicy::Reject),
            "average" => Ok(UnknownRegionPolicy::Average),
            _ => Err(format!(
                "Unknown region policy: {}. Use zero-fill, reject, or average.",
                s
            )),
        }
    }
}

/// Application-wide errors
#[derive(Debug, Error)]
pub enum EvError {
    #[error("Schema construction failed: {0}")]
    SchemaConstruction(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Invalid month {0}: expected a value between 1 and 12")]
    InvalidMonth(u32),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Model not trained - run `ev-demand train` first")]
    NoModel,

    #[error("Model artifact error: {0}")]
    Artifact(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, EvError>;

/// Application configuration loaded from config.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub training: TrainingConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub database_path: String,
    pub model_path: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            database_path: "data/ev.db".to_string(),
            model_path: "models/ev_model.bin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub model: model::ModelKind,
    /// Fraction of observations held out for evaluation
    pub test_ratio: f64,
    pub seed: u64,
    #[serde(default)]
    pub forest: ForestConfig,
    #[serde(default)]
    pub mlp: MlpTrainingConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            model: model::ModelKind::RandomForest,
            test_ratio: 0.2,
            seed: 42,
            forest: ForestConfig::default(),
            mlp: MlpTrainingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_estimators: usize,
    /// Unbounded when absent
    #[serde(default)]
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: model::forest::MaxFeatures,
}

impl Default for ForestConfig {
    fn default() -> Self {
        ForestConfig {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: model::forest::MaxFeatures::All,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpTrainingConfig {
    pub hidden_dims: Vec<usize>,
    pub dropout: f64,
    pub learning_rate: f64,
    pub epochs: usize,
}

impl Default for MlpTrainingConfig {
    fn default() -> Self {
        MlpTrainingConfig {
            hidden_dims: vec![64, 32],
            dropout: 0.0,
            learning_rate: 0.05,
            epochs: 500,
        }
    }
}

impl MlpTrainingConfig {
    /// Check the network shape and optimizer settings before any fit
    pub fn validate(&self) -> Result<()> {
        if self.hidden_dims.is_empty() || self.hidden_dims.len() > 2 {
            return Err(EvError::Config(format!(
                "mlp hidden_dims must list one or two layer sizes, got {:?}",
                self.hidden_dims
            )));
        }
        if self.hidden_dims.contains(&0) {
            return Err(EvError::Config(format!(
                "mlp hidden_dims must be positive, got {:?}",
                self.hidden_dims
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(EvError::Config(format!(
                "mlp dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(EvError::Config(format!(
                "mlp learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default)]
    pub unknown_region: UnknownRegionPolicy,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EvError::Config(format!("Failed to read config file {}: {}", path, e))
        })?;
        toml::from_str(&content)
            .map_err(|e| EvError::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EvError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
