//! Model training
//!
//! Schema construction, fitting loops, and evaluation metrics.

pub mod builder;
pub mod metrics;
pub mod mlp_trainer;

pub use builder::SchemaBuilder;
pub use metrics::{RegressionMetrics, TrainingHistory, TrainingReport};
pub use mlp_trainer::{fit_mlp, MlpTrainer};
