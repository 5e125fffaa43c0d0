//! Prediction and inference
//!
//! Persist trained artifacts, load them, and generate predictions.

pub mod artifact;
pub mod inference;

pub use artifact::ModelArtifact;
pub use inference::{clamp_registrations, format_prediction, Predictor};
