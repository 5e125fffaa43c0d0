//! Regression models
//!
//! Two interchangeable regressors over schema-aligned feature rows:
//! - Random forest: bagged squared-error regression trees
//! - MLP: small feed-forward network trained with burn

pub mod forest;
pub mod mlp;

pub use forest::{MaxFeatures, RandomForestRegressor};
pub use mlp::{MlpConfig, MlpNet, MlpRegressor, MlpState};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Result;

/// Which regressor the training pipeline fits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    RandomForest,
    Mlp,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::RandomForest => write!(f, "random-forest"),
            ModelKind::Mlp => write!(f, "mlp"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "random-forest" | "random_forest" | "forest" | "rf" => Ok(ModelKind::RandomForest),
            "mlp" => Ok(ModelKind::Mlp),
            _ => Err(format!(
                "Unknown model: {}. Use random-forest or mlp.",
                s
            )),
        }
    }
}

/// A fitted model that maps feature rows to a registration estimate
pub trait Regressor {
    /// Width of the rows the model accepts
    fn n_features(&self) -> usize;

    fn predict_row(&self, row: &[f64]) -> Result<f64>;

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        x.rows()
            .into_iter()
            .map(|row| self.predict_row(&row.to_vec()))
            .collect()
    }
}

/// Persistable form of a trained model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelState {
    RandomForest(RandomForestRegressor),
    Mlp(MlpState),
}

impl ModelState {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelState::RandomForest(_) => ModelKind::RandomForest,
            ModelState::Mlp(_) => ModelKind::Mlp,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            ModelState::RandomForest(forest) => forest.n_features(),
            ModelState::Mlp(state) => state.n_features(),
        }
    }

    /// Build a model that can score rows
    pub fn restore(&self) -> Result<LoadedModel> {
        match self {
            ModelState::RandomForest(forest) => Ok(LoadedModel::RandomForest(forest.clone())),
            ModelState::Mlp(state) => Ok(LoadedModel::Mlp(state.restore()?)),
        }
    }
}

/// Model restored for inference
#[derive(Debug)]
pub enum LoadedModel {
    RandomForest(RandomForestRegressor),
    Mlp(MlpRegressor),
}

impl Regressor for LoadedModel {
    fn n_features(&self) -> usize {
        match self {
            LoadedModel::RandomForest(m) => m.n_features(),
            LoadedModel::Mlp(m) => m.n_features(),
        }
    }

    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        match self {
            LoadedModel::RandomForest(m) => m.predict_row(row),
            LoadedModel::Mlp(m) => m.predict_row(row),
        }
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        match self {
            LoadedModel::RandomForest(m) => m.predict(x),
            LoadedModel::Mlp(m) => m.predict(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!("random-forest".parse::<ModelKind>().unwrap(), ModelKind::RandomForest);
        assert_eq!("Random_Forest".parse::<ModelKind>().unwrap(), ModelKind::RandomForest);
        assert_eq!("mlp".parse::<ModelKind>().unwrap(), ModelKind::Mlp);
        assert!("svm".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::RandomForest.to_string(), "random-forest");
    }

    #[test]
    fn test_state_restores_forest() {
        let x = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0]];
        let y = array![1.0, 5.0, 2.0];
        let mut forest = RandomForestRegressor::new(4);
        forest.fit(&x, &y).unwrap();
        let expected = forest.predict(&x).unwrap();

        let state = ModelState::RandomForest(forest);
        assert_eq!(state.kind(), ModelKind::RandomForest);
        assert_eq!(state.n_features(), 2);

        let loaded = state.restore().unwrap();
        assert_eq!(loaded.n_features(), 2);
        assert_eq!(loaded.predict(&x).unwrap(), expected);
    }
}
