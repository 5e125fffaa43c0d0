//! Schema construction and model fitting
//!
//! Builds the feature schema from the full observation set, encodes every
//! observation with the inference encoder, fits the configured regressor and
//! packages everything into a single artifact.

use crate::data::TrainingSet;
use crate::features::{FeatureSchema, InferenceEncoder};
use crate::model::{ModelKind, ModelState, RandomForestRegressor, Regressor};
use crate::predict::ModelArtifact;
use crate::training::metrics::{RegressionMetrics, TrainingReport};
use crate::training::mlp_trainer::fit_mlp;
use crate::{EvError, Observation, Result, TrainingConfig};

/// Trains a predictor whose input contract is the schema it derives
pub struct SchemaBuilder {
    config: TrainingConfig,
}

impl SchemaBuilder {
    pub fn new(config: TrainingConfig) -> Self {
        SchemaBuilder { config }
    }

    pub fn with_model(mut self, model: ModelKind) -> Self {
        self.config.model = model;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Build the schema, fit, evaluate on the hold-out and return the artifact
    pub fn build(&self, observations: &[Observation]) -> Result<ModelArtifact> {
        if !(0.0..1.0).contains(&self.config.test_ratio) {
            return Err(EvError::Config(format!(
                "test_ratio must be in [0, 1), got {}",
                self.config.test_ratio
            )));
        }
        if self.config.model == ModelKind::Mlp {
            self.config.mlp.validate()?;
        }

        let schema = FeatureSchema::from_observations(observations)?;
        let encoder = InferenceEncoder::new(&schema)?;
        let dataset = TrainingSet::from_observations(&encoder, observations)?;

        log::info!(
            "Schema: {} columns ({} regions) from {} observations",
            schema.len(),
            schema.region_count(),
            observations.len()
        );

        let (train, test) = match dataset.split(self.config.test_ratio, self.config.seed) {
            Some((train, test)) => (train, Some(test)),
            None => {
                log::warn!(
                    "Too few observations ({}) for a hold-out split; fitting on all rows",
                    dataset.len()
                );
                (dataset, None)
            }
        };

        let (state, final_train_loss) = self.fit(&train)?;

        if state.n_features() != schema.len() {
            return Err(EvError::SchemaMismatch(format!(
                "fitted model takes {} features but the schema has {} columns",
                state.n_features(),
                schema.len()
            )));
        }

        let holdout = match &test {
            Some(test) => {
                let model = state.restore()?;
                let predictions = model.predict(&test.x)?;
                let metrics = RegressionMetrics::from_predictions(&predictions, &test.y.to_vec());
                log::info!("Hold-out {}", metrics);
                Some(metrics)
            }
            None => None,
        };

        let report = TrainingReport {
            model: state.kind(),
            n_observations: observations.len(),
            n_train: train.len(),
            n_test: test.as_ref().map_or(0, |t| t.len()),
            n_features: schema.len(),
            n_regions: schema.region_count(),
            holdout,
            final_train_loss,
            trained_at: chrono::Utc::now().to_rfc3339(),
        };

        ModelArtifact::new(schema, state, report)
    }

    fn fit(&self, train: &TrainingSet) -> Result<(ModelState, Option<f64>)> {
        match self.config.model {
            ModelKind::RandomForest => {
                let mut forest =
                    RandomForestRegressor::from_config(&self.config.forest, self.config.seed);
                log::info!(
                    "Fitting random forest ({} trees) on {} rows",
                    forest.n_estimators,
                    train.len()
                );
                forest.fit(&train.x, &train.y)?;
                Ok((ModelState::RandomForest(forest), None))
            }
            ModelKind::Mlp => {
                let (state, history) = fit_mlp(&train.x, &train.y, &self.config.mlp)?;
                Ok((ModelState::Mlp(state), history.final_loss()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MlpTrainingConfig, PredictionRequest};

    fn two_region_observations() -> Vec<Observation> {
        let mut observations = Vec::new();
        for year in 2019..2022 {
            for month in 1..=12u32 {
                let t = ((year - 2019) * 12) as f64 + month as f64;
                observations.push(Observation::new(year, month, "King, WA", 1000.0 + 20.0 * t));
                observations.push(Observation::new(year, month, "Pierce, WA", 100.0 + 2.0 * t));
            }
        }
        observations
    }

    fn small_forest_config() -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.forest.n_estimators = 20;
        config
    }

    #[test]
    fn test_minimal_example_schema() {
        let observations = vec![
            Observation::new(2020, 1, "King, WA", 100.0),
            Observation::new(2020, 2, "Pierce, WA", 50.0),
        ];
        let artifact = SchemaBuilder::new(small_forest_config())
            .build(&observations)
            .unwrap();

        assert_eq!(
            artifact.schema.columns(),
            &["year", "month", "Region_King, WA", "Region_Pierce, WA"]
        );
        assert_eq!(artifact.model.n_features(), 4);
        assert_eq!(artifact.report.n_train, 2);
        assert_eq!(artifact.report.n_test, 0);
        assert!(artifact.report.holdout.is_none());

        let encoder = InferenceEncoder::new(&artifact.schema).unwrap();
        let encoded = encoder
            .encode(&PredictionRequest::new(2020, 1, "King, WA"))
            .unwrap();
        assert_eq!(encoded.values, vec![2020.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_forest_holdout_report() {
        let observations = two_region_observations();
        let artifact = SchemaBuilder::new(small_forest_config())
            .build(&observations)
            .unwrap();

        let report = &artifact.report;
        assert_eq!(report.model, ModelKind::RandomForest);
        assert_eq!(report.n_observations, 72);
        assert_eq!(report.n_test, 15);
        assert_eq!(report.n_train, 57);
        assert_eq!(report.n_regions, 2);

        let holdout = report.holdout.as_ref().unwrap();
        assert_eq!(holdout.count, 15);
        assert!(holdout.mae().is_finite());
        // Regions differ by an order of magnitude, the forest must separate them
        assert!(holdout.r2() > 0.5, "r2 = {}", holdout.r2());
    }

    #[test]
    fn test_mlp_build() {
        let mut config = TrainingConfig::default();
        config.mlp = MlpTrainingConfig {
            hidden_dims: vec![16, 8],
            dropout: 0.0,
            learning_rate: 0.05,
            epochs: 100,
        };
        let artifact = SchemaBuilder::new(config)
            .with_model(ModelKind::Mlp)
            .build(&two_region_observations())
            .unwrap();

        assert_eq!(artifact.model.kind(), ModelKind::Mlp);
        assert_eq!(artifact.model.n_features(), 4);
        assert!(artifact.report.final_train_loss.unwrap().is_finite());
    }

    #[test]
    fn test_empty_observations_fail_schema_construction() {
        let err = SchemaBuilder::new(TrainingConfig::default())
            .build(&[])
            .unwrap_err();
        assert!(matches!(err, EvError::SchemaConstruction(_)));
    }

    #[test]
    fn test_single_observation_fails_training() {
        let observations = vec![Observation::new(2020, 1, "King, WA", 100.0)];
        let err = SchemaBuilder::new(small_forest_config())
            .build(&observations)
            .unwrap_err();
        assert!(matches!(err, EvError::Training(_)));
    }

    #[test]
    fn test_invalid_test_ratio() {
        let mut config = small_forest_config();
        config.test_ratio = 1.0;
        let err = SchemaBuilder::new(config)
            .build(&two_region_observations())
            .unwrap_err();
        assert!(matches!(err, EvError::Config(_)));
    }

    #[test]
    fn test_invalid_mlp_settings_rejected_before_fit() {
        let cases = [
            MlpTrainingConfig {
                dropout: 1.5,
                ..Default::default()
            },
            MlpTrainingConfig {
                hidden_dims: vec![],
                ..Default::default()
            },
            MlpTrainingConfig {
                hidden_dims: vec![8, 8, 8],
                ..Default::default()
            },
        ];
        for mlp in cases {
            let mut config = TrainingConfig::default();
            config.mlp = mlp;
            let err = SchemaBuilder::new(config)
                .with_model(ModelKind::Mlp)
                .build(&two_region_observations())
                .unwrap_err();
            assert!(matches!(err, EvError::Config(_)));
        }
    }

    #[test]
    fn test_mlp_settings_ignored_for_forest() {
        let mut config = small_forest_config();
        config.mlp.dropout = 1.5;
        assert!(SchemaBuilder::new(config)
            .build(&two_region_observations())
            .is_ok());
    }
}
