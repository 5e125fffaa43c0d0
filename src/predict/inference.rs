//! Model inference for predictions

use ndarray::Array2;
use std::path::Path;

use crate::features::{FeatureSchema, InferenceEncoder};
use crate::model::{LoadedModel, ModelKind, Regressor};
use crate::predict::artifact::ModelArtifact;
use crate::training::TrainingReport;
use crate::{EvError, Prediction, PredictionRequest, Result, UnknownRegionPolicy};

/// Predictor for registration demand
///
/// Built once from an artifact and read-only afterwards; share it by
/// reference.
#[derive(Debug)]
pub struct Predictor {
    schema: FeatureSchema,
    encoder: InferenceEncoder,
    model: LoadedModel,
    report: TrainingReport,
    policy: UnknownRegionPolicy,
}

impl Predictor {
    pub fn from_artifact(artifact: ModelArtifact, policy: UnknownRegionPolicy) -> Result<Self> {
        artifact.validate()?;
        let encoder = InferenceEncoder::new(&artifact.schema)?;
        let model = artifact.model.restore()?;

        if model.n_features() != artifact.schema.len() {
            return Err(EvError::SchemaMismatch(format!(
                "model expects {} features but the schema has {} columns",
                model.n_features(),
                artifact.schema.len()
            )));
        }

        Ok(Predictor {
            schema: artifact.schema,
            encoder,
            model,
            report: artifact.report,
            policy,
        })
    }

    /// Load predictor from a saved artifact
    pub fn load<P: AsRef<Path>>(path: P, policy: UnknownRegionPolicy) -> Result<Self> {
        Self::from_artifact(ModelArtifact::load(path)?, policy)
    }

    /// Predict registrations for one request
    pub fn predict(&self, request: &PredictionRequest) -> Result<Prediction> {
        let encoded = self.encoder.encode(request)?;
        if encoded.values.len() != self.model.n_features() {
            return Err(EvError::SchemaMismatch(format!(
                "encoded {} values for a model expecting {}",
                encoded.values.len(),
                self.model.n_features()
            )));
        }

        let raw_estimate = if encoded.region_known {
            self.model.predict_row(&encoded.values)?
        } else {
            match self.policy {
                UnknownRegionPolicy::ZeroFill => {
                    log::warn!(
                        "Region {:?} was not seen in training; all indicators left at zero",
                        request.region
                    );
                    self.model.predict_row(&encoded.values)?
                }
                UnknownRegionPolicy::Reject => {
                    return Err(EvError::UnknownRegion(request.region.clone()))
                }
                UnknownRegionPolicy::Average => self.average_over_regions(request, &encoded.values)?,
            }
        };

        Ok(Prediction {
            request: request.clone(),
            registrations: clamp_registrations(raw_estimate),
            raw_estimate,
            region_known: encoded.region_known,
        })
    }

    /// Predict multiple requests, one result each
    pub fn predict_batch(&self, requests: &[PredictionRequest]) -> Vec<Result<Prediction>> {
        requests.iter().map(|r| self.predict(r)).collect()
    }

    /// Mean prediction over every known region for the request's period
    fn average_over_regions(&self, request: &PredictionRequest, fallback: &[f64]) -> Result<f64> {
        let regions: Vec<&str> = self.regions();
        // Schemas rebuilt from persisted columns may carry no region columns
        if regions.is_empty() {
            return self.model.predict_row(fallback);
        }

        let width = self.schema.len();
        let mut flat = Vec::with_capacity(regions.len() * width);
        for region in &regions {
            let encoded = self
                .encoder
                .encode(&PredictionRequest::new(request.year, request.month, *region))?;
            flat.extend_from_slice(&encoded.values);
        }
        let x = Array2::from_shape_vec((regions.len(), width), flat)
            .map_err(|e| EvError::SchemaMismatch(e.to_string()))?;

        let predictions = self.model.predict(&x)?;
        Ok(predictions.iter().sum::<f64>() / predictions.len() as f64)
    }

    /// Regions known to the model, sorted
    pub fn regions(&self) -> Vec<&str> {
        self.schema.regions().map(|(_, label)| label).collect()
    }

    pub fn knows_region(&self, region: &str) -> bool {
        self.encoder.knows_region(region)
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn report(&self) -> &TrainingReport {
        &self.report
    }

    pub fn model_kind(&self) -> ModelKind {
        match &self.model {
            LoadedModel::RandomForest(_) => ModelKind::RandomForest,
            LoadedModel::Mlp(_) => ModelKind::Mlp,
        }
    }

    pub fn policy(&self) -> UnknownRegionPolicy {
        self.policy
    }
}

/// Clamp a raw estimate to a non-negative whole count (truncating)
pub fn clamp_registrations(raw: f64) -> u64 {
    if !raw.is_finite() {
        return 0;
    }
    raw.max(0.0).trunc() as u64
}

/// Format a prediction for display
pub fn format_prediction(pred: &Prediction) -> String {
    let note = if pred.region_known {
        String::new()
    } else {
        "\n│  Note:             region not seen in training".to_string()
    };

    format!(
        r#"
┌─────────────────────────────────────────────────┐
│  {} ({}-{:02})
├─────────────────────────────────────────────────┤
│  Predicted EV registrations:  {}
│  Raw estimate:                {:.2}{}
└─────────────────────────────────────────────────┘
"#,
        pred.request.region,
        pred.request.year,
        pred.request.month,
        pred.registrations,
        pred.raw_estimate,
        note
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelState, RandomForestRegressor};
    use crate::training::SchemaBuilder;
    use crate::{Observation, TrainingConfig};
    use ndarray::array;

    fn minimal_artifact() -> ModelArtifact {
        let mut config = TrainingConfig::default();
        config.forest.n_estimators = 10;
        SchemaBuilder::new(config)
            .build(&[
                Observation::new(2020, 1, "King, WA", 100.0),
                Observation::new(2020, 2, "Pierce, WA", 50.0),
            ])
            .unwrap()
    }

    #[test]
    fn test_end_to_end_known_region() {
        let predictor =
            Predictor::from_artifact(minimal_artifact(), UnknownRegionPolicy::ZeroFill).unwrap();
        let pred = predictor
            .predict(&PredictionRequest::new(2020, 1, "King, WA"))
            .unwrap();

        assert!(pred.region_known);
        assert!(pred.raw_estimate >= 50.0 && pred.raw_estimate <= 100.0);
        assert_eq!(pred.registrations, clamp_registrations(pred.raw_estimate));
        assert_eq!(predictor.regions(), vec!["King, WA", "Pierce, WA"]);
    }

    #[test]
    fn test_unknown_region_zero_fill_still_predicts() {
        let predictor =
            Predictor::from_artifact(minimal_artifact(), UnknownRegionPolicy::ZeroFill).unwrap();
        let pred = predictor
            .predict(&PredictionRequest::new(2020, 1, "Unknown, ZZ"))
            .unwrap();

        assert!(!pred.region_known);
        assert!(pred.raw_estimate.is_finite());
    }

    #[test]
    fn test_unknown_region_reject_policy() {
        let predictor =
            Predictor::from_artifact(minimal_artifact(), UnknownRegionPolicy::Reject).unwrap();
        let err = predictor
            .predict(&PredictionRequest::new(2020, 1, "Unknown, ZZ"))
            .unwrap_err();
        assert!(matches!(err, EvError::UnknownRegion(ref r) if r == "Unknown, ZZ"));

        // Known regions are unaffected
        assert!(predictor
            .predict(&PredictionRequest::new(2020, 1, "Pierce, WA"))
            .is_ok());
    }

    #[test]
    fn test_unknown_region_average_policy() {
        let predictor =
            Predictor::from_artifact(minimal_artifact(), UnknownRegionPolicy::Average).unwrap();

        let king = predictor
            .predict(&PredictionRequest::new(2020, 3, "King, WA"))
            .unwrap();
        let pierce = predictor
            .predict(&PredictionRequest::new(2020, 3, "Pierce, WA"))
            .unwrap();
        let unknown = predictor
            .predict(&PredictionRequest::new(2020, 3, "Unknown, ZZ"))
            .unwrap();

        let expected = (king.raw_estimate + pierce.raw_estimate) / 2.0;
        assert!((unknown.raw_estimate - expected).abs() < 1e-9);
        assert!(!unknown.region_known);
    }

    #[test]
    fn test_average_policy_without_region_columns() {
        let mut artifact = minimal_artifact();
        let mut forest = RandomForestRegressor::new(5).with_random_state(7);
        forest
            .fit(
                &array![[2020.0, 1.0], [2020.0, 2.0], [2021.0, 1.0]],
                &array![10.0, 20.0, 30.0],
            )
            .unwrap();
        artifact.schema =
            FeatureSchema::from_columns(vec!["year".to_string(), "month".to_string()]).unwrap();
        artifact.model = ModelState::RandomForest(forest);

        let request = PredictionRequest::new(2020, 2, "Unknown, ZZ");
        let averaged = Predictor::from_artifact(artifact.clone(), UnknownRegionPolicy::Average)
            .unwrap()
            .predict(&request)
            .unwrap();
        let zero_filled = Predictor::from_artifact(artifact, UnknownRegionPolicy::ZeroFill)
            .unwrap()
            .predict(&request)
            .unwrap();

        assert!(!averaged.region_known);
        assert_eq!(averaged.raw_estimate, zero_filled.raw_estimate);
    }

    #[test]
    fn test_invalid_month() {
        let predictor =
            Predictor::from_artifact(minimal_artifact(), UnknownRegionPolicy::ZeroFill).unwrap();
        for month in [0, 13] {
            assert!(matches!(
                predictor.predict(&PredictionRequest::new(2020, month, "King, WA")),
                Err(EvError::InvalidMonth(_))
            ));
        }
    }

    #[test]
    fn test_predict_batch_keeps_per_request_results() {
        let predictor =
            Predictor::from_artifact(minimal_artifact(), UnknownRegionPolicy::Reject).unwrap();
        let results = predictor.predict_batch(&[
            PredictionRequest::new(2020, 1, "King, WA"),
            PredictionRequest::new(2020, 13, "King, WA"),
            PredictionRequest::new(2020, 1, "Unknown, ZZ"),
        ]);

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(EvError::InvalidMonth(13))));
        assert!(matches!(results[2], Err(EvError::UnknownRegion(_))));
    }

    #[test]
    fn test_schema_model_width_mismatch() {
        let mut artifact = minimal_artifact();
        let mut forest = RandomForestRegressor::new(2);
        forest
            .fit(&array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], &array![1.0, 2.0])
            .unwrap();
        artifact.model = ModelState::RandomForest(forest);

        let err = Predictor::from_artifact(artifact, UnknownRegionPolicy::ZeroFill).unwrap_err();
        assert!(matches!(err, EvError::SchemaMismatch(_)));
    }

    #[test]
    fn test_clamp_registrations() {
        assert_eq!(clamp_registrations(-3.7), 0);
        assert_eq!(clamp_registrations(41.9), 41);
        assert_eq!(clamp_registrations(0.0), 0);
        assert_eq!(clamp_registrations(f64::NAN), 0);
        assert_eq!(clamp_registrations(f64::INFINITY), 0);
    }

    #[test]
    fn test_saved_artifact_gives_identical_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ev_model.bin");
        let artifact = minimal_artifact();
        artifact.save(&path).unwrap();

        let direct = Predictor::from_artifact(artifact, UnknownRegionPolicy::ZeroFill).unwrap();
        let loaded = Predictor::load(&path, UnknownRegionPolicy::ZeroFill).unwrap();

        let request = PredictionRequest::new(2021, 5, "Pierce, WA");
        assert_eq!(
            direct.predict(&request).unwrap().raw_estimate,
            loaded.predict(&request).unwrap().raw_estimate
        );
        assert_eq!(loaded.schema().columns(), direct.schema().columns());
    }

    #[test]
    fn test_format_prediction() {
        let pred = Prediction {
            request: PredictionRequest::new(2024, 3, "King, WA"),
            registrations: 412,
            raw_estimate: 412.6,
            region_known: false,
        };
        let text = format_prediction(&pred);
        assert!(text.contains("King, WA (2024-03)"));
        assert!(text.contains("412"));
        assert!(text.contains("not seen in training"));
    }
}
