//! Encoded training data
//!
//! Rows are produced by the same `InferenceEncoder` used to serve requests.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::features::InferenceEncoder;
use crate::{Observation, Result};

/// Feature matrix and target vector in schema column order
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub x: Array2<f64>,
    pub y: Array1<f64>,
}

impl TrainingSet {
    /// Encode observations row by row
    pub fn from_observations(encoder: &InferenceEncoder, observations: &[Observation]) -> Result<Self> {
        let width = encoder.width();
        let mut flat = Vec::with_capacity(observations.len() * width);
        let mut targets = Vec::with_capacity(observations.len());

        for obs in observations {
            let encoded = encoder.encode_observation(obs)?;
            flat.extend_from_slice(&encoded.values);
            targets.push(obs.target);
        }

        let x = Array2::from_shape_vec((observations.len(), width), flat).map_err(|e| {
            crate::EvError::SchemaConstruction(format!("Failed to shape feature matrix: {}", e))
        })?;

        Ok(TrainingSet {
            x,
            y: Array1::from_vec(targets),
        })
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    /// Rows at the given positions, in that order
    pub fn select(&self, indices: &[usize]) -> TrainingSet {
        TrainingSet {
            x: self.x.select(ndarray::Axis(0), indices),
            y: self.y.select(ndarray::Axis(0), indices),
        }
    }

    /// Seeded shuffle split into (train, test)
    ///
    /// Returns `None` when the hold-out would leave fewer than two training
    /// rows or no test rows.
    pub fn split(&self, test_ratio: f64, seed: u64) -> Option<(TrainingSet, TrainingSet)> {
        let n = self.len();
        let n_test = (n as f64 * test_ratio.clamp(0.0, 1.0)).ceil() as usize;
        if n_test == 0 || n.saturating_sub(n_test) < 2 {
            return None;
        }

        let mut indices: Vec<usize> = (0..n).collect();
        // Shuffle with seed for reproducibility
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let (test_idx, train_idx) = indices.split_at(n_test);

        log::info!(
            "Split {} rows: train={}, test={}",
            n,
            train_idx.len(),
            test_idx.len()
        );

        Some((self.select(train_idx), self.select(test_idx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSchema;
    use crate::PredictionRequest;

    fn observations(n: usize) -> Vec<Observation> {
        (0..n)
            .map(|i| {
                let region = if i % 2 == 0 { "King, WA" } else { "Pierce, WA" };
                Observation::new(2020 + (i / 12) as i32, (i % 12) as u32 + 1, region, i as f64)
            })
            .collect()
    }

    #[test]
    fn test_rows_match_encoder_output() {
        let obs = observations(6);
        let schema = FeatureSchema::from_observations(&obs).unwrap();
        let encoder = InferenceEncoder::new(&schema).unwrap();
        let set = TrainingSet::from_observations(&encoder, &obs).unwrap();

        assert_eq!(set.len(), 6);
        assert_eq!(set.n_features(), schema.len());
        for (i, o) in obs.iter().enumerate() {
            let request = PredictionRequest::new(o.year, o.month, o.region.clone());
            let encoded = encoder.encode(&request).unwrap();
            assert_eq!(set.x.row(i).to_vec(), encoded.values);
            assert_eq!(set.y[i], o.target);
        }
    }

    #[test]
    fn test_split_sizes_and_determinism() {
        let obs = observations(10);
        let schema = FeatureSchema::from_observations(&obs).unwrap();
        let encoder = InferenceEncoder::new(&schema).unwrap();
        let set = TrainingSet::from_observations(&encoder, &obs).unwrap();

        let (train, test) = set.split(0.2, 42).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);

        let (train2, test2) = set.split(0.2, 42).unwrap();
        assert_eq!(train.y, train2.y);
        assert_eq!(test.y, test2.y);

        let mut all: Vec<f64> = train.y.iter().chain(test.y.iter()).copied().collect();
        all.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(all, (0..10).map(|i| i as f64).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_skipped_for_tiny_sets() {
        let obs = observations(2);
        let schema = FeatureSchema::from_observations(&obs).unwrap();
        let encoder = InferenceEncoder::new(&schema).unwrap();
        let set = TrainingSet::from_observations(&encoder, &obs).unwrap();

        assert!(set.split(0.2, 42).is_none());
        assert!(set.split(0.0, 42).is_none());

        let obs = observations(3);
        let set = TrainingSet::from_observations(&encoder, &obs).unwrap();
        let (train, test) = set.split(0.2, 42).unwrap();
        assert_eq!((train.len(), test.len()), (2, 1));
    }

    #[test]
    fn test_invalid_month_propagates() {
        let obs = observations(2);
        let schema = FeatureSchema::from_observations(&obs).unwrap();
        let encoder = InferenceEncoder::new(&schema).unwrap();

        let bad = vec![Observation::new(2020, 0, "King, WA", 1.0)];
        assert!(matches!(
            TrainingSet::from_observations(&encoder, &bad),
            Err(crate::EvError::InvalidMonth(0))
        ));
    }
}
