//! Training metrics and evaluation

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::ModelKind;

/// Regression error metrics accumulated over predictions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub count: usize,
    pub abs_error_sum: f64,
    pub sq_error_sum: f64,
    pub target_sum: f64,
    pub target_sq_sum: f64,
}

impl RegressionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score a set of predictions against actual values
    pub fn from_predictions(predictions: &[f64], actuals: &[f64]) -> Self {
        let mut metrics = Self::new();
        for (p, a) in predictions.iter().zip(actuals) {
            metrics.update(*p, *a);
        }
        metrics
    }

    pub fn update(&mut self, prediction: f64, actual: f64) {
        let err = prediction - actual;
        self.count += 1;
        self.abs_error_sum += err.abs();
        self.sq_error_sum += err * err;
        self.target_sum += actual;
        self.target_sq_sum += actual * actual;
    }

    /// Mean absolute error
    pub fn mae(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.abs_error_sum / self.count as f64
        }
    }

    /// Root mean squared error
    pub fn rmse(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.sq_error_sum / self.count as f64).sqrt()
        }
    }

    /// Coefficient of determination; 0 when the targets have no variance
    pub fn r2(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let total = self.target_sq_sum - self.target_sum * self.target_sum / n;
        if total <= f64::EPSILON {
            0.0
        } else {
            1.0 - self.sq_error_sum / total
        }
    }
}

impl fmt::Display for RegressionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE: {:.2} | RMSE: {:.2} | R²: {:.3} (n={})",
            self.mae(),
            self.rmse(),
            self.r2(),
            self.count
        )
    }
}

/// Loss curve of an iterative fit
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    pub train_losses: Vec<f64>,
    pub best_loss: f64,
    pub best_epoch: usize,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self {
            best_loss: f64::INFINITY,
            ..Default::default()
        }
    }

    pub fn record_epoch(&mut self, epoch: usize, loss: f64) {
        self.train_losses.push(loss);
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_epoch = epoch;
        }
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.train_losses.last().copied()
    }
}

/// Summary of a training run, stored alongside the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model: ModelKind,
    pub n_observations: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub n_features: usize,
    pub n_regions: usize,
    /// Held-out error, absent when the split was skipped
    pub holdout: Option<RegressionMetrics>,
    /// Final normalized training loss (MLP only)
    pub final_train_loss: Option<f64>,
    /// RFC 3339 timestamp
    pub trained_at: String,
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model:        {}", self.model)?;
        writeln!(f, "Trained at:   {}", self.trained_at)?;
        writeln!(
            f,
            "Observations: {} ({} train / {} test)",
            self.n_observations, self.n_train, self.n_test
        )?;
        writeln!(
            f,
            "Features:     {} ({} regions)",
            self.n_features, self.n_regions
        )?;
        if let Some(loss) = self.final_train_loss {
            writeln!(f, "Final loss:   {:.5}", loss)?;
        }
        match &self.holdout {
            Some(metrics) => write!(f, "Hold-out:     {}", metrics),
            None => write!(f, "Hold-out:     skipped (too few observations)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regression_metrics() {
        let metrics = RegressionMetrics::from_predictions(&[2.0, 4.0, 6.0], &[1.0, 4.0, 8.0]);

        assert_eq!(metrics.count, 3);
        assert!((metrics.mae() - 1.0).abs() < 1e-12);
        assert!((metrics.rmse() - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
        let mean = 13.0 / 3.0;
        let sst: f64 = [1.0f64, 4.0, 8.0].iter().map(|v| (v - mean).powi(2)).sum();
        assert!((metrics.r2() - (1.0 - 5.0 / sst)).abs() < 1e-9);
    }

    #[test]
    fn test_perfect_predictions() {
        let metrics = RegressionMetrics::from_predictions(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert_eq!(metrics.mae(), 0.0);
        assert_eq!(metrics.rmse(), 0.0);
        assert!((metrics.r2() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_and_constant_targets() {
        let empty = RegressionMetrics::new();
        assert_eq!(empty.mae(), 0.0);
        assert_eq!(empty.r2(), 0.0);

        let constant = RegressionMetrics::from_predictions(&[4.0, 6.0], &[5.0, 5.0]);
        assert_eq!(constant.r2(), 0.0);
        assert_eq!(constant.mae(), 1.0);
    }

    #[test]
    fn test_history_tracks_best_epoch() {
        let mut history = TrainingHistory::new();
        history.record_epoch(0, 1.0);
        history.record_epoch(1, 0.4);
        history.record_epoch(2, 0.6);

        assert_eq!(history.best_epoch, 1);
        assert_eq!(history.final_loss(), Some(0.6));
    }
}
