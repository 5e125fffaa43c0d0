//! Full-batch gradient descent for the MLP regressor

use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, Tensor};
use ndarray::{Array1, Array2};

use crate::model::mlp::{
    FeatureNormalization, MlpConfig, MlpNet, MlpState, TargetNormalization, TrainingBackend,
};
use crate::training::metrics::TrainingHistory;
use crate::{EvError, MlpTrainingConfig, Result};

/// Network and normalization produced by a training run
pub struct FittedMlp<B: AutodiffBackend> {
    pub model: MlpNet<B>,
    pub features: FeatureNormalization,
    pub target: TargetNormalization,
    pub history: TrainingHistory,
}

/// Trainer for the MLP model
pub struct MlpTrainer<B: AutodiffBackend> {
    model: MlpNet<B>,
    optimizer: burn::optim::adaptor::OptimizerAdaptor<burn::optim::Sgd<B::InnerBackend>, MlpNet<B>, B>,
    learning_rate: f64,
    device: B::Device,
}

impl<B: AutodiffBackend> MlpTrainer<B> {
    pub fn new(device: B::Device, config: &MlpConfig, learning_rate: f64) -> Self {
        let model = MlpNet::new(&device, config);
        let optimizer = SgdConfig::new().init();

        MlpTrainer {
            model,
            optimizer,
            learning_rate,
            device,
        }
    }

    /// Fit on the whole matrix each epoch, keeping the lowest-loss weights
    pub fn train(mut self, x: &Array2<f64>, y: &Array1<f64>, epochs: usize) -> Result<FittedMlp<B>> {
        let n = x.nrows();
        let d = x.ncols();
        if n != y.len() {
            return Err(EvError::Training(format!(
                "feature matrix has {} rows but target has {} values",
                n,
                y.len()
            )));
        }
        if n < 2 {
            return Err(EvError::Training(format!(
                "degenerate feature matrix: {} row(s), need at least 2",
                n
            )));
        }
        if epochs == 0 {
            return Err(EvError::Training("epochs must be at least 1".to_string()));
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(EvError::Training(
                "feature matrix or target contains non-finite values".to_string(),
            ));
        }

        let features = FeatureNormalization::from_matrix(x);
        let target = TargetNormalization::from_targets(y);
        log::debug!(
            "Feature normalization: mean={:?}, std={:?}",
            features.mean,
            features.std
        );

        let x_flat = features.normalize_matrix(x);
        let y_flat: Vec<f32> = y.iter().map(|v| target.normalize(*v)).collect();

        let inputs = Tensor::<B, 1>::from_floats(x_flat.as_slice(), &self.device).reshape([n, d]);
        let targets = Tensor::<B, 1>::from_floats(y_flat.as_slice(), &self.device).reshape([n, 1]);

        let mut history = TrainingHistory::new();
        let mut best_model = self.model.clone();

        log::info!("Starting MLP training for {} epochs on {} rows", epochs, n);

        for epoch in 0..epochs {
            let predictions = self.model.forward(inputs.clone());
            let loss = (predictions - targets.clone()).powf_scalar(2.0).mean();
            let loss_val: f32 = loss.clone().into_scalar().elem();

            if !loss_val.is_finite() {
                return Err(EvError::Training(format!(
                    "MLP loss became non-finite at epoch {}",
                    epoch + 1
                )));
            }

            if (loss_val as f64) < history.best_loss {
                best_model = self.model.clone();
            }
            history.record_epoch(epoch, loss_val as f64);

            if epoch % 50 == 0 || epoch + 1 == epochs {
                log::info!("Epoch {}/{}: loss {:.5}", epoch + 1, epochs, loss_val);
            }

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self.optimizer.step(self.learning_rate, self.model, grads);
        }

        log::info!(
            "Best epoch {} (loss {:.5})",
            history.best_epoch + 1,
            history.best_loss
        );

        Ok(FittedMlp {
            model: best_model,
            features,
            target,
            history,
        })
    }
}

/// Train an MLP on the default backend and package it for persistence
pub fn fit_mlp(
    x: &Array2<f64>,
    y: &Array1<f64>,
    config: &MlpTrainingConfig,
) -> Result<(MlpState, TrainingHistory)> {
    config.validate()?;
    let net_config = MlpConfig::new(x.ncols(), config.hidden_dims.clone(), config.dropout);
    let device = Default::default();

    let trainer = MlpTrainer::<TrainingBackend>::new(device, &net_config, config.learning_rate);
    let fitted = trainer.train(x, y, config.epochs)?;

    let state = MlpState::from_network(
        fitted.model.valid(),
        net_config,
        fitted.features,
        fitted.target,
    )?;
    Ok((state, fitted.history))
}
