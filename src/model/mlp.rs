//! Feed-forward regression network
//!
//! Architecture: Input(n) → Hidden1 → ReLU → Dropout
//!                        → Hidden2 → ReLU → Dropout (optional)
//!                        → head(1)
//!
//! Inputs and target are z-scored with statistics taken from the training
//! rows; both sets of statistics travel with the weights.

use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::Regressor;
use crate::{EvError, Result};

/// Backend used to serve predictions
pub type InferenceBackend = burn::backend::NdArray<f32>;

/// Backend used while fitting
pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;

/// Configuration for the MLP regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    /// Input dimension (schema width)
    pub input_dim: usize,
    /// One or two hidden layer sizes
    pub hidden_dims: Vec<usize>,
    pub dropout: f64,
}

impl MlpConfig {
    pub fn new(input_dim: usize, hidden_dims: Vec<usize>, dropout: f64) -> Self {
        MlpConfig {
            input_dim,
            hidden_dims,
            dropout,
        }
    }
}

/// A single hidden layer block: Linear → ReLU → Dropout
#[derive(Module, Debug)]
pub struct HiddenBlock<B: Backend> {
    linear: Linear<B>,
    dropout: Dropout,
}

impl<B: Backend> HiddenBlock<B> {
    pub fn new(device: &B::Device, in_dim: usize, out_dim: usize, dropout: f64) -> Self {
        HiddenBlock {
            linear: LinearConfig::new(in_dim, out_dim).init(device),
            dropout: DropoutConfig::new(dropout).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.linear.forward(x);
        let x = relu(x);
        self.dropout.forward(x)
    }
}

/// Registration count network
#[derive(Module, Debug)]
pub struct MlpNet<B: Backend> {
    hidden1: HiddenBlock<B>,
    hidden2: Option<HiddenBlock<B>>,
    head: Linear<B>,
}

impl<B: Backend> MlpNet<B> {
    pub fn new(device: &B::Device, config: &MlpConfig) -> Self {
        let first = config.hidden_dims.first().copied().unwrap_or(64);
        let hidden1 = HiddenBlock::new(device, config.input_dim, first, config.dropout);

        let (hidden2, head_input_dim) = match config.hidden_dims.get(1) {
            Some(&second) => (
                Some(HiddenBlock::new(device, first, second, config.dropout)),
                second,
            ),
            None => (None, first),
        };

        MlpNet {
            hidden1,
            hidden2,
            head: LinearConfig::new(head_input_dim, 1).init(device),
        }
    }

    /// Forward pass: [batch, input_dim] → normalized target [batch, 1]
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.hidden1.forward(x);
        let x = if let Some(h2) = &self.hidden2 {
            h2.forward(x)
        } else {
            x
        };
        self.head.forward(x)
    }
}

/// Per-column z-score statistics for the input matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureNormalization {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl FeatureNormalization {
    pub fn from_matrix(x: &Array2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let mut mean = Vec::with_capacity(x.ncols());
        let mut std = Vec::with_capacity(x.ncols());

        for column in x.columns() {
            let m = column.sum() / n;
            let var = column.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n;
            let s = var.sqrt();
            mean.push(m as f32);
            // Constant columns are centred but not scaled
            std.push(if s < 1e-6 { 1.0 } else { s as f32 });
        }

        FeatureNormalization { mean, std }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Normalize a whole matrix into a row-major buffer
    pub fn normalize_matrix(&self, x: &Array2<f64>) -> Vec<f32> {
        x.indexed_iter()
            .map(|((_, j), v)| (*v as f32 - self.mean[j]) / self.std[j])
            .collect()
    }

    pub fn normalize_row(&self, row: &[f64]) -> Vec<f32> {
        row.iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| (*v as f32 - m) / s)
            .collect()
    }
}

/// Target z-score statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetNormalization {
    pub mean: f32,
    pub std: f32,
}

impl TargetNormalization {
    pub fn from_targets(y: &Array1<f64>) -> Self {
        let n = y.len().max(1) as f64;
        let mean = y.sum() / n;
        let var = y.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        TargetNormalization {
            mean: mean as f32,
            std: (var.sqrt() as f32).max(1.0),
        }
    }

    pub fn normalize(&self, value: f64) -> f32 {
        (value as f32 - self.mean) / self.std
    }

    pub fn denormalize(&self, value: f32) -> f64 {
        (value * self.std + self.mean) as f64
    }
}

/// Serializable MLP: architecture, normalization and recorded weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpState {
    pub config: MlpConfig,
    pub features: FeatureNormalization,
    pub target: TargetNormalization,
    /// Full-precision burn record
    weights: Vec<u8>,
}

impl MlpState {
    /// Capture a trained network
    pub fn from_network(
        net: MlpNet<InferenceBackend>,
        config: MlpConfig,
        features: FeatureNormalization,
        target: TargetNormalization,
    ) -> Result<Self> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let weights = recorder
            .record(net.into_record(), ())
            .map_err(|e| EvError::Artifact(format!("Failed to record MLP weights: {}", e)))?;

        Ok(MlpState {
            config,
            features,
            target,
            weights,
        })
    }

    pub fn n_features(&self) -> usize {
        self.config.input_dim
    }

    /// Rebuild the network on the inference backend
    pub fn restore(&self) -> Result<MlpRegressor> {
        if self.features.dim() != self.config.input_dim {
            return Err(EvError::SchemaMismatch(format!(
                "MLP normalization covers {} columns but the network takes {}",
                self.features.dim(),
                self.config.input_dim
            )));
        }

        let device = Default::default();
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = recorder
            .load(self.weights.clone(), &device)
            .map_err(|e| EvError::Artifact(format!("Failed to load MLP weights: {}", e)))?;

        let net = MlpNet::<InferenceBackend>::new(&device, &self.config).load_record(record);

        Ok(MlpRegressor {
            net,
            features: self.features.clone(),
            target: self.target,
            device,
        })
    }
}

/// MLP ready to score encoded rows
#[derive(Debug)]
pub struct MlpRegressor {
    net: MlpNet<InferenceBackend>,
    features: FeatureNormalization,
    target: TargetNormalization,
    device: <InferenceBackend as Backend>::Device,
}

impl MlpRegressor {
    fn forward_rows(&self, flat: Vec<f32>, n_rows: usize) -> Result<Vec<f64>> {
        let width = self.features.dim();
        let x = Tensor::<InferenceBackend, 1>::from_floats(flat.as_slice(), &self.device)
            .reshape([n_rows, width]);

        let output = self.net.forward(x);
        let values: Vec<f32> = output
            .into_data()
            .to_vec()
            .map_err(|e| EvError::Training(format!("Failed to read MLP output: {:?}", e)))?;

        Ok(values
            .into_iter()
            .map(|v| self.target.denormalize(v))
            .collect())
    }
}

impl Regressor for MlpRegressor {
    fn n_features(&self) -> usize {
        self.features.dim()
    }

    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        if row.len() != self.n_features() {
            return Err(EvError::SchemaMismatch(format!(
                "MLP expects {} features, got {}",
                self.n_features(),
                row.len()
            )));
        }
        let values = self.forward_rows(self.features.normalize_row(row), 1)?;
        values
            .first()
            .copied()
            .ok_or_else(|| EvError::Training("MLP produced no output".to_string()))
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        if x.ncols() != self.n_features() {
            return Err(EvError::SchemaMismatch(format!(
                "MLP expects {} features, got {}",
                self.n_features(),
                x.ncols()
            )));
        }
        if x.nrows() == 0 {
            return Ok(Vec::new());
        }
        self.forward_rows(self.features.normalize_matrix(x), x.nrows())
    }
}
