//! On-disk model artifact
//!
//! Layout: `EVDM` magic, little-endian u32 format version, bincode body.
//! Schema and model travel in one file so they cannot be paired wrongly.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::features::FeatureSchema;
use crate::model::ModelState;
use crate::training::TrainingReport;
use crate::{EvError, Result};

pub const MAGIC: &[u8; 4] = b"EVDM";
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;

/// Feature schema, trained model and training summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema: FeatureSchema,
    pub model: ModelState,
    pub report: TrainingReport,
}

impl ModelArtifact {
    pub fn new(schema: FeatureSchema, model: ModelState, report: TrainingReport) -> Result<Self> {
        let artifact = ModelArtifact {
            schema,
            model,
            report,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Check that the schema is well formed and matches the model width
    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        if self.model.n_features() != self.schema.len() {
            return Err(EvError::SchemaMismatch(format!(
                "model expects {} features but the schema has {} columns",
                self.model.n_features(),
                self.schema.len()
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| EvError::Artifact(format!("Failed to encode artifact: {}", e)))?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(EvError::Artifact("not an ev-demand model file".to_string()));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[4..HEADER_LEN]);
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(EvError::Artifact(format!(
                "unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }

        let artifact: ModelArtifact = bincode::deserialize(&bytes[HEADER_LEN..])
            .map_err(|e| EvError::Artifact(format!("Failed to decode artifact: {}", e)))?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Save to file, creating parent directories
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_bytes()?)?;
        log::info!("Model saved to {}", path.display());
        Ok(())
    }

    /// Load from file; a missing file means no model has been trained
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(EvError::NoModel),
            Err(e) => return Err(e.into()),
        };
        let artifact = Self::from_bytes(&bytes)?;
        log::debug!(
            "Loaded {} model with {} columns from {}",
            artifact.model.kind(),
            artifact.schema.len(),
            path.display()
        );
        Ok(artifact)
    }
}
