//! Request encoding against a fixed feature schema
//!
//! The same encoder produces training rows and inference vectors, so both
//! sides share one column order and one indicator convention.

use std::collections::HashMap;

use super::schema::{FeatureSchema, MONTH_COLUMN, YEAR_COLUMN};
use crate::{EvError, Observation, PredictionRequest, Result};

/// A request encoded in schema column order
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRequest {
    pub values: Vec<f64>,
    /// False when no indicator column matched the requested region
    pub region_known: bool,
}

/// Encodes (year, month, region) into vectors aligned with a schema
///
/// Column positions and the region lookup table are computed once, when the
/// encoder is built.
#[derive(Debug, Clone)]
pub struct InferenceEncoder {
    width: usize,
    year_idx: usize,
    month_idx: usize,
    region_index: HashMap<String, usize>,
}

impl InferenceEncoder {
    pub fn new(schema: &FeatureSchema) -> Result<Self> {
        let year_idx = schema.position(YEAR_COLUMN).ok_or_else(|| {
            EvError::SchemaMismatch(format!("schema has no {:?} column", YEAR_COLUMN))
        })?;
        let month_idx = schema.position(MONTH_COLUMN).ok_or_else(|| {
            EvError::SchemaMismatch(format!("schema has no {:?} column", MONTH_COLUMN))
        })?;

        let region_index = schema
            .regions()
            .map(|(idx, label)| (label.to_string(), idx))
            .collect();

        Ok(InferenceEncoder {
            width: schema.len(),
            year_idx,
            month_idx,
            region_index,
        })
    }

    /// Length of every encoded vector
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn knows_region(&self, region: &str) -> bool {
        self.region_index.contains_key(region)
    }

    /// Indicator column position for a region, if the schema has one
    pub fn region_position(&self, region: &str) -> Option<usize> {
        self.region_index.get(region).copied()
    }

    /// Encode a prediction request
    ///
    /// An unseen region leaves every indicator at zero.
    pub fn encode(&self, request: &PredictionRequest) -> Result<EncodedRequest> {
        self.encode_parts(request.year, request.month, &request.region)
    }

    /// Encode a training observation (target excluded)
    pub fn encode_observation(&self, obs: &Observation) -> Result<EncodedRequest> {
        self.encode_parts(obs.year, obs.month, &obs.region)
    }

    fn encode_parts(&self, year: i32, month: u32, region: &str) -> Result<EncodedRequest> {
        if !(1..=12).contains(&month) {
            return Err(EvError::InvalidMonth(month));
        }

        let mut values = vec![0.0; self.width];
        values[self.year_idx] = year as f64;
        values[self.month_idx] = month as f64;

        let region_known = match self.region_index.get(region) {
            Some(&idx) => {
                values[idx] = 1.0;
                true
            }
            None => false,
        };

        Ok(EncodedRequest {
            values,
            region_known,
        })
    }

    /// Region label of a vector's single hot indicator, if exactly one is set
    pub fn decode_region<'a>(&'a self, values: &[f64]) -> Option<&'a str> {
        let mut hot = self
            .region_index
            .iter()
            .filter(|(_, idx)| values.get(**idx).copied() == Some(1.0));
        let first = hot.next()?;
        if hot.next().is_some() {
            return None;
        }
        Some(first.0.as_str())
    }
}
