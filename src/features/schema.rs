//! Feature schema fixed at training time
//!
//! Column layout: `year`, `month`, then one `Region_<label>` indicator per
//! distinct training region in sorted order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::{EvError, Observation, Result};

pub const YEAR_COLUMN: &str = "year";
pub const MONTH_COLUMN: &str = "month";
pub const REGION_PREFIX: &str = "Region_";

/// Ordered column names a trained predictor expects as input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    /// Derive the schema from the full training observation set
    pub fn from_observations(observations: &[Observation]) -> Result<Self> {
        if observations.is_empty() {
            return Err(EvError::SchemaConstruction(
                "no observations to build a schema from".to_string(),
            ));
        }

        let mut regions = BTreeSet::new();
        for (row, obs) in observations.iter().enumerate() {
            validate_observation(row, obs)?;
            regions.insert(obs.region.as_str());
        }

        let mut columns = Vec::with_capacity(2 + regions.len());
        columns.push(YEAR_COLUMN.to_string());
        columns.push(MONTH_COLUMN.to_string());
        columns.extend(regions.into_iter().map(region_column));

        log::debug!("Built feature schema with {} columns", columns.len());
        Ok(FeatureSchema { columns })
    }

    /// Rebuild a schema from persisted column names, checking its layout
    pub fn from_columns(columns: Vec<String>) -> Result<Self> {
        let schema = FeatureSchema { columns };
        schema.validate()?;
        Ok(schema)
    }

    /// Check the layout invariants of a (possibly deserialized) schema
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.columns.len());
        let mut has_year = false;
        let mut has_month = false;

        for column in &self.columns {
            if !seen.insert(column.as_str()) {
                return Err(EvError::SchemaMismatch(format!(
                    "duplicate column {:?}",
                    column
                )));
            }
            match column.as_str() {
                YEAR_COLUMN => has_year = true,
                MONTH_COLUMN => has_month = true,
                other => match other.strip_prefix(REGION_PREFIX) {
                    Some(label) if !label.trim().is_empty() => {}
                    _ => {
                        return Err(EvError::SchemaMismatch(format!(
                            "unexpected column {:?}",
                            other
                        )))
                    }
                },
            }
        }

        if !has_year || !has_month {
            return Err(EvError::SchemaMismatch(
                "schema lacks the year or month column".to_string(),
            ));
        }
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of a column by name
    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Region labels with their indicator column positions, in schema order
    pub fn regions(&self) -> impl Iterator<Item = (usize, &str)> {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(idx, c)| c.strip_prefix(REGION_PREFIX).map(|label| (idx, label)))
    }

    pub fn region_count(&self) -> usize {
        self.regions().count()
    }
}

/// Indicator column name for a region label
pub fn region_column(region: &str) -> String {
    format!("{}{}", REGION_PREFIX, region)
}

fn validate_observation(row: usize, obs: &Observation) -> Result<()> {
    if obs.region.trim().is_empty() {
        return Err(EvError::SchemaConstruction(format!(
            "observation {} has an empty region label",
            row
        )));
    }
    if !(1..=12).contains(&obs.month) {
        return Err(EvError::SchemaConstruction(format!(
            "observation {} has month {} outside 1-12",
            row, obs.month
        )));
    }
    if !obs.target.is_finite() || obs.target < 0.0 {
        return Err(EvError::SchemaConstruction(format!(
            "observation {} has invalid target {}",
            row, obs.target
        )));
    }
    Ok(())
}
