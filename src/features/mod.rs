//! Feature extraction and encoding
//!
//! Converts dated records into observations and observations or requests
//! into schema-aligned vectors.

pub mod encoding;
pub mod schema;
pub mod temporal;

pub use encoding::{EncodedRequest, InferenceEncoder};
pub use schema::FeatureSchema;
pub use temporal::CalendarFeatures;
