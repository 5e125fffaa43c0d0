//! Date and region feature extraction
//!
//! Turns dated county/state registration records into observation fields.

use chrono::{Datelike, NaiveDate};

use crate::{EvError, Observation, Result};

/// Date layouts seen in registration exports, tried in order
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%B %d %Y", "%B %d, %Y"];

/// Calendar fields used as numeric features
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarFeatures {
    pub year: i32,
    pub month: u32,
}

impl CalendarFeatures {
    pub fn from_date(date: NaiveDate) -> Self {
        CalendarFeatures {
            year: date.year(),
            month: date.month(),
        }
    }
}

/// Parse a date in any supported layout
///
/// Timestamps such as `2022-03-31 00:00:00` are accepted by dropping the
/// time part.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim();
    let date_part = trimmed.split(' ').next().unwrap_or(trimmed);

    for candidate in [trimmed, date_part] {
        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
                return Ok(date);
            }
        }
    }

    Err(EvError::Parse(format!("Unrecognised date: {:?}", value)))
}

/// Region label: "<County>, <State>"
pub fn region_label(county: &str, state: &str) -> Result<String> {
    let county = county.trim();
    let state = state.trim();
    if county.is_empty() || state.is_empty() {
        return Err(EvError::Parse(format!(
            "Region needs both county and state, got {:?} / {:?}",
            county, state
        )));
    }
    Ok(format!("{}, {}", county, state))
}

/// Parse a registration count, allowing thousands separators
pub fn parse_count(value: &str) -> Result<f64> {
    let cleaned: String = value.trim().chars().filter(|c| *c != ',').collect();
    let count: f64 = cleaned
        .parse()
        .map_err(|_| EvError::Parse(format!("Invalid count: {:?}", value)))?;
    if !count.is_finite() || count < 0.0 {
        return Err(EvError::Parse(format!("Count must be non-negative: {:?}", value)));
    }
    Ok(count)
}

/// Build an observation from one dated county/state record
pub fn observation_from_record(
    date: &str,
    county: &str,
    state: &str,
    ev_total: &str,
) -> Result<Observation> {
    let calendar = CalendarFeatures::from_date(parse_date(date)?);
    Ok(Observation {
        year: calendar.year,
        month: calendar.month,
        region: region_label(county, state)?,
        target: parse_count(ev_total)?,
    })
}
