//! CSV ingestion of registration data
//!
//! Two layouts are understood:
//! - raw county records: `Date`, `County`, `State`, `Electric Vehicle (EV) Total`
//! - prepared observations: `year`, `month`, `Region`, `Electric Vehicle (EV) Total`
//!
//! Extra columns are ignored. A malformed row fails the whole read with its
//! line number.

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::features::temporal;
use crate::{EvError, Observation, Result};

pub const TARGET_COLUMN: &str = "Electric Vehicle (EV) Total";

#[derive(Debug, Deserialize)]
struct RegistrationRow {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "County")]
    county: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Electric Vehicle (EV) Total")]
    ev_total: String,
}

#[derive(Debug, Deserialize)]
struct PreparedRow {
    year: i32,
    month: u32,
    #[serde(rename = "Region")]
    region: String,
    #[serde(rename = "Electric Vehicle (EV) Total")]
    ev_total: String,
}

#[derive(Debug, Serialize)]
struct PreparedRecord<'a> {
    year: i32,
    month: u32,
    #[serde(rename = "Region")]
    region: &'a str,
    #[serde(rename = "Electric Vehicle (EV) Total")]
    ev_total: f64,
}

/// Read dated county/state records from a CSV file
pub fn read_registrations<P: AsRef<Path>>(path: P) -> Result<Vec<Observation>> {
    let file = File::open(path.as_ref())?;
    let observations = registrations_from_reader(BufReader::new(file))?;
    log::info!(
        "Read {} registration records from {}",
        observations.len(),
        path.as_ref().display()
    );
    Ok(observations)
}

pub fn registrations_from_reader<R: Read>(reader: R) -> Result<Vec<Observation>> {
    read_rows(reader, |row: RegistrationRow| {
        temporal::observation_from_record(&row.date, &row.county, &row.state, &row.ev_total)
    })
}

/// Read prepared observations from a CSV file
pub fn read_observations<P: AsRef<Path>>(path: P) -> Result<Vec<Observation>> {
    let file = File::open(path.as_ref())?;
    let observations = observations_from_reader(BufReader::new(file))?;
    log::info!(
        "Read {} observations from {}",
        observations.len(),
        path.as_ref().display()
    );
    Ok(observations)
}

pub fn observations_from_reader<R: Read>(reader: R) -> Result<Vec<Observation>> {
    read_rows(reader, |row: PreparedRow| {
        if !(1..=12).contains(&row.month) {
            return Err(EvError::Parse(format!("month {} outside 1-12", row.month)));
        }
        let region = row.region.trim();
        if region.is_empty() {
            return Err(EvError::Parse("empty Region".to_string()));
        }
        Ok(Observation::new(
            row.year,
            row.month,
            region,
            temporal::parse_count(&row.ev_total)?,
        ))
    })
}

/// Write observations in the prepared layout
pub fn write_observations<P: AsRef<Path>>(path: P, observations: &[Observation]) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path.as_ref())?;
    observations_to_writer(file, observations)?;
    log::info!(
        "Wrote {} observations to {}",
        observations.len(),
        path.as_ref().display()
    );
    Ok(())
}

pub fn observations_to_writer<W: Write>(writer: W, observations: &[Observation]) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    for obs in observations {
        wtr.serialize(PreparedRecord {
            year: obs.year,
            month: obs.month,
            region: &obs.region,
            ev_total: obs.target,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

fn read_rows<R, T, F>(reader: R, mut convert: F) -> Result<Vec<Observation>>
where
    R: Read,
    T: serde::de::DeserializeOwned,
    F: FnMut(T) -> Result<Observation>,
{
    let mut rdr = ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);
    let headers = rdr.headers()?.clone();

    let mut observations = Vec::new();
    let mut record = StringRecord::new();
    while rdr.read_record(&mut record)? {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let row: T = record.deserialize(Some(&headers))?;
        let obs = convert(row).map_err(|e| match e {
            EvError::Parse(msg) => EvError::Parse(format!("line {}: {}", line, msg)),
            other => other,
        })?;
        observations.push(obs);
    }
    Ok(observations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_raw_registrations() {
        let data = "\
Date,County,State,Vehicle Primary Use,Electric Vehicle (EV) Total
January 31 2020,King,WA,Passenger,\"1,204\"
2020-02-29,Pierce,WA,Passenger,87
";
        let obs = registrations_from_reader(data.as_bytes()).unwrap();
        assert_eq!(
            obs,
            vec![
                Observation::new(2020, 1, "King, WA", 1204.0),
                Observation::new(2020, 2, "Pierce, WA", 87.0),
            ]
        );
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let data = "\
Date,County,State,Electric Vehicle (EV) Total
2020-01-31,King,WA,10
someday,Pierce,WA,5
";
        let err = registrations_from_reader(data.as_bytes()).unwrap_err();
        match err {
            EvError::Parse(msg) => assert!(msg.starts_with("line 3"), "{}", msg),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_county_is_an_error() {
        let data = "\
Date,County,State,Electric Vehicle (EV) Total
2020-01-31,,WA,10
";
        assert!(matches!(
            registrations_from_reader(data.as_bytes()),
            Err(EvError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_column_is_csv_error() {
        let data = "Date,County,Electric Vehicle (EV) Total\n2020-01-31,King,10\n";
        assert!(matches!(
            registrations_from_reader(data.as_bytes()),
            Err(EvError::Csv(_))
        ));
    }

    #[test]
    fn test_prepared_round_trip_through_writer() {
        let observations = vec![
            Observation::new(2020, 1, "King, WA", 100.0),
            Observation::new(2021, 12, "Pierce, WA", 50.5),
        ];

        let mut buffer = Vec::new();
        observations_to_writer(&mut buffer, &observations).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("year,month,Region,Electric Vehicle (EV) Total"));

        let parsed = observations_from_reader(buffer.as_slice()).unwrap();
        assert_eq!(parsed, observations);
    }

    #[test]
    fn test_prepared_rejects_bad_month() {
        let data = "year,month,Region,Electric Vehicle (EV) Total\n2020,13,\"King, WA\",4\n";
        let err = observations_from_reader(data.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("final_data.csv");
        let observations = vec![Observation::new(2022, 3, "Adams, CO", 7.0)];

        write_observations(&path, &observations).unwrap();
        assert_eq!(read_observations(&path).unwrap(), observations);
    }
}
