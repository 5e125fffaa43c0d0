//! SQLite storage for registration observations

use crate::{Observation, Result};
use rusqlite::{params, Connection};
use std::path::Path;

/// Database connection and operations
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS observations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                year INTEGER NOT NULL,
                month INTEGER NOT NULL CHECK (month BETWEEN 1 AND 12),
                region TEXT NOT NULL,
                ev_total REAL NOT NULL,
                imported_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_observations_region ON observations(region);
            CREATE INDEX IF NOT EXISTS idx_observations_period ON observations(year, month);
            "#,
        )?;
        Ok(())
    }

    // ==================== Observation Operations ====================

    /// Store one observation
    ///
    /// Exports carry several rows per region and month (one per vehicle use),
    /// so rows are appended, never merged.
    pub fn insert_observation(&self, obs: &Observation) -> Result<()> {
        self.conn.execute(
            "INSERT INTO observations (year, month, region, ev_total) VALUES (?1, ?2, ?3, ?4)",
            params![obs.year, obs.month, obs.region, obs.target],
        )?;
        Ok(())
    }

    /// Insert multiple observations in one transaction, returning rows stored
    pub fn insert_observations(&mut self, observations: &[Observation]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut stored = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO observations (year, month, region, ev_total) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for obs in observations {
                stored += stmt.execute(params![obs.year, obs.month, obs.region, obs.target])?;
            }
        }
        tx.commit()?;
        Ok(stored)
    }

    /// Get all observations ordered by period then region
    pub fn get_all_observations(&self) -> Result<Vec<Observation>> {
        let mut stmt = self.conn.prepare(
            "SELECT year, month, region, ev_total
             FROM observations
             ORDER BY year, month, region, id",
        )?;

        let observations = stmt
            .query_map([], Self::row_to_observation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(observations)
    }

    /// Distinct region labels in sorted order
    pub fn regions(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT region FROM observations ORDER BY region")?;
        let regions = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(regions)
    }

    /// Remove every stored observation
    pub fn clear_observations(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM observations", [])?)
    }

    fn row_to_observation(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
        Ok(Observation {
            year: row.get(0)?,
            month: row.get(1)?,
            region: row.get(2)?,
            target: row.get(3)?,
        })
    }

    // ==================== Statistics ====================

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let (observation_count, region_count, total_registrations): (i64, i64, Option<f64>) =
            self.conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT region), SUM(ev_total) FROM observations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        let (earliest, latest): (Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT MIN(year * 100 + month), MAX(year * 100 + month) FROM observations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let split_period = |p: i64| ((p / 100) as i32, (p % 100) as u32);

        Ok(DatabaseStats {
            observation_count: observation_count as usize,
            region_count: region_count as usize,
            total_registrations: total_registrations.unwrap_or(0.0),
            earliest_period: earliest.map(split_period),
            latest_period: latest.map(split_period),
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseStats {
    pub observation_count: usize,
    pub region_count: usize,
    pub total_registrations: f64,
    /// (year, month)
    pub earliest_period: Option<(i32, u32)>,
    pub latest_period: Option<(i32, u32)>,
}
