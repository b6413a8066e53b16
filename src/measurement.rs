//! Result of one completed measurement window

use crate::ledger::QueryRecord;
use serde::Serialize;
use std::fmt;

/// Query usage of a single connection within a window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionUsage {
    pub connection: String,
    pub count: usize,
    pub time_seconds: f64,
}

/// Everything known about a finished (or interrupted) window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub name: String,
    pub channel: String,
    pub duration_seconds: f64,
    pub duration_ms: f64,
    pub duration_us: f64,
    /// False when no query ledger was available for this window
    pub correlated: bool,
    pub query_count: usize,
    pub query_time_seconds: f64,
    pub per_connection: Vec<ConnectionUsage>,
    pub per_query_detail: Vec<QueryRecord>,
}

impl Measurement {
    /// The summary log line
    ///
    /// `<name> took: <ms> ms` or, when correlated,
    /// `<name> took: <ms> ms, executed <n> queries in <s> seconds`.
    pub fn summary(&self) -> String {
        self.to_string()
    }

    /// Serialize the measurement as a JSON object
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} took: {:.6} ms", self.name, self.duration_ms)?;
        if self.correlated {
            write!(
                f,
                ", executed {} queries in {:.6} seconds",
                self.query_count, self.query_time_seconds
            )?;
        }
        Ok(())
    }
}
