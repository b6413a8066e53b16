//! Query ledger adapter
//!
//! A query ledger is an append-only list of executed queries per named
//! connection, kept by some collaborator outside this crate (a database
//! layer, a test double, ...). The adapter never intercepts queries: it
//! records each list's length when a window opens and re-reads the tail
//! when the window closes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, PoisonError, RwLock};

/// A single executed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    /// Query text
    pub sql: String,
    /// Elapsed time in seconds
    pub time: f64,
}

impl QueryRecord {
    pub fn new(sql: impl Into<String>, time: f64) -> Self {
        Self {
            sql: sql.into(),
            time,
        }
    }
}

/// Read-only view of a collaborator's per-connection query lists
///
/// Unknown connections behave like empty lists.
pub trait QueryLedger: Send + Sync + Debug {
    /// Number of queries recorded on `connection` so far
    fn query_count(&self, connection: &str) -> usize;

    /// Queries recorded on `connection` from index `from` to the end
    fn queries_since(&self, connection: &str, from: usize) -> Vec<QueryRecord>;
}

/// Ledger kept in memory, shareable across threads
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    connections: RwLock<HashMap<String, Vec<QueryRecord>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a query to a connection's list
    pub fn record(&self, connection: &str, sql: impl Into<String>, time: f64) {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        connections
            .entry(connection.to_string())
            .or_default()
            .push(QueryRecord::new(sql, time));
    }

    /// Swap a connection's whole list
    pub fn replace(&self, connection: &str, queries: Vec<QueryRecord>) {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        connections.insert(connection.to_string(), queries);
    }

    /// Forget every query recorded on a connection
    pub fn clear(&self, connection: &str) {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        connections.remove(connection);
    }
}

impl QueryLedger for InMemoryLedger {
    fn query_count(&self, connection: &str) -> usize {
        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        connections.get(connection).map_or(0, Vec::len)
    }

    fn queries_since(&self, connection: &str, from: usize) -> Vec<QueryRecord> {
        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        connections
            .get(connection)
            .and_then(|queries| queries.get(from..))
            .map(<[QueryRecord]>::to_vec)
            .unwrap_or_default()
    }
}

/// Per-connection query counts captured when a window opens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySnapshot {
    counts: Vec<(String, usize)>,
}

impl QuerySnapshot {
    /// Pre-count for a connection, if it was captured
    pub fn get(&self, connection: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|(name, _)| name == connection)
            .map(|(_, count)| *count)
    }

    /// Connections in capture order
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(name, count)| (name.as_str(), *count))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// An empty snapshot means correlation is disabled for the window
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Queries attributed to one connection within a window
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryDelta {
    pub connection: String,
    pub count: usize,
    pub total_time: f64,
    pub queries: Vec<QueryRecord>,
}

/// Snapshot and diff access to an optional ledger
#[derive(Debug, Clone, Default)]
pub struct LedgerAdapter {
    ledger: Option<Arc<dyn QueryLedger>>,
}

impl LedgerAdapter {
    pub fn new(ledger: Option<Arc<dyn QueryLedger>>) -> Self {
        Self { ledger }
    }

    /// Whether a query-tracking collaborator is configured
    pub fn is_available(&self) -> bool {
        self.ledger.is_some()
    }

    /// Current query count of every named connection
    ///
    /// Returns an empty snapshot when no ledger is configured.
    pub fn snapshot(&self, connection_names: &[String]) -> QuerySnapshot {
        let Some(ledger) = &self.ledger else {
            return QuerySnapshot::default();
        };

        QuerySnapshot {
            counts: connection_names
                .iter()
                .map(|name| (name.clone(), ledger.query_count(name)))
                .collect(),
        }
    }

    /// Queries issued on `connection` since it held `pre_count` entries
    pub fn delta(&self, connection: &str, pre_count: usize) -> QueryDelta {
        let queries = self
            .ledger
            .as_ref()
            .map(|ledger| ledger.queries_since(connection, pre_count))
            .unwrap_or_default();
        let total_time = queries.iter().map(|query| query.time).sum();

        QueryDelta {
            connection: connection.to_string(),
            count: queries.len(),
            total_time,
            queries,
        }
    }
}
