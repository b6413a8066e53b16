//! Query correlation and log emission
//!
//! A [`Correlator`] snapshots every configured connection when a window
//! opens and diffs the ledger when it closes. The emit functions turn the
//! outcome into `tracing` events under [`LOG_TARGET`]; the logical channel
//! travels in the `channel` field.

use crate::ledger::{LedgerAdapter, QueryDelta, QueryRecord, QuerySnapshot};

/// Target of every event emitted by this crate
pub const LOG_TARGET: &str = "blocktimer";

/// Outcome of correlating one window with the ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    /// False when no ledger was available at window start
    pub active: bool,
    /// Per-connection deltas in configuration order
    pub per_connection: Vec<QueryDelta>,
    /// Whether each query should be logged individually
    pub log_detail: bool,
}

impl Correlation {
    pub fn query_count(&self) -> usize {
        self.per_connection.iter().map(|delta| delta.count).sum()
    }

    pub fn query_time(&self) -> f64 {
        self.per_connection.iter().map(|delta| delta.total_time).sum()
    }

    /// Queries of every connection, connection by connection
    pub fn queries(&self) -> impl Iterator<Item = &QueryRecord> {
        self.per_connection
            .iter()
            .flat_map(|delta| delta.queries.iter())
    }
}

/// Attributes ledger activity to a measurement window
#[derive(Debug, Clone)]
pub struct Correlator {
    adapter: LedgerAdapter,
    connection_names: Vec<String>,
    profile_sql: bool,
    always_profile_sql: bool,
    snapshot: QuerySnapshot,
}

impl Correlator {
    /// `profile_sql` forces per-query detail for this window;
    /// `always_profile_sql` logs detail whenever the window ran queries.
    pub fn new(
        adapter: LedgerAdapter,
        connection_names: Vec<String>,
        profile_sql: bool,
        always_profile_sql: bool,
    ) -> Self {
        Self {
            adapter,
            connection_names,
            profile_sql,
            always_profile_sql,
            snapshot: QuerySnapshot::default(),
        }
    }

    /// Capture pre-counts for every configured connection
    pub fn begin(&mut self) {
        self.snapshot = self.adapter.snapshot(&self.connection_names);
    }

    /// Whether the current window is being correlated
    pub fn is_active(&self) -> bool {
        !self.snapshot.is_empty()
    }

    pub fn connection_names(&self) -> &[String] {
        &self.connection_names
    }

    /// Diff the ledger against the snapshot taken by [`begin`](Self::begin)
    pub fn finish(&self) -> Correlation {
        if !self.is_active() {
            return Correlation::default();
        }

        let per_connection: Vec<QueryDelta> = self
            .snapshot
            .iter()
            .map(|(connection, pre_count)| self.adapter.delta(connection, pre_count))
            .collect();
        let query_count: usize = per_connection.iter().map(|delta| delta.count).sum();
        let log_detail = self.profile_sql || (self.always_profile_sql && query_count > 0);

        Correlation {
            active: true,
            per_connection,
            log_detail,
        }
    }
}

/// Summary record, one per finished window
pub(crate) fn emit_summary(channel: &str, name: &str, duration_ms: f64, correlation: &Correlation) {
    if correlation.active {
        let query_count = correlation.query_count();
        let query_time = correlation.query_time();
        tracing::info!(
            target: LOG_TARGET,
            channel,
            timer = name,
            duration_ms,
            query_count,
            query_time,
            "{} took: {:.6} ms, executed {} queries in {:.6} seconds",
            name,
            duration_ms,
            query_count,
            query_time
        );
    } else {
        tracing::info!(
            target: LOG_TARGET,
            channel,
            timer = name,
            duration_ms,
            "{} took: {:.6} ms",
            name,
            duration_ms
        );
    }
}

/// One detail record per query, when the correlation asks for it
pub(crate) fn emit_queries(channel: &str, correlation: &Correlation) {
    if !correlation.log_detail {
        return;
    }
    for delta in &correlation.per_connection {
        for query in &delta.queries {
            tracing::debug!(
                target: LOG_TARGET,
                channel,
                connection = delta.connection.as_str(),
                query_time = query.time,
                "({}) {}",
                query.time,
                query.sql
            );
        }
    }
}

/// Error record for a failure that escaped the measured block
pub(crate) fn emit_interception(channel: &str, name: &str, kind: &str, message: &str) {
    tracing::error!(
        target: LOG_TARGET,
        channel,
        timer = name,
        error_kind = kind,
        "{}: Exception \"{}\" with value \"{}\" intercepted while profiling",
        name,
        kind,
        message
    );
}
