//! Dependency-injection root for timers and instrumented callables
//!
//! A [`ProfilerContext`] bundles the configuration, the optional query
//! ledger and the clock. It is cheap to clone and is checked once when a
//! timer is built: a context without a ledger never correlates queries.

use crate::clock::{Clock, MonotonicClock};
use crate::config::{self, ProfilerConfig};
use crate::correlator::Correlator;
use crate::decorator::{Profile, ProfileOptions};
use crate::error::Result;
use crate::ledger::{LedgerAdapter, QueryLedger};
use crate::timer::{Timer, TimerOptions};
use std::fmt;
use std::sync::Arc;

/// Shared settings and collaborators for measurements
#[derive(Clone)]
pub struct ProfilerContext {
    config: Arc<ProfilerConfig>,
    ledger: Option<Arc<dyn QueryLedger>>,
    clock: Arc<dyn Clock>,
}

impl Default for ProfilerContext {
    fn default() -> Self {
        Self::new(ProfilerConfig::default())
    }
}

impl fmt::Debug for ProfilerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfilerContext")
            .field("config", &self.config)
            .field("has_ledger", &self.ledger.is_some())
            .field("clock", &self.clock)
            .finish()
    }
}

impl ProfilerContext {
    /// Context without a query ledger, on the monotonic clock
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            config: Arc::new(config),
            ledger: None,
            clock: Arc::new(MonotonicClock),
        }
    }

    /// Like [`new`](Self::new), validating the configuration first
    pub fn try_new(config: ProfilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Correlate measurements with this ledger
    pub fn with_ledger(mut self, ledger: Arc<dyn QueryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn has_ledger(&self) -> bool {
        self.ledger.is_some()
    }

    /// Timer with default options
    pub fn timer(&self, name: impl Into<String>) -> Result<Timer> {
        self.timer_with(name, TimerOptions::default())
    }

    /// Timer with explicit options
    pub fn timer_with(&self, name: impl Into<String>, options: TimerOptions) -> Result<Timer> {
        let name = name.into();
        Timer::validate_name(&name)?;
        if let Some(connection_names) = &options.connection_names {
            config::validate_connection_names(connection_names)?;
        }

        let mut timer = self.build_timer(name, &options);
        if options.auto_start {
            timer.start();
        }
        Ok(timer)
    }

    /// Build a timer for a name that is already known to be valid
    pub(crate) fn build_timer(&self, name: String, options: &TimerOptions) -> Timer {
        let connection_names = options
            .connection_names
            .clone()
            .unwrap_or_else(|| self.config.connection_names.clone());
        let correlator = Correlator::new(
            LedgerAdapter::new(self.ledger.clone()),
            connection_names,
            options.profile_sql,
            self.config.profile_sql_queries,
        );
        let channel = self.config.channel_for(&name);
        Timer::from_parts(name, channel, self.clock.clone(), correlator)
    }

    /// Decorator factory with default options
    pub fn profile(&self) -> Profile {
        Profile::new(self.clone(), ProfileOptions::default())
    }

    /// Decorator factory with explicit options
    pub fn profile_with(&self, options: ProfileOptions) -> Profile {
        Profile::new(self.clone(), options)
    }
}
