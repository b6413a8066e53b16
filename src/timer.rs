//! Wall-clock timer with query correlation
//!
//! A [`Timer`] measures one window: it is started once, stopped at most once
//! and can be read any number of times. Stopping emits a summary record
//! (and optional per-query records) through `tracing`.
//!
//! Three ways to bracket a block:
//! - [`Timer::enter`] returns a guard that stops the timer when dropped
//! - [`Timer::run`] / [`Timer::try_run`] wrap a closure and log failures
//! - [`profile_block!`](crate::profile_block) combines both with a context
//!
//! Failures escaping the block are logged at ERROR before the summary and
//! are then handed back unchanged.

use crate::clock::Clock;
use crate::context::ProfilerContext;
use crate::correlator::{self, Correlation, Correlator};
use crate::error::{ProfilerError, Result};
use crate::ledger::QueryRecord;
use crate::measurement::{ConnectionUsage, Measurement};
use std::any::Any;
use std::fmt::{self, Display};
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time a block against a [`ProfilerContext`]
///
/// Plain form: evaluates to `Result<T>` where `T` is the block's value; the
/// only error is an invalid timer name. `?` and `return` inside the block
/// behave as in the enclosing function and the timer is stopped on every
/// exit path, but only panics are intercepted: an `Err` leaving through `?`
/// gets the summary record and no error record.
///
/// `try` form: the block evaluates to `Result<T, E>` and runs through
/// [`Timer::try_run`], so an `Err` (from `?` or returned) is logged before
/// the summary and handed back unchanged. The macro evaluates to
/// `Result<T, E>`; an invalid timer name is converted with `E::from`.
/// `return` inside a `try` block leaves the block, not the function.
///
/// # Example
/// ```
/// use blocktimer::{profile_block, ProfilerContext, ProfilerError};
///
/// let context = ProfilerContext::default();
/// let total = profile_block!(context, "sum small numbers", {
///     (1..=10).sum::<u32>()
/// })
/// .unwrap();
/// assert_eq!(total, 55);
///
/// let parsed: Result<u32, ProfilerError> = profile_block!(context, "parse", try {
///     Ok("42".parse::<u32>().unwrap_or_default())
/// });
/// assert_eq!(parsed.unwrap(), 42);
/// ```
#[macro_export]
macro_rules! profile_block {
    ($context:expr, $name:expr, try $block:block) => {{
        match $context.timer($name) {
            Ok(mut timer) => timer.try_run(|| $block),
            Err(e) => Err(::core::convert::From::from(e)),
        }
    }};
    ($context:expr, $name:expr, $block:block) => {{
        match $context.timer($name) {
            Ok(mut timer) => {
                let result = {
                    let _guard = timer.enter();
                    $block
                };
                Ok(result)
            }
            Err(e) => Err(e),
        }
    }};
}

/// Value logged when a panic unwinds through a [`TimerGuard`]
pub const GUARD_PANIC_MESSAGE: &str = "thread panicked inside the timed scope";

/// Per-timer settings layered over the context configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerOptions {
    /// Start immediately after construction
    pub auto_start: bool,
    /// Log every query of the window
    pub profile_sql: bool,
    /// Connections to correlate instead of the configured defaults
    pub connection_names: Option<Vec<String>>,
}

impl TimerOptions {
    pub fn auto_start(mut self) -> Self {
        self.auto_start = true;
        self
    }

    pub fn profile_sql(mut self, enabled: bool) -> Self {
        self.profile_sql = enabled;
        self
    }

    pub fn connections<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.connection_names = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// Measures the wall-clock duration of one window
#[derive(Debug)]
pub struct Timer {
    name: String,
    channel: String,
    clock: Arc<dyn Clock>,
    correlator: Correlator,
    start_time: Option<Instant>,
    stop_time: Option<Instant>,
}

impl Timer {
    /// Timer on the default context (no query ledger, monotonic clock)
    pub fn new(name: impl Into<String>) -> Result<Self> {
        ProfilerContext::default().timer(name)
    }

    /// Like [`Timer::new`], already started
    pub fn started(name: impl Into<String>) -> Result<Self> {
        ProfilerContext::default().timer_with(name, TimerOptions::default().auto_start())
    }

    /// Build a timer whose name is known to be usable
    pub(crate) fn from_parts(
        name: String,
        channel: String,
        clock: Arc<dyn Clock>,
        correlator: Correlator,
    ) -> Self {
        Self {
            name,
            channel,
            clock,
            correlator,
            start_time: None,
            stop_time: None,
        }
    }

    pub(crate) fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ProfilerError::EmptyName);
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logging channel this timer reports on
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Connections correlated by this timer
    pub fn connection_names(&self) -> &[String] {
        self.correlator.connection_names()
    }

    pub fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_time.is_some()
    }

    /// Whether the current window is correlated with a query ledger
    pub fn is_correlating(&self) -> bool {
        self.correlator.is_active()
    }

    /// Open the window
    ///
    /// Starting a running timer moves its start forward. Starting a stopped
    /// timer opens a fresh window.
    pub fn start(&mut self) {
        self.stop_time = None;
        self.correlator.begin();
        self.start_time = Some(self.clock.now());
    }

    /// Close the window and emit its summary
    ///
    /// Fails if the timer was never started or is already stopped; nothing is
    /// logged in either case.
    pub fn stop(&mut self) -> Result<Measurement> {
        let Some(start_time) = self.start_time else {
            return Err(ProfilerError::StoppedBeforeStarted {
                name: self.name.clone(),
            });
        };
        if self.stop_time.is_some() {
            return Err(ProfilerError::AlreadyStopped {
                name: self.name.clone(),
            });
        }
        Ok(self.finish(start_time))
    }

    fn finish(&mut self, start_time: Instant) -> Measurement {
        let stop_time = self.clock.now();
        self.stop_time = Some(stop_time);

        let correlation = self.correlator.finish();
        let seconds = stop_time.saturating_duration_since(start_time).as_secs_f64();
        let measurement = self.measurement(seconds, &correlation);

        correlator::emit_summary(&self.channel, &self.name, measurement.duration_ms, &correlation);
        correlator::emit_queries(&self.channel, &correlation);
        measurement
    }

    fn measurement(&self, seconds: f64, correlation: &Correlation) -> Measurement {
        Measurement {
            name: self.name.clone(),
            channel: self.channel.clone(),
            duration_seconds: seconds,
            duration_ms: round6(seconds * 1_000.0),
            duration_us: round6(seconds * 1_000_000.0),
            correlated: correlation.active,
            query_count: correlation.query_count(),
            query_time_seconds: correlation.query_time(),
            per_connection: correlation
                .per_connection
                .iter()
                .map(|delta| ConnectionUsage {
                    connection: delta.connection.clone(),
                    count: delta.count,
                    time_seconds: delta.total_time,
                })
                .collect(),
            per_query_detail: correlation.queries().cloned().collect::<Vec<QueryRecord>>(),
        }
    }

    /// Time since start, frozen once stopped
    pub fn elapsed(&self) -> Result<Duration> {
        let Some(start_time) = self.start_time else {
            return Err(ProfilerError::NotStarted {
                name: self.name.clone(),
            });
        };
        let end = self.stop_time.unwrap_or_else(|| self.clock.now());
        Ok(end.saturating_duration_since(start_time))
    }

    pub fn duration_seconds(&self) -> Result<f64> {
        Ok(self.elapsed()?.as_secs_f64())
    }

    /// Duration in milliseconds, rounded to 6 decimal places
    pub fn duration_ms(&self) -> Result<f64> {
        Ok(round6(self.duration_seconds()? * 1_000.0))
    }

    /// Duration in microseconds, rounded to 6 decimal places
    pub fn duration_us(&self) -> Result<f64> {
        Ok(round6(self.duration_seconds()? * 1_000_000.0))
    }

    /// Start the timer and return a guard that stops it when dropped
    pub fn enter(&mut self) -> TimerGuard<'_> {
        self.start();
        TimerGuard { timer: self }
    }

    /// Time a closure; a panic is logged and then resumed
    pub fn run<T>(&mut self, f: impl FnOnce() -> T) -> T {
        self.start();
        let outcome = panic::catch_unwind(AssertUnwindSafe(f));
        if let Err(payload) = &outcome {
            self.intercept("panic", &panic_message(payload.as_ref()));
        }
        self.close();
        match outcome {
            Ok(value) => value,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Time a fallible closure; an `Err` is logged and returned unchanged
    pub fn try_run<T, E>(
        &mut self,
        f: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: Display,
    {
        self.start();
        let outcome = panic::catch_unwind(AssertUnwindSafe(f));
        match &outcome {
            Ok(Err(e)) => self.intercept_error(e),
            Err(payload) => self.intercept("panic", &panic_message(payload.as_ref())),
            Ok(Ok(_)) => {}
        }
        self.close();
        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Log a workload error against this timer
    pub fn intercept_error<E: Display + ?Sized>(&self, error: &E) {
        self.intercept(std::any::type_name::<E>(), &error.to_string());
    }

    pub(crate) fn intercept(&self, kind: &str, message: &str) {
        correlator::emit_interception(&self.channel, &self.name, kind, message);
    }

    /// Stop if still running; used on scope exit
    fn close(&mut self) {
        if let (Some(start_time), None) = (self.start_time, self.stop_time) {
            self.finish(start_time);
        }
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Profiler({})", self.name)
    }
}

/// Scope guard returned by [`Timer::enter`]
///
/// Dropping the guard stops the timer unless it was stopped explicitly.
/// When dropped during a panic, an interception record is emitted first.
/// The panic payload is not reachable from `Drop`, so that record carries
/// [`GUARD_PANIC_MESSAGE`] instead of the panic's message; use
/// [`Timer::run`] or [`Timer::try_run`] to log the actual message. Errors
/// returned through `?` are not intercepted by the guard.
#[derive(Debug)]
pub struct TimerGuard<'a> {
    timer: &'a mut Timer,
}

impl Deref for TimerGuard<'_> {
    type Target = Timer;

    fn deref(&self) -> &Timer {
        self.timer
    }
}

impl DerefMut for TimerGuard<'_> {
    fn deref_mut(&mut self) -> &mut Timer {
        self.timer
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() && !self.timer.is_stopped() {
            self.timer.intercept("panic", GUARD_PANIC_MESSAGE);
        }
        self.timer.close();
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
