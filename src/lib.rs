//! Blocktimer - wall-clock timing of code blocks and calls with query correlation
//!
//! This library measures how long a block or a call takes, attributes the
//! database queries issued during that window (read from an external query
//! ledger), and reports the result as structured `tracing` events.
//!
//! ```
//! use blocktimer::{InMemoryLedger, ProfilerConfig, ProfilerContext};
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(InMemoryLedger::new());
//! let context = ProfilerContext::new(ProfilerConfig::default()).with_ledger(ledger.clone());
//!
//! let mut timer = context.timer("load_users").unwrap();
//! timer.run(|| ledger.record("default", "SELECT * FROM users", 0.002));
//!
//! let measurement = timer.stop();
//! assert!(measurement.is_err()); // run() already stopped it
//! assert!(timer.duration_ms().unwrap() >= 0.0);
//! ```

pub mod call_stats;
pub mod clock;
pub mod config;
pub mod context;
pub mod correlator;
pub mod decorator;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod measurement;
pub mod timer;

pub use config::ProfilerConfig;
pub use context::ProfilerContext;
pub use decorator::{CallableMeta, Instrumented, Introspect, Profile, ProfileOptions, StatsSink};
pub use error::{ProfilerError, Result};
pub use ledger::{InMemoryLedger, QueryLedger, QueryRecord};
pub use logging::init_tracing;
pub use measurement::Measurement;
pub use timer::{Timer, TimerGuard, TimerOptions};
