//! Call statistics for instrumented callables
//!
//! [`collect`] runs a closure with a collector active on the current thread.
//! Every instrumented callable invoked on that thread while the collector is
//! active records a frame, which yields per-function call counts, own time
//! and cumulative time:
//!
//! - `ncalls`: total calls, shown as `total/primitive` under recursion
//! - `tottime`: time spent in the function minus time in recorded callees
//! - `cumtime`: time from entry to exit, counted once per outermost activation
//!
//! Collectors nest; frames are recorded by the innermost one.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

thread_local! {
    static COLLECTORS: RefCell<Vec<ActiveCollector>> = const { RefCell::new(Vec::new()) };
}

/// Statistics for a single function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStats {
    /// Every recorded call, recursive ones included
    pub calls: u64,
    /// Calls that were not nested inside another call of the same function
    pub primitive_calls: u64,
    /// Time spent in the function itself
    pub own_time: Duration,
    /// Time from entry to exit of primitive calls
    pub cumulative_time: Duration,
}

#[derive(Debug)]
struct Frame {
    name: String,
    started: Instant,
    child_time: Duration,
    primitive: bool,
}

#[derive(Debug, Default)]
struct ActiveCollector {
    stats: BTreeMap<String, CallStats>,
    frames: Vec<Frame>,
}

impl ActiveCollector {
    fn push(&mut self, name: &str) {
        let primitive = !self.frames.iter().any(|frame| frame.name == name);
        self.frames.push(Frame {
            name: name.to_string(),
            started: Instant::now(),
            child_time: Duration::ZERO,
            primitive,
        });
    }

    fn pop(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        let elapsed = frame.started.elapsed();

        let entry = self.stats.entry(frame.name).or_default();
        entry.calls += 1;
        entry.own_time += elapsed.saturating_sub(frame.child_time);
        if frame.primitive {
            entry.primitive_calls += 1;
            entry.cumulative_time += elapsed;
        }

        if let Some(parent) = self.frames.last_mut() {
            parent.child_time += elapsed;
        }
    }
}

/// Records one call into the innermost collector until dropped
#[derive(Debug)]
pub struct FrameGuard {
    collector: usize,
    // Frames belong to the thread that opened them
    _not_send: PhantomData<*const ()>,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        COLLECTORS.with(|collectors| {
            if let Some(collector) = collectors.borrow_mut().get_mut(self.collector) {
                collector.pop();
            }
        });
    }
}

/// Open a frame for `name` if a collector is active on this thread
pub fn enter(name: &str) -> Option<FrameGuard> {
    COLLECTORS.with(|collectors| {
        let mut collectors = collectors.borrow_mut();
        let index = collectors.len().checked_sub(1)?;
        collectors[index].push(name);
        Some(FrameGuard {
            collector: index,
            _not_send: PhantomData,
        })
    })
}

/// Whether a collector is active on this thread
pub fn is_collecting() -> bool {
    COLLECTORS.with(|collectors| !collectors.borrow().is_empty())
}

/// Pops the collector pushed by [`collect`], also when unwinding
struct CollectorGuard {
    armed: bool,
}

impl CollectorGuard {
    fn finish(mut self) -> ActiveCollector {
        self.armed = false;
        COLLECTORS
            .with(|collectors| collectors.borrow_mut().pop())
            .unwrap_or_default()
    }
}

impl Drop for CollectorGuard {
    fn drop(&mut self) {
        if self.armed {
            COLLECTORS.with(|collectors| {
                collectors.borrow_mut().pop();
            });
        }
    }
}

/// Run `f` as the root call `name` with a collector active
///
/// # Example
/// ```
/// use blocktimer::call_stats;
///
/// let (value, report) = call_stats::collect("compute", || 6 * 7);
/// assert_eq!(value, 42);
/// assert_eq!(report.total_calls(), 1);
/// ```
pub fn collect<T>(name: &str, f: impl FnOnce() -> T) -> (T, CallStatsReport) {
    let started = Instant::now();
    COLLECTORS.with(|collectors| collectors.borrow_mut().push(ActiveCollector::default()));
    let guard = CollectorGuard { armed: true };

    let output = {
        let _frame = enter(name);
        f()
    };

    let collector = guard.finish();
    let report = CallStatsReport {
        stats: collector.stats,
        total_time: started.elapsed(),
    };
    (output, report)
}

/// Statistics gathered by one [`collect`] run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStatsReport {
    stats: BTreeMap<String, CallStats>,
    total_time: Duration,
}

impl CallStatsReport {
    pub fn get(&self, name: &str) -> Option<&CallStats> {
        self.stats.get(name)
    }

    /// Functions in standard name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CallStats)> {
        self.stats.iter().map(|(name, stats)| (name.as_str(), stats))
    }

    pub fn total_calls(&self) -> u64 {
        self.stats.values().map(|stats| stats.calls).sum()
    }

    pub fn primitive_calls(&self) -> u64 {
        self.stats.values().map(|stats| stats.primitive_calls).sum()
    }

    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    /// Textual report
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CallStatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_calls = self.total_calls();
        let primitive_calls = self.primitive_calls();

        write!(f, "         {} function calls", total_calls)?;
        if primitive_calls != total_calls {
            write!(f, " ({} primitive calls)", primitive_calls)?;
        }
        writeln!(f, " in {:.3} seconds", self.total_time.as_secs_f64())?;
        writeln!(f)?;
        writeln!(f, "   Ordered by: standard name")?;
        writeln!(f)?;
        writeln!(
            f,
            "   ncalls  tottime  percall  cumtime  percall function"
        )?;

        for (name, stats) in &self.stats {
            let ncalls = if stats.calls == stats.primitive_calls {
                stats.calls.to_string()
            } else {
                format!("{}/{}", stats.calls, stats.primitive_calls)
            };
            let own = stats.own_time.as_secs_f64();
            let cumulative = stats.cumulative_time.as_secs_f64();
            let own_per_call = if stats.calls > 0 {
                own / stats.calls as f64
            } else {
                0.0
            };
            let cumulative_per_call = if stats.primitive_calls > 0 {
                cumulative / stats.primitive_calls as f64
            } else {
                0.0
            };

            writeln!(
                f,
                "{:>9} {:>8.3} {:>8.3} {:>8.3} {:>8.3} {}",
                ncalls, own, own_per_call, cumulative, cumulative_per_call, name
            )?;
        }
        writeln!(f)
    }
}
