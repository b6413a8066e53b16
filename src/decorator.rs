//! Instrumented callables
//!
//! [`Profile`] turns a function or method into an [`Instrumented`] callable
//! that times every invocation with a [`Timer`]. Whether the callable is a
//! plain function or a method is decided when it is attached, so the
//! instrumentation name is known up front:
//!
//! - functions report as `name` (or `module::name` with
//!   `qualify_function_names`)
//! - methods report as `Type.name`
//!
//! The wrapper keeps the callable's [`CallableMeta`] and exposes it through
//! [`Introspect`], so stacking wrappers does not lose the original identity.
//!
//! # Example
//! ```
//! use blocktimer::{callable_meta, ProfilerContext};
//!
//! fn double(x: u32) -> u32 {
//!     x * 2
//! }
//!
//! let context = ProfilerContext::default();
//! let double = context.profile().function(callable_meta!(double), double);
//! assert_eq!(double.call(21), 42);
//! assert_eq!(double.instrumentation_name(), "double");
//! ```

use crate::call_stats::{self, CallStatsReport};
use crate::context::ProfilerContext;
use crate::correlator::LOG_TARGET;
use crate::error::{ProfilerError, Result};
use crate::timer::{Timer, TimerOptions};
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Name used when a callable has no name of its own
pub const FALLBACK_NAME: &str = "Profiler";

/// Build a [`CallableMeta`] from an identifier, capturing the current module
///
/// `callable_meta!(load)` names the callable `load`;
/// `callable_meta!(load, "Load rows from disk")` also attaches documentation.
#[macro_export]
macro_rules! callable_meta {
    ($name:ident) => {
        $crate::decorator::CallableMeta::new(stringify!($name)).with_module(module_path!())
    };
    ($name:ident, $doc:expr) => {
        $crate::callable_meta!($name).with_doc($doc)
    };
}

/// Externally visible identity of a callable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallableMeta {
    name: String,
    module: Option<String>,
    doc: Option<String>,
    attributes: BTreeMap<String, String>,
}

impl CallableMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// `module::name` when the module is known, otherwise `name`
    pub fn qualified_name(&self) -> String {
        match &self.module {
            Some(module) => format!("{}::{}", module, self.name),
            None => self.name.clone(),
        }
    }
}

/// How a callable is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Function,
    Method { type_name: String },
}

/// Identity of a callable, forwarded through wrappers
pub trait Introspect {
    fn meta(&self) -> &CallableMeta;

    fn binding(&self) -> Binding {
        Binding::Function
    }
}

/// Something that can be invoked with `Args`
///
/// Multiple arguments are passed as a tuple, none as `()`.
pub trait Callable<Args> {
    type Output;

    fn invoke(&self, args: Args) -> Self::Output;
}

/// Adapts a plain function or closure
#[derive(Debug, Clone, Copy)]
pub struct FnCallable<F>(pub F);

impl<F, Args, R> Callable<Args> for FnCallable<F>
where
    F: Fn(Args) -> R,
{
    type Output = R;

    fn invoke(&self, args: Args) -> R {
        (self.0)(args)
    }
}

/// Adapts a method of `T`; invoked with `(&receiver, args)`
pub struct MethodCallable<T: ?Sized, F> {
    f: F,
    _receiver: PhantomData<fn(&T)>,
}

impl<T: ?Sized, F> MethodCallable<T, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _receiver: PhantomData,
        }
    }
}

impl<T: ?Sized, F: Clone> Clone for MethodCallable<T, F> {
    fn clone(&self) -> Self {
        Self::new(self.f.clone())
    }
}

impl<T: ?Sized, F> fmt::Debug for MethodCallable<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCallable")
            .field("receiver", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

impl<'a, T: ?Sized + 'a, F, Args, R> Callable<(&'a T, Args)> for MethodCallable<T, F>
where
    F: Fn(&'a T, Args) -> R,
{
    type Output = R;

    fn invoke(&self, (receiver, args): (&'a T, Args)) -> R {
        (self.f)(receiver, args)
    }
}

/// Where call statistics reports go
#[derive(Clone)]
pub enum StatsSink {
    Stdout,
    Stderr,
    /// File opened in append mode, created if missing, on every report
    Path(PathBuf),
    Writer(Arc<Mutex<dyn Write + Send>>),
}

impl StatsSink {
    /// Sink writing into a shared writer, e.g. `Arc<Mutex<Vec<u8>>>`
    pub fn shared<W: Write + Send + 'static>(writer: Arc<Mutex<W>>) -> Self {
        Self::Writer(writer)
    }

    pub fn writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self::Writer(Arc::new(Mutex::new(writer)))
    }

    /// Sink appending to a file; nothing touches the disk until a report is written
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    fn write_report(&self, report: &str) -> io::Result<()> {
        match self {
            Self::Stdout => io::stdout().lock().write_all(report.as_bytes()),
            Self::Stderr => io::stderr().lock().write_all(report.as_bytes()),
            Self::Path(path) => {
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                file.write_all(report.as_bytes())
            }
            Self::Writer(writer) => {
                let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                writer.write_all(report.as_bytes())?;
                writer.flush()
            }
        }
    }
}

impl fmt::Debug for StatsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("Stdout"),
            Self::Stderr => f.write_str("Stderr"),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Options recognised by [`Profile`]
#[derive(Debug, Clone, Default)]
pub struct ProfileOptions {
    /// Log every query executed during each call
    pub profile_sql: bool,
    /// Collect call statistics around each call
    pub collect_stats: bool,
    /// Destination of the statistics report; `None` logs it
    pub stats_sink: Option<StatsSink>,
    /// Connections to correlate instead of the configured defaults
    pub connection_names: Option<Vec<String>>,
}

impl ProfileOptions {
    /// Option keys accepted by [`from_pairs`](Self::from_pairs)
    pub const KEYS: [&'static str; 4] =
        ["profile_sql", "collect_stats", "stats_sink", "connection_names"];

    pub fn profile_sql(mut self, enabled: bool) -> Self {
        self.profile_sql = enabled;
        self
    }

    pub fn collect_stats(mut self, enabled: bool) -> Self {
        self.collect_stats = enabled;
        self
    }

    pub fn stats_sink(mut self, sink: StatsSink) -> Self {
        self.stats_sink = Some(sink);
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

    /// Build options from key/value pairs
    ///
    /// Every unknown key is reported in a single
    /// [`ProfilerError::UnsupportedOptions`]. `stats_sink` accepts `log`,
    /// `stdout`, `stderr` or a file path; `connection_names` a comma list.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let pairs: Vec<(K, V)> = pairs.into_iter().collect();
        let unknown: Vec<String> = pairs
            .iter()
            .map(|(key, _)| key.as_ref())
            .filter(|key| !Self::KEYS.iter().any(|known| known == key))
            .map(str::to_string)
            .collect();
        if !unknown.is_empty() {
            return Err(ProfilerError::UnsupportedOptions { keys: unknown });
        }

        let mut options = Self::default();
        for (key, value) in &pairs {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "profile_sql" => options.profile_sql = parse_bool(key, value)?,
                "collect_stats" => options.collect_stats = parse_bool(key, value)?,
                "stats_sink" => options.stats_sink = parse_sink(value)?,
                "connection_names" => {
                    let names: Vec<String> = value
                        .split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect();
                    if names.is_empty() {
                        return Err(invalid_value(key, value));
                    }
                    options.connection_names = Some(names);
                }
                _ => unreachable!("unknown keys are rejected above"),
            }
        }
        Ok(options)
    }

    /// Parse a `key=value,key=value` specification
    ///
    /// `connection_names` lists use `;` as separator here, e.g.
    /// `profile_sql=true,connection_names=default;replica`.
    pub fn from_spec(spec: &str) -> Result<Self> {
        let mut pairs = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                return Err(invalid_value(part, ""));
            };
            let key = key.trim();
            let value = if key == "connection_names" {
                value.replace(';', ",")
            } else {
                value.to_string()
            };
            pairs.push((key.to_string(), value));
        }
        Self::from_pairs(pairs)
    }

    fn timer_options(&self) -> TimerOptions {
        TimerOptions {
            auto_start: false,
            profile_sql: self.profile_sql,
            connection_names: self.connection_names.clone(),
        }
    }
}

fn invalid_value(key: &str, value: &str) -> ProfilerError {
    ProfilerError::InvalidOptionValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid_value(key, value)),
    }
}

fn parse_sink(value: &str) -> Result<Option<StatsSink>> {
    match value {
        "" => Err(invalid_value("stats_sink", value)),
        "log" => Ok(None),
        "stdout" => Ok(Some(StatsSink::Stdout)),
        "stderr" => Ok(Some(StatsSink::Stderr)),
        path => Ok(Some(StatsSink::path(path))),
    }
}

/// Factory attaching instrumentation to callables
#[derive(Debug, Clone)]
pub struct Profile {
    context: ProfilerContext,
    options: ProfileOptions,
}

impl Profile {
    pub fn new(context: ProfilerContext, options: ProfileOptions) -> Self {
        Self { context, options }
    }

    /// Factory configured from key/value pairs; fails before anything is wrapped
    pub fn from_pairs<I, K, V>(context: ProfilerContext, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Ok(Self::new(context, ProfileOptions::from_pairs(pairs)?))
    }

    pub fn options(&self) -> &ProfileOptions {
        &self.options
    }

    /// Instrument a plain function
    pub fn function<F>(&self, meta: CallableMeta, f: F) -> Instrumented<FnCallable<F>> {
        self.attach(FnCallable(f), meta, Binding::Function)
    }

    /// Instrument a method of `T`; reported as `Type.method`
    pub fn method<T: ?Sized, F>(
        &self,
        meta: CallableMeta,
        f: F,
    ) -> Instrumented<MethodCallable<T, F>> {
        let binding = Binding::Method {
            type_name: short_type_name::<T>().to_string(),
        };
        self.attach(MethodCallable::new(f), meta, binding)
    }

    /// Layer this profile over an already instrumented callable
    pub fn wrap<C: Introspect>(&self, inner: C) -> Instrumented<C> {
        let meta = inner.meta().clone();
        let binding = inner.binding();
        self.attach(inner, meta, binding)
    }

    fn attach<C>(&self, inner: C, meta: CallableMeta, binding: Binding) -> Instrumented<C> {
        let name = instrumentation_name(&meta, &binding, self.context.config().qualify_function_names);
        Instrumented {
            inner,
            meta,
            binding,
            name,
            options: self.options.clone(),
            context: self.context.clone(),
        }
    }
}

fn instrumentation_name(meta: &CallableMeta, binding: &Binding, qualify: bool) -> String {
    let base = if meta.name().trim().is_empty() {
        FALLBACK_NAME
    } else {
        meta.name()
    };
    match binding {
        Binding::Method { type_name } => format!("{}.{}", type_name, base),
        Binding::Function => match meta.module() {
            Some(module) if qualify => format!("{}::{}", module, base),
            _ => base.to_string(),
        },
    }
}

/// Last path segment of a type name, without generic arguments
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

/// A callable timed on every invocation
#[derive(Debug, Clone)]
pub struct Instrumented<C> {
    inner: C,
    meta: CallableMeta,
    binding: Binding,
    name: String,
    options: ProfileOptions,
    context: ProfilerContext,
}

impl<C> Instrumented<C> {
    /// Name used for log messages and the logging sub-channel
    pub fn instrumentation_name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ProfileOptions {
        &self.options
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Invoke the callable; a panic is logged, the timer stopped, then resumed
    pub fn call<A>(&self, args: A) -> C::Output
    where
        C: Callable<A>,
    {
        let mut timer = self.timer();
        let mut report = None;
        let output = timer.run(|| self.invoke_inner(args, &mut report));
        self.publish(report);
        output
    }

    /// Invoke a fallible callable; an `Err` is logged and returned unchanged
    pub fn try_call<A, T, E>(&self, args: A) -> std::result::Result<T, E>
    where
        C: Callable<A, Output = std::result::Result<T, E>>,
        E: Display,
    {
        let mut timer = self.timer();
        let mut report = None;
        let output = timer.try_run(|| self.invoke_inner(args, &mut report));
        self.publish(report);
        output
    }

    fn timer(&self) -> Timer {
        self.context
            .build_timer(self.name.clone(), &self.options.timer_options())
    }

    fn invoke_inner<A>(&self, args: A, report: &mut Option<CallStatsReport>) -> C::Output
    where
        C: Callable<A>,
    {
        if self.options.collect_stats {
            let (output, stats) = call_stats::collect(&self.name, || self.inner.invoke(args));
            *report = Some(stats);
            output
        } else {
            let _frame = call_stats::enter(&self.name);
            self.inner.invoke(args)
        }
    }

    fn publish(&self, report: Option<CallStatsReport>) {
        let Some(report) = report else {
            return;
        };
        let text = report.render();
        match &self.options.stats_sink {
            Some(sink) => {
                if let Err(e) = sink.write_report(&text) {
                    tracing::warn!(
                        target: LOG_TARGET,
                        timer = self.name.as_str(),
                        "Failed to write call statistics for {}: {}",
                        self.name,
                        e
                    );
                }
            }
            None => {
                let channel = format!("{}.{}", self.context.config().logger_name, self.name);
                tracing::info!(target: LOG_TARGET, channel = channel.as_str(), "{}", text);
            }
        }
    }
}

impl<T: ?Sized, F> Instrumented<MethodCallable<T, F>> {
    /// Invoke the method on `receiver`
    pub fn call_method<'a, A, R>(&self, receiver: &'a T, args: A) -> R
    where
        F: Fn(&'a T, A) -> R,
    {
        self.call((receiver, args))
    }

    /// Invoke a fallible method on `receiver`
    pub fn try_call_method<'a, A, V, E>(
        &self,
        receiver: &'a T,
        args: A,
    ) -> std::result::Result<V, E>
    where
        F: Fn(&'a T, A) -> std::result::Result<V, E>,
        E: Display,
    {
        self.try_call((receiver, args))
    }
}

impl<C> Introspect for Instrumented<C> {
    fn meta(&self) -> &CallableMeta {
        &self.meta
    }

    fn binding(&self) -> Binding {
        self.binding.clone()
    }
}

impl<C, A> Callable<A> for Instrumented<C>
where
    C: Callable<A>,
{
    type Output = C::Output;

    fn invoke(&self, args: A) -> C::Output {
        self.call(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Foo;

    struct Generic<T>(T);

    fn baz(x: i32) -> i32 {
        x + 1
    }

    #[test]
    fn test_function_name_is_bare_identifier() {
        let profile = ProfilerContext::default().profile();
        let wrapped = profile.function(callable_meta!(baz), baz);
        assert_eq!(wrapped.instrumentation_name(), "baz");
        assert_eq!(wrapped.call(1), 2);
    }

    #[test]
    fn test_function_name_can_be_qualified() {
        let config = crate::config::ProfilerConfig::default().with_qualified_function_names(true);
        let profile = ProfilerContext::new(config).profile();
        let wrapped = profile.function(callable_meta!(baz), baz);
        assert_eq!(
            wrapped.instrumentation_name(),
            format!("{}::baz", module_path!())
        );
    }

    #[test]
    fn test_method_name_uses_type_name() {
        let profile = ProfilerContext::default().profile();
        let wrapped = profile.method::<Foo, _>(CallableMeta::new("bar"), |_: &Foo, x: u8| x);
        assert_eq!(wrapped.instrumentation_name(), "Foo.bar");
        assert_eq!(wrapped.call_method(&Foo, 3), 3);
    }

    #[test]
    fn test_empty_name_falls_back() {
        let profile = ProfilerContext::default().profile();
        let wrapped = profile.function(CallableMeta::new(""), |()| ());
        assert_eq!(wrapped.instrumentation_name(), FALLBACK_NAME);
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name::<Foo>(), "Foo");
        assert_eq!(short_type_name::<Generic<String>>(), "Generic");
        assert_eq!(short_type_name::<u64>(), "u64");
    }

    #[test]
    fn test_meta_is_preserved() {
        let meta = callable_meta!(baz, "Adds one").with_attribute("owner", "billing");
        let wrapped = ProfilerContext::default().profile().function(meta.clone(), baz);

        assert_eq!(wrapped.meta(), &meta);
        assert_eq!(wrapped.meta().doc(), Some("Adds one"));
        assert_eq!(wrapped.meta().attribute("owner"), Some("billing"));
        assert_eq!(wrapped.meta().module(), Some(module_path!()));
    }

    #[test]
    fn test_wrap_forwards_identity() {
        let context = ProfilerContext::default();
        let inner = context
            .profile()
            .method::<Foo, _>(CallableMeta::new("bar").with_doc("docs"), |_: &Foo, ()| 5);
        let outer = context.profile().wrap(inner);

        assert_eq!(outer.instrumentation_name(), "Foo.bar");
        assert_eq!(outer.meta().doc(), Some("docs"));
        assert_eq!(outer.call((&Foo, ())), 5);
    }

    #[test]
    fn test_options_from_pairs() {
        let options = ProfileOptions::from_pairs([
            ("profile_sql", "true"),
            ("collect_stats", "no"),
            ("stats_sink", "stderr"),
            ("connection_names", "default, replica"),
        ])
        .unwrap();

        assert!(options.profile_sql);
        assert!(!options.collect_stats);
        assert!(matches!(options.stats_sink, Some(StatsSink::Stderr)));
        assert_eq!(
            options.connection_names,
            Some(vec!["default".to_string(), "replica".to_string()])
        );
    }

    #[test]
    fn test_options_reject_every_unknown_key() {
        let err = ProfileOptions::from_pairs([
            ("nonsense", "true"),
            ("profile_sql", "true"),
            ("stats_buffer", "x"),
        ])
        .unwrap_err();

        match err {
            ProfilerError::UnsupportedOptions { keys } => {
                assert_eq!(keys, vec!["nonsense".to_string(), "stats_buffer".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_options_reject_bad_bool() {
        let err = ProfileOptions::from_pairs([("profile_sql", "maybe")]).unwrap_err();
        assert!(matches!(err, ProfilerError::InvalidOptionValue { .. }));
        assert!(err.is_usage_error());
    }

    #[test]
    fn test_options_from_spec() {
        let options =
            ProfileOptions::from_spec("profile_sql=1, connection_names=default;replica").unwrap();
        assert!(options.profile_sql);
        assert_eq!(options.connection_names.unwrap().len(), 2);

        assert!(ProfileOptions::from_spec("").is_ok());
        assert!(ProfileOptions::from_spec("profile_sql").is_err());
        assert!(matches!(
            ProfileOptions::from_spec("nonsense=1"),
            Err(ProfilerError::UnsupportedOptions { .. })
        ));
    }

    #[test]
    fn test_path_sink_is_parsed_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.txt");

        let options = ProfileOptions::from_pairs([("stats_sink", path.to_str().unwrap())]).unwrap();
        assert!(matches!(&options.stats_sink, Some(StatsSink::Path(p)) if p == &path));
        assert!(!path.exists());

        let err = ProfileOptions::from_pairs([
            ("stats_sink", path.to_str().unwrap()),
            ("profile_sql", "maybe"),
        ])
        .unwrap_err();
        assert!(matches!(err, ProfilerError::InvalidOptionValue { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_log_sink_means_no_sink() {
        let options = ProfileOptions::from_pairs([("stats_sink", "log")]).unwrap();
        assert!(options.stats_sink.is_none());
    }

    #[test]
    fn test_stats_written_to_shared_sink() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let options = ProfileOptions::default()
            .collect_stats(true)
            .stats_sink(StatsSink::shared(buffer.clone()));
        let wrapped = ProfilerContext::default()
            .profile_with(options)
            .function(callable_meta!(baz), baz);

        assert_eq!(wrapped.call(41), 42);
        let written = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(written.contains("1 function calls in"));
        assert!(written.contains(" baz\n"));
    }
}
