//! Profiler configuration
//!
//! A [`ProfilerConfig`] is passed explicitly to a
//! [`ProfilerContext`](crate::context::ProfilerContext); there is no
//! process-wide mutable state. It can be built in code or loaded from TOML:
//!
//! ```toml
//! logger_name = "myapp.profiling"
//! profile_sql_queries = true
//! connection_names = ["default", "replica"]
//! ```

use crate::error::{ProfilerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Root logging channel used when no override is configured
pub const DEFAULT_LOGGER_NAME: &str = "blocktimer";

/// Connection correlated when the caller names none
pub const DEFAULT_CONNECTION: &str = "default";

/// Process-wide profiling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerConfig {
    /// Root channel name; timers log to `<logger_name>` or `<logger_name>.<name>`
    pub logger_name: String,
    /// Log every query of a window whenever at least one was executed
    pub profile_sql_queries: bool,
    /// Connections correlated when a timer does not name its own
    pub connection_names: Vec<String>,
    /// Prefix plain function names with their module path
    pub qualify_function_names: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            logger_name: DEFAULT_LOGGER_NAME.to_string(),
            profile_sql_queries: false,
            connection_names: vec![DEFAULT_CONNECTION.to_string()],
            qualify_function_names: false,
        }
    }
}

impl ProfilerConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn with_logger_name(mut self, logger_name: impl Into<String>) -> Self {
        self.logger_name = logger_name.into();
        self
    }

    pub fn with_profile_sql_queries(mut self, enabled: bool) -> Self {
        self.profile_sql_queries = enabled;
        self
    }

    pub fn with_connection_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.connection_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_qualified_function_names(mut self, enabled: bool) -> Self {
        self.qualify_function_names = enabled;
        self
    }

    /// Check the invariants the rest of the crate relies on
    pub fn validate(&self) -> Result<()> {
        if self.logger_name.trim().is_empty() {
            return Err(ProfilerError::InvalidConfig(
                "logger_name must not be empty".to_string(),
            ));
        }
        if self.logger_name.contains(char::is_whitespace) {
            return Err(ProfilerError::InvalidConfig(format!(
                "logger_name {:?} must not contain whitespace",
                self.logger_name
            )));
        }
        validate_connection_names(&self.connection_names)
    }

    /// Logging channel for a timer name
    ///
    /// Names containing a space are human-readable labels and stay on the
    /// root channel; identifiers get their own sub-channel.
    pub fn channel_for(&self, name: &str) -> String {
        if name.contains(' ') {
            self.logger_name.clone()
        } else {
            format!("{}.{}", self.logger_name, name)
        }
    }
}

/// Reject empty lists, blank names and duplicates
pub(crate) fn validate_connection_names(names: &[String]) -> Result<()> {
    if names.is_empty() {
        return Err(ProfilerError::InvalidConfig(
            "connection_names must name at least one connection".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(ProfilerError::InvalidConfig(
                "connection names must not be empty".to_string(),
            ));
        }
        if !seen.insert(name.as_str()) {
            return Err(ProfilerError::InvalidConfig(format!(
                "connection {:?} listed more than once",
                name
            )));
        }
    }
    Ok(())
}
