//! Error taxonomy for timers, configuration and instrumentation options
//!
//! Usage errors (stopping an unstarted timer, unknown option keys) are always
//! surfaced to the caller. Errors raised by the measured workload are never
//! wrapped in this type: they are logged and handed back unchanged.

use thiserror::Error;

/// Errors produced by this crate
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Profiler({name}) was stopped before being started")]
    StoppedBeforeStarted { name: String },

    #[error("Profiler({name}) has not been started")]
    NotStarted { name: String },

    #[error("Profiler({name}) was already stopped")]
    AlreadyStopped { name: String },

    #[error("Profiler name must not be empty")]
    EmptyName,

    #[error("Unsupported keyword arguments: {}", .keys.join(","))]
    UnsupportedOptions { keys: Vec<String> },

    #[error("Invalid value {value:?} for option `{key}`")]
    InvalidOptionValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to install log subscriber: {0}")]
    SubscriberInit(String),
}

impl ProfilerError {
    /// True for errors caused by misuse of the API rather than by the environment
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::StoppedBeforeStarted { .. }
                | Self::NotStarted { .. }
                | Self::AlreadyStopped { .. }
                | Self::EmptyName
                | Self::UnsupportedOptions { .. }
                | Self::InvalidOptionValue { .. }
        )
    }
}

/// Result type for profiler operations
pub type Result<T> = std::result::Result<T, ProfilerError>;
