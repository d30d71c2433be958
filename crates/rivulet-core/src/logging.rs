#![forbid(unsafe_code)]

//! Logging configuration.
//!
//! The engine itself only emits `tracing` events:
//!
//! - `trace`: observer attach/detach, emission fan-out, task queue drains.
//! - `debug`: state transitions, completion policies, cancellation, links.
//!
//! Hosts that do not install their own subscriber can use [`LogConfig`],
//! which reads:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `RIVULET_LOG` | `tracing-subscriber` env-filter directive | `warn` |
//! | `RIVULET_LOG_FORMAT` | `pretty`, `compact` or `json` | `compact` |
//!
//! Installing the subscriber needs the `subscriber` feature; JSON output
//! needs `tracing-json`.

/// Env var holding the filter directive.
pub const LOG_ENV: &str = "RIVULET_LOG";
/// Env var selecting the output format.
pub const LOG_FORMAT_ENV: &str = "RIVULET_LOG_FORMAT";

const DEFAULT_FILTER: &str = "warn";

/// Output format of the fmt subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line human readable output.
    Pretty,
    /// Single-line human readable output.
    #[default]
    Compact,
    /// Newline-delimited JSON (falls back to compact without `tracing-json`).
    Json,
}

impl LogFormat {
    /// Parse a format name, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" | "text" => Some(Self::Compact),
            "json" | "jsonl" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Failure to install the global subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to install tracing subscriber: {0}")]
pub struct LogInitError(String);

/// Subscriber configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Env-filter directive, e.g. `rivulet_runtime=debug`.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    /// Read the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Read the configuration through a custom environment lookup.
    ///
    /// Unknown formats and empty filters fall back to the defaults.
    #[must_use]
    pub fn from_env_with<F>(get_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(filter) = get_env(LOG_ENV).filter(|value| !value.trim().is_empty()) {
            config.filter = filter.trim().to_string();
        }
        if let Some(format) = get_env(LOG_FORMAT_ENV).as_deref().and_then(LogFormat::parse) {
            config.format = format;
        }
        config
    }

    /// Set the filter directive.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Install a global fmt subscriber for this configuration.
    ///
    /// # Errors
    ///
    /// Fails if the filter directive does not parse or a global subscriber is
    /// already installed.
    #[cfg(feature = "subscriber")]
    pub fn init(&self) -> Result<(), LogInitError> {
        use tracing_subscriber::EnvFilter;

        let filter =
            EnvFilter::try_new(&self.filter).map_err(|err| LogInitError(err.to_string()))?;
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        let installed = match self.format {
            LogFormat::Pretty => builder.pretty().try_init(),
            #[cfg(feature = "tracing-json")]
            LogFormat::Json => builder.json().try_init(),
            _ => builder.compact().try_init(),
        };
        installed.map_err(|err| LogInitError(err.to_string()))
    }
}
