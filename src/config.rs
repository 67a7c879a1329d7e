//! Configuration management for the Raven client
//!
//! [`ClientOptions`] carries everything that shapes a capture. [`Config`]
//! adds the DSN and can be loaded from the environment with fail-soft
//! behavior: a missing DSN leaves the config inactive instead of failing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;

use crate::error::RavenError;
use crate::hooks::{ErrorOnCapture, LogScrubber};
use crate::utils::parse_flag;

pub const DEFAULT_LOGGER: &str = "root";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Options applied to every capture
#[derive(Clone)]
pub struct ClientOptions {
    /// Gzip request bodies
    pub compression: bool,

    /// Tags added to every event; per-call tags override them
    pub default_tags: HashMap<String, String>,

    /// Logger name attached to every event
    pub logger: String,

    /// Upper bound on how long a capture waits for the collector
    pub timeout: Duration,

    /// Redaction applied to the serialized payload
    pub log_scrubber: Option<Arc<dyn LogScrubber>>,

    /// Receives capture failures instead of the diagnostic log
    pub error_on_capture: Option<ErrorOnCapture>,

    pub release: Option<String>,

    pub environment: Option<String>,

    /// Defaults to the host name
    pub server_name: Option<String>,

    /// When false, captures return an empty id without sending anything
    pub enabled: bool,

    /// Log every outgoing payload at debug level
    pub debug: bool,
}

impl ClientOptions {
    pub fn with_default_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_tags.insert(key.into(), value.into());
        self
    }

    pub fn with_scrubber<S>(mut self, scrubber: S) -> Self
    where
        S: LogScrubber + 'static,
    {
        self.log_scrubber = Some(Arc::new(scrubber));
        self
    }

    pub fn with_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&crate::error::CaptureError) + Send + Sync + 'static,
    {
        self.error_on_capture = Some(ErrorOnCapture::new(hook));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            compression: false,
            default_tags: HashMap::new(),
            logger: DEFAULT_LOGGER.to_string(),
            timeout: DEFAULT_TIMEOUT,
            log_scrubber: None,
            error_on_capture: None,
            release: None,
            environment: None,
            server_name: System::host_name(),
            enabled: true,
            debug: false,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("compression", &self.compression)
            .field("default_tags", &self.default_tags)
            .field("logger", &self.logger)
            .field("timeout", &self.timeout)
            .field("log_scrubber", &self.log_scrubber.is_some())
            .field("error_on_capture", &self.error_on_capture.is_some())
            .field("release", &self.release)
            .field("environment", &self.environment)
            .field("server_name", &self.server_name)
            .field("enabled", &self.enabled)
            .field("debug", &self.debug)
            .finish()
    }
}

/// DSN plus options
///
/// Loaded from environment variables:
/// - `RAVEN_DSN`: collector DSN (required)
/// - `RAVEN_TIMEOUT_MS`: capture timeout in milliseconds
/// - `RAVEN_LOGGER`: logger name
/// - `RAVEN_COMPRESSION`: gzip request bodies ("true"/"1"/"yes")
/// - `RAVEN_RELEASE`, `RAVEN_ENVIRONMENT`: attached to every event
/// - `RAVEN_DEBUG`: log outgoing payloads
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether a DSN is present
    pub active: bool,

    pub dsn: Option<String>,

    pub options: ClientOptions,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Never fails: unparsable values fall back to defaults with a warning,
    /// and a missing DSN yields an inactive config.
    pub fn from_env() -> Self {
        let dsn = std::env::var("RAVEN_DSN").ok().filter(|s| !s.trim().is_empty());
        let mut options = ClientOptions::default();

        if let Ok(raw) = std::env::var("RAVEN_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => options.timeout = Duration::from_millis(ms),
                Err(_) => tracing::warn!(value = %raw, "Ignoring unparsable RAVEN_TIMEOUT_MS"),
            }
        }
        if let Ok(logger) = std::env::var("RAVEN_LOGGER") {
            options.logger = logger;
        }
        options.compression = env_flag("RAVEN_COMPRESSION");
        options.release = std::env::var("RAVEN_RELEASE").ok();
        options.environment = std::env::var("RAVEN_ENVIRONMENT").ok();
        options.debug = env_flag("RAVEN_DEBUG");

        let active = dsn.is_some();
        if !active {
            tracing::warn!("Raven client disabled: RAVEN_DSN environment variable is missing");
        } else if options.debug {
            tracing::debug!(timeout = ?options.timeout, "Raven client configured from environment");
        }
        options.enabled = active;

        Self {
            active,
            dsn,
            options,
        }
    }

    /// Create configuration with explicit values (useful for testing)
    pub fn new(dsn: Option<String>) -> Self {
        let active = dsn.is_some();
        Self {
            active,
            dsn,
            options: ClientOptions {
                enabled: active,
                ..ClientOptions::default()
            },
        }
    }

    /// Get the DSN (returns error if missing)
    pub fn get_dsn(&self) -> Result<&str, RavenError> {
        self.dsn.as_deref().ok_or(RavenError::MissingConfig)
    }

    pub fn into_options(self) -> ClientOptions {
        self.options
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| parse_flag(&v)).unwrap_or(false)
}
