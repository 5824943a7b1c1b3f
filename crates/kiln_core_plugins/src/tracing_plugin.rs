//! Tracing and observability plugin.
//!
//! Provides [`TracingPlugin`] which installs the `tracing` subscriber.
//!
//! # Lifecycle
//!
//! - **entry function** describes the plugin under the `logging` config key
//!   and registers an `onPluginReady` hook.
//! - **`onPluginReady`** merges the `logging` section of the user config over
//!   the plugin's own settings and installs the subscriber. Deferring the
//!   install lets the project's configuration decide the level and format.
//!
//! # Configuration
//!
//! ```json
//! {
//!   "logging": {
//!     "level": "debug",
//!     "format": "json",
//!     "filter": "kiln_service=trace",
//!     "spanEvents": true
//!   }
//! }
//! ```

use std::str::FromStr;

use kiln_service::api::{Describe, PluginApi};
use kiln_service::error::BoxError;
use kiln_service::hook::{Handler, Hook};
use kiln_service::plugin::{ApplyOutput, Plugin, PluginConfig};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Config key the plugin reads its settings from.
pub const LOGGING_KEY: &str = "logging";

// ─────────────────────────────────────────────────────────────────────────────
// TracingFormat
// ─────────────────────────────────────────────────────────────────────────────

/// Tracing output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingFormat {
    /// Human-readable colored output (default).
    #[default]
    Pretty,
    /// Compact single-line output.
    Compact,
    /// JSON structured output for log aggregation.
    Json,
}

impl FromStr for TracingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TracingConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Effective tracing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// The maximum log level.
    pub level: Level,
    /// The output format.
    pub format: TracingFormat,
    /// Target-specific filter directives (`kiln_service=debug,...`).
    pub env_filter: Option<String>,
    /// Whether span enter/exit events are printed.
    pub span_events: bool,
}

/// The `logging` section of the user config. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LoggingSection {
    level: Option<String>,
    format: Option<TracingFormat>,
    filter: Option<String>,
    span_events: Option<bool>,
}

// ─────────────────────────────────────────────────────────────────────────────
// TracingPlugin
// ─────────────────────────────────────────────────────────────────────────────

/// Installs the `tracing` subscriber once every plugin has registered.
///
/// # Example
///
/// ```
/// use kiln_core_plugins::{TracingFormat, TracingPlugin};
/// use tracing::Level;
///
/// // Development: pretty output with debug level and span events.
/// let dev = TracingPlugin::default()
///     .with_level(Level::DEBUG)
///     .with_span_events(true);
///
/// // CI: JSON output for log aggregation.
/// let ci = TracingPlugin::default()
///     .with_format(TracingFormat::Json)
///     .with_env_filter("kiln_service=debug,kiln_core_plugins=info");
/// # let _ = (dev, ci);
/// ```
#[derive(Debug, Clone)]
pub struct TracingPlugin {
    level: Level,
    format: TracingFormat,
    env_filter: Option<String>,
    span_events: bool,
}

impl Default for TracingPlugin {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingFormat::Pretty,
            env_filter: None,
            span_events: false,
        }
    }
}

impl TracingPlugin {
    /// Creates a new `TracingPlugin` with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum log level.
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets a custom environment filter string.
    ///
    /// Format: `target=level,target=level,...`
    #[must_use]
    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Enables span enter/exit events in output.
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// Merges the `logging` config section over the plugin's own settings.
    ///
    /// Unknown levels and malformed sections leave the plugin's settings in
    /// place.
    #[must_use]
    pub fn resolve(&self, section: Option<&Value>) -> TracingConfig {
        let section: LoggingSection = section
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        TracingConfig {
            level: section
                .level
                .and_then(|level| Level::from_str(&level).ok())
                .unwrap_or(self.level),
            format: section.format.unwrap_or(self.format),
            env_filter: section.filter.or_else(|| self.env_filter.clone()),
            span_events: section.span_events.unwrap_or(self.span_events),
        }
    }
}

/// Installs a global subscriber for `config`.
///
/// Does nothing if a subscriber is already installed.
pub fn install_subscriber(config: &TracingConfig) {
    let env_filter = match &config.env_filter {
        Some(filter) => {
            EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(config.level.as_str()))
        }
        None => EnvFilter::new(config.level.as_str()),
    };

    let span_events = if config.span_events {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    // try_init().ok() ignores errors if already initialized
    match config.format {
        TracingFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_span_events(span_events),
                )
                .try_init()
                .ok();
        }
        TracingFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_span_events(span_events),
                )
                .try_init()
                .ok();
        }
        TracingFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_span_events(span_events),
                )
                .try_init()
                .ok();
        }
    }
}

impl Plugin for TracingPlugin {
    const ID: &'static str = "kiln:tracing";

    fn apply(&self, api: &PluginApi) -> Result<ApplyOutput, BoxError> {
        api.describe(
            Describe::new()
                .with_key(LOGGING_KEY)
                .with_config(PluginConfig::new().with_schema(json!({
                    "type": "object",
                    "properties": {
                        "level": { "type": "string" },
                        "format": { "enum": ["pretty", "compact", "json"] },
                        "filter": { "type": "string" },
                        "spanEvents": { "type": "boolean" },
                    },
                }))),
        )?;

        let plugin = self.clone();
        let reader = api.clone();
        api.register(Hook::new(
            "onPluginReady",
            Handler::sync(move |_| {
                let config = plugin.resolve(reader.user_config().get(LOGGING_KEY));
                install_subscriber(&config);
                tracing::info!(
                    level = %config.level,
                    format = ?config.format,
                    "tracing initialized"
                );
                Ok(Value::Null)
            }),
        ))?;

        Ok(ApplyOutput::default())
    }
}
