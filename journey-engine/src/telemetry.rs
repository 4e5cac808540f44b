//! Tracing subscriber setup
//!
//! Hosts call [`init_tracing`] once at startup. `RUST_LOG` wins over the
//! configured filter when set.

use journey_core::{ConfigError, JourneyResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive when neither `RUST_LOG` nor `JOURNEY_LOG_FILTER` is set.
pub const DEFAULT_LOG_FILTER: &str = "journey_engine=debug,info";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Some(LogFormat::Compact),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive string.
    pub filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read `JOURNEY_LOG_FORMAT` and `JOURNEY_LOG_FILTER`. Unknown formats
    /// fall back to compact.
    pub fn from_env() -> Self {
        let format = std::env::var("JOURNEY_LOG_FORMAT")
            .ok()
            .and_then(|v| LogFormat::parse(&v))
            .unwrap_or_default();
        let filter = std::env::var("JOURNEY_LOG_FILTER")
            .ok()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        Self { format, filter }
    }
}

/// Install the global tracing subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed.
pub fn init_tracing(config: &TelemetryConfig) -> JourneyResult<bool> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
            field: "filter".to_string(),
            value: config.filter.clone(),
            reason: e.to_string(),
        })?,
    };

    let (json, compact) = match config.format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Compact => (None, Some(tracing_subscriber::fmt::layer().compact())),
    };

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(json)
        .with(compact)
        .try_init()
    {
        Ok(()) => {
            tracing::info!(format = ?config.format, filter = %config.filter, "tracing initialized");
            Ok(true)
        }
        Err(e) => {
            tracing::debug!(error = %e, "tracing subscriber already installed");
            Ok(false)
        }
    }
}
