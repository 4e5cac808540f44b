//! Configuration types

use crate::{ConfigError, JourneyError, JourneyResult};
use std::time::Duration;

/// Default maximum upload size in megabytes.
pub const DEFAULT_FILE_UPLOAD_MAX_MB: u64 = 10;

/// Presigned upload URLs are valid for 15 minutes.
pub const DEFAULT_PRESIGN_TTL_SECS: u64 = 15 * 60;

/// Default deadline applied to each public engine operation.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

/// Default capacity of the notification dispatcher queue.
pub const DEFAULT_NOTIFICATION_QUEUE_CAPACITY: usize = 256;

/// Default recipient of state-change notifications.
pub const DEFAULT_NOTIFICATION_RECIPIENT: &str = "admin@localhost";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JourneyConfig {
    /// Maximum accepted upload size in megabytes
    pub file_upload_max_mb: u64,
    /// Validity of presigned upload/download URLs
    pub presign_ttl: Duration,
    /// Deadline for each public operation
    pub operation_timeout: Duration,
    /// Pending notifications beyond this are dropped
    pub notification_queue_capacity: usize,
    /// Address receiving state-change notifications
    pub notification_recipient: String,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        Self {
            file_upload_max_mb: DEFAULT_FILE_UPLOAD_MAX_MB,
            presign_ttl: Duration::from_secs(DEFAULT_PRESIGN_TTL_SECS),
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            notification_queue_capacity: DEFAULT_NOTIFICATION_QUEUE_CAPACITY,
            notification_recipient: DEFAULT_NOTIFICATION_RECIPIENT.to_string(),
        }
    }
}

impl JourneyConfig {
    /// Create JourneyConfig from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `JOURNEY_FILE_UPLOAD_MAX_MB`: Maximum upload size (default: 10)
    /// - `JOURNEY_PRESIGN_TTL_SECS`: Presigned URL validity (default: 900)
    /// - `JOURNEY_OPERATION_TIMEOUT_SECS`: Per-operation deadline (default: 30)
    /// - `JOURNEY_NOTIFICATION_QUEUE`: Notification queue capacity (default: 256)
    /// - `JOURNEY_NOTIFICATION_RECIPIENT`: Notification address (default: admin@localhost)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            file_upload_max_mb: std::env::var("JOURNEY_FILE_UPLOAD_MAX_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.file_upload_max_mb),
            presign_ttl: std::env::var("JOURNEY_PRESIGN_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.presign_ttl),
            operation_timeout: std::env::var("JOURNEY_OPERATION_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.operation_timeout),
            notification_queue_capacity: std::env::var("JOURNEY_NOTIFICATION_QUEUE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.notification_queue_capacity),
            notification_recipient: std::env::var("JOURNEY_NOTIFICATION_RECIPIENT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.notification_recipient),
        }
    }

    /// Maximum upload size in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.file_upload_max_mb.saturating_mul(1024 * 1024)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> JourneyResult<()> {
        if self.file_upload_max_mb == 0 {
            return Err(invalid(
                "file_upload_max_mb",
                self.file_upload_max_mb.to_string(),
                "file_upload_max_mb must be greater than 0",
            ));
        }

        if self.presign_ttl.is_zero() {
            return Err(invalid(
                "presign_ttl",
                format!("{:?}", self.presign_ttl),
                "presign_ttl must be positive",
            ));
        }

        if self.operation_timeout.is_zero() {
            return Err(invalid(
                "operation_timeout",
                format!("{:?}", self.operation_timeout),
                "operation_timeout must be positive",
            ));
        }

        if self.notification_queue_capacity == 0 {
            return Err(invalid(
                "notification_queue_capacity",
                "0".to_string(),
                "notification_queue_capacity must be greater than 0",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: String, reason: &str) -> JourneyError {
    JourneyError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}
