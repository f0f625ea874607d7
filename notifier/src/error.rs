//! Error types for SSH Sentry.
//!
//! This module defines the error types used throughout the notifier crate,
//! providing structured error handling with clear, human-readable messages.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while running the notification pipeline.
///
/// Per the error-handling policy, only two classes of failure surface here:
/// configuration problems (fatal before any pipeline work) and delivery
/// failure after retry exhaustion. Resolution and logging failures degrade
/// in place and never reach this type.
#[derive(Error, Debug)]
pub enum NotifierError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system I/O error (rate-limit store, lock file, event log).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Notification delivery failed after exhausting all retry attempts.
    #[error("delivery failed: {0}")]
    Delivery(#[from] crate::telegram::DeliveryError),
}

/// Convenience result alias for notifier operations.
pub type Result<T> = std::result::Result<T, NotifierError>;
