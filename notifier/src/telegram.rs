//! Telegram delivery for SSH Sentry.
//!
//! This module formats the human-readable alert and delivers it to the
//! Telegram Bot API with bounded retries:
//!
//! - Form-encoded POST to `/bot<token>/sendMessage`
//! - `parse_mode=Markdown`, optional `disable_notification`
//! - Fixed delay between attempts (default 5s; deliberately not
//!   exponential, matching the source behavior)
//! - Connect timeout 10s, total timeout 30s per attempt
//!
//! Exhausting all attempts is a reported failure, not a panic; the caller
//! logs it and completes the pipeline.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::types::{ConnectionEvent, KeyIdentity};

/// Per-attempt connect timeout.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Per-attempt total timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors that can occur during notification delivery.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// HTTP request failed at the transport level.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The chat API returned a non-success status on the final attempt.
    #[error("chat API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// All attempts exhausted without a successful delivery.
    #[error("delivery failed after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },
}

/// Configuration for the Telegram notifier.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Chat API base URL (e.g. `https://api.telegram.org`).
    pub api_url: String,

    /// Bot token.
    pub bot_token: String,

    /// Target chat.
    pub chat_id: String,

    /// Maximum delivery attempts.
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl NotifierConfig {
    /// Extracts the notifier configuration from the full config.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_url: config.api_url.clone(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay,
        }
    }
}

/// Telegram notifier with bounded, fixed-delay retries.
pub struct TelegramNotifier {
    config: NotifierConfig,
    client: Client,
}

impl TelegramNotifier {
    /// Creates a notifier with the standard per-attempt timeouts.
    #[must_use]
    pub fn new(config: NotifierConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    /// Delivers a message to the configured chat.
    ///
    /// Retries on any transport error or non-2xx response, sleeping the
    /// configured fixed delay between attempts.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` once all attempts are exhausted.
    pub async fn send(&self, text: &str, silent: bool) -> Result<(), DeliveryError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_url, self.config.bot_token
        );

        let mut form: Vec<(&str, &str)> = vec![
            ("chat_id", self.config.chat_id.as_str()),
            ("text", text),
            ("parse_mode", "Markdown"),
        ];
        if silent {
            form.push(("disable_notification", "true"));
        }

        let mut last_error = None;

        for attempt in 1..=self.config.max_attempts {
            debug!(attempt, max_attempts = self.config.max_attempts, "Sending notification");

            match self.client.post(&url).form(&form).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        info!(attempt, "Notification delivered");
                        return Ok(());
                    }

                    let message = response.text().await.unwrap_or_default();
                    warn!(
                        status = status.as_u16(),
                        attempt,
                        message = %message,
                        "Chat API rejected the notification, will retry"
                    );
                    last_error = Some(DeliveryError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Transport error, will retry");
                    last_error = Some(DeliveryError::Http(e));
                }
            }

            if attempt < self.config.max_attempts {
                sleep(self.config.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or(DeliveryError::AttemptsExhausted {
            attempts: self.config.max_attempts,
        }))
    }
}

/// Formats the alert text for a resolved connection.
///
/// The message leads with the server name, then the key owner (comment),
/// source IP, effective user, fingerprint, and session type.
#[must_use]
pub fn format_message(server_name: &str, event: &ConnectionEvent, identity: &KeyIdentity) -> String {
    format!(
        "🔐 *SSH login on {server}*\n\
         Key: {comment}\n\
         User: `{user}`\n\
         From: `{ip}`\n\
         Fingerprint: `{fingerprint}`\n\
         Session: {session}",
        server = server_name,
        comment = identity.comment,
        user = event.display_user(identity),
        ip = event.source_ip,
        fingerprint = identity.fingerprint,
        session = event.session_type,
    )
}
