//! Core types for the SSH Sentry notification pipeline.
//!
//! This module defines the data that flows through the pipeline: the
//! connection event resolved from the SSH session environment, the key
//! identity matched against the authorized-keys store, and the outcome
//! recorded for each evaluated connection. All types serialize to
//! snake_case JSON for the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of how an SSH connection is being used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    /// Interactive shell (tty on both stdin and stdout).
    Interactive,
    /// Port-forwarding / tunnel session.
    Tunnel,
    /// One-shot remote command.
    Command,
    /// Could not be classified.
    Unknown,
}

impl SessionType {
    /// Human-readable label used in notification text.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Tunnel => "tunnel",
            Self::Command => "command",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A single SSH connection, resolved once per invocation from the session
/// environment. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEvent {
    /// Source IP of the connecting client, or `"unknown"`.
    pub source_ip: String,

    /// Local username the session was established for.
    pub local_user: String,

    /// How the connection is being used.
    pub session_type: SessionType,

    /// Optional username declared by the SSH client environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_client_user: Option<String>,
}

impl ConnectionEvent {
    /// Effective username for display and exclusion matching.
    ///
    /// A declared per-key user (from the key options) takes precedence over
    /// the OS session user; the caller passes the resolved identity so the
    /// precedence lives in one place.
    #[must_use]
    pub fn display_user<'a>(&'a self, identity: &'a KeyIdentity) -> &'a str {
        identity
            .declared_user
            .as_deref()
            .unwrap_or(&self.local_user)
    }
}

/// Placeholder used whenever a lookup degrades instead of failing.
pub const UNKNOWN: &str = "unknown";

/// The authorized key that authenticated a session, best effort.
///
/// Resolved via the [`KeyLookup`](crate::resolver::KeyLookup) collaborator;
/// every field falls back to `"unknown"` / `None` when resolution fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIdentity {
    /// Key fingerprint (e.g. `SHA256:...`), or `"unknown"`.
    pub fingerprint: String,

    /// Free-text comment from the authorized_keys entry, or `"unknown"`.
    pub comment: String,

    /// `SSH_USER` declared in the key options, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_user: Option<String>,
}

impl KeyIdentity {
    /// Identity used when no lookup method succeeds.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            fingerprint: UNKNOWN.to_string(),
            comment: UNKNOWN.to_string(),
            declared_user: None,
        }
    }

    /// Returns `true` if the fingerprint could not be resolved.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.fingerprint == UNKNOWN
    }
}

impl Default for KeyIdentity {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Why a connection event was suppressed instead of notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    /// Source IP falls inside a configured local/private range.
    LocalIp,
    /// Source IP is on the excluded-IPs list.
    ExcludedIp,
    /// Effective username is on the excluded-usernames list.
    ExcludedUser,
    /// Key comment matched an excluded-comment entry.
    ExcludedComment,
    /// Notifications for this session type are disabled.
    TypeDisabled,
    /// A notification for this composite key was sent within the cooldown.
    RateLimited,
    /// Another pipeline instance holds the lock.
    LockContended,
}

/// Final outcome of evaluating one connection event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A notification was delivered to the chat API.
    Delivered,
    /// Delivery failed after exhausting all retry attempts.
    DeliveryFailed,
    /// The event was suppressed before delivery.
    Suppressed(SuppressReason),
}

impl Outcome {
    /// Returns `true` if a notification went out.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Returns the suppression reason, if the event was suppressed.
    #[must_use]
    pub fn suppress_reason(&self) -> Option<SuppressReason> {
        match self {
            Self::Suppressed(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Event-type tag written on every JSON log record.
pub const EVENT_TYPE_SSH_LOGIN: &str = "ssh_login";

/// One JSON line in the structured event log.
///
/// Merges the connection event and key identity with a UTC timestamp and
/// the outcome flags, matching the layout consumed by downstream tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Always [`EVENT_TYPE_SSH_LOGIN`].
    pub event_type: String,

    /// When the event was evaluated.
    pub timestamp: DateTime<Utc>,

    /// Host display name from configuration.
    pub server: String,

    pub source_ip: String,
    pub user: String,
    pub session_type: SessionType,
    pub fingerprint: String,
    pub key_comment: String,

    /// Whether a notification was actually delivered.
    pub notification_sent: bool,

    /// Whether the notification was sent without sound.
    pub sound_disabled: bool,

    /// Suppression reason, when the event did not notify.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppressed: Option<SuppressReason>,
}

impl ConnectionRecord {
    /// Builds a record from the pipeline's inputs and outcome.
    #[must_use]
    pub fn new(
        server: &str,
        event: &ConnectionEvent,
        identity: &KeyIdentity,
        outcome: Outcome,
        sound_disabled: bool,
    ) -> Self {
        Self {
            event_type: EVENT_TYPE_SSH_LOGIN.to_string(),
            timestamp: Utc::now(),
            server: server.to_string(),
            source_ip: event.source_ip.clone(),
            user: event.display_user(identity).to_string(),
            session_type: event.session_type,
            fingerprint: identity.fingerprint.clone(),
            key_comment: identity.comment.clone(),
            notification_sent: outcome.is_delivered(),
            sound_disabled,
            suppressed: outcome.suppress_reason(),
        }
    }
}
