//! Key and connection resolution for SSH Sentry.
//!
//! This module turns the ambient SSH session environment into a
//! [`ConnectionEvent`] and best-effort [`KeyIdentity`]. Resolution is
//! strictly read-only and never fails the pipeline: every sub-lookup that
//! errors or comes up empty degrades to `"unknown"` fields instead.
//!
//! # Session classification
//!
//! The session type is decided by an explicit priority order:
//!
//! 1. Interactive terminal on both stdin and stdout → `Interactive`
//! 2. `SSH_ORIGINAL_COMMAND` present → `Command`
//! 3. `SSH_TUNNEL` marker present → `Tunnel`
//! 4. Otherwise → `Unknown`
//!
//! Explicit signals override inference, and terminal detection takes
//! precedence over command-string presence.
//!
//! # Key lookup
//!
//! Which authorized key authenticated the session is delegated to the
//! [`KeyLookup`] trait. The production implementation shells out to an
//! external helper that replays recent auth-log entries and answers with
//! JSON `{fingerprint, comment, options: {SSH_USER}}`; tests inject fakes.

use std::collections::HashMap;
use std::io::IsTerminal;
use std::process::Command;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{ConnectionEvent, KeyIdentity, SessionType, UNKNOWN};

/// Errors from a key-lookup collaborator.
///
/// These never propagate out of [`Resolver::resolve`]; they exist so
/// implementations can report *why* a lookup degraded.
#[derive(Error, Debug)]
pub enum LookupError {
    /// The helper process could not be spawned or exited unsuccessfully.
    #[error("helper invocation failed: {0}")]
    Helper(String),

    /// The helper produced output that is not the expected JSON contract.
    #[error("invalid helper output: {0}")]
    InvalidOutput(#[from] serde_json::Error),
}

/// Pluggable lookup from (source ip, local user) to the authenticating key.
///
/// Returning `Ok(None)` means "no match found"; returning `Err` means the
/// lookup mechanism itself is unavailable. The resolver treats both the
/// same way, falling through to the next method.
pub trait KeyLookup {
    /// Attempts to find the authorized key that authenticated the session.
    fn lookup(&self, source_ip: &str, local_user: &str) -> Result<Option<KeyIdentity>, LookupError>;
}

/// Wire format of the external helper's JSON answer.
#[derive(Debug, Deserialize)]
struct HelperReply {
    fingerprint: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    options: HashMap<String, String>,
}

impl From<HelperReply> for KeyIdentity {
    fn from(reply: HelperReply) -> Self {
        let declared_user = reply.options.get("SSH_USER").cloned();
        Self {
            fingerprint: reply.fingerprint,
            comment: if reply.comment.is_empty() {
                UNKNOWN.to_string()
            } else {
                reply.comment
            },
            declared_user,
        }
    }
}

/// Key lookup that invokes an external helper command.
///
/// The helper is run as `<cmd> <ip> <user>` through the shell and must
/// print a single JSON object `{fingerprint, comment, options}` on success,
/// or exit non-zero / print nothing when no key matched.
#[derive(Debug, Clone)]
pub struct HelperKeyLookup {
    command: String,
}

impl HelperKeyLookup {
    /// Creates a lookup around the configured helper command.
    #[must_use]
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

impl KeyLookup for HelperKeyLookup {
    fn lookup(&self, source_ip: &str, local_user: &str) -> Result<Option<KeyIdentity>, LookupError> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(format!("{} \"$0\" \"$1\"", self.command))
            .arg(source_ip)
            .arg(local_user)
            .output()
            .map_err(|e| LookupError::Helper(e.to_string()))?;

        if !output.status.success() {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let reply: HelperReply = serde_json::from_str(trimmed)?;
        Ok(Some(reply.into()))
    }
}

/// Key lookup from `SSH_KEY_FINGERPRINT` / `SSH_KEY_COMMENT` environment
/// hints, used as a fallback when no richer lookup is available.
#[derive(Debug, Clone, Default)]
pub struct EnvKeyLookup {
    fingerprint: Option<String>,
    comment: Option<String>,
}

impl EnvKeyLookup {
    /// Captures the environment hints at construction time.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            fingerprint: std::env::var("SSH_KEY_FINGERPRINT").ok(),
            comment: std::env::var("SSH_KEY_COMMENT").ok(),
        }
    }
}

impl KeyLookup for EnvKeyLookup {
    fn lookup(&self, _source_ip: &str, _local_user: &str) -> Result<Option<KeyIdentity>, LookupError> {
        match &self.fingerprint {
            Some(fingerprint) => Ok(Some(KeyIdentity {
                fingerprint: fingerprint.clone(),
                comment: self
                    .comment
                    .clone()
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                declared_user: None,
            })),
            None => Ok(None),
        }
    }
}

/// Raw session signals captured from the environment, one snapshot per
/// invocation.
#[derive(Debug, Clone, Default)]
pub struct SessionSignals {
    /// `SSH_CONNECTION` (client-ip client-port server-ip server-port).
    pub ssh_connection: Option<String>,

    /// `SSH_CLIENT` (client-ip client-port server-port).
    pub ssh_client: Option<String>,

    /// `SSH_USER` declared by the surrounding integration.
    pub ssh_user: Option<String>,

    /// `SSH_ORIGINAL_COMMAND` for forced/one-shot commands.
    pub ssh_original_command: Option<String>,

    /// `SSH_TUNNEL` marker.
    pub ssh_tunnel: Option<String>,

    /// Whether stdin is attached to a terminal.
    pub stdin_is_tty: bool,

    /// Whether stdout is attached to a terminal.
    pub stdout_is_tty: bool,

    /// Effective user the process runs as, the `local_user` fallback.
    pub effective_user: Option<String>,
}

impl SessionSignals {
    /// Captures all signals from the current process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            ssh_connection: env_nonempty("SSH_CONNECTION"),
            ssh_client: env_nonempty("SSH_CLIENT"),
            ssh_user: env_nonempty("SSH_USER"),
            ssh_original_command: env_nonempty("SSH_ORIGINAL_COMMAND"),
            ssh_tunnel: env_nonempty("SSH_TUNNEL"),
            stdin_is_tty: std::io::stdin().is_terminal(),
            stdout_is_tty: std::io::stdout().is_terminal(),
            effective_user: env_nonempty("USER").or_else(|| env_nonempty("LOGNAME")),
        }
    }

    /// Source IP from the connection-tuple signals.
    ///
    /// `SSH_CONNECTION` is preferred; `SSH_CLIENT` is the fallback. Both
    /// carry the client address as their first whitespace-separated field.
    #[must_use]
    pub fn source_ip(&self) -> String {
        self.ssh_connection
            .as_deref()
            .or(self.ssh_client.as_deref())
            .and_then(|tuple| tuple.split_whitespace().next())
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    /// Local username: explicit session user, else effective user.
    #[must_use]
    pub fn local_user(&self) -> String {
        self.ssh_user
            .clone()
            .or_else(|| self.effective_user.clone())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    /// Classifies the session per the documented priority order.
    #[must_use]
    pub fn session_type(&self) -> SessionType {
        if self.stdin_is_tty && self.stdout_is_tty {
            SessionType::Interactive
        } else if self.ssh_original_command.is_some() {
            SessionType::Command
        } else if self.ssh_tunnel.is_some() {
            SessionType::Tunnel
        } else {
            SessionType::Unknown
        }
    }
}

/// Reads an environment variable, treating empty values as unset.
fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Resolves connection events and key identities from session signals.
pub struct Resolver {
    signals: SessionSignals,
    lookups: Vec<Box<dyn KeyLookup>>,
}

impl Resolver {
    /// Creates a resolver over captured signals and an ordered chain of
    /// lookup methods. The first lookup that answers wins.
    #[must_use]
    pub fn new(signals: SessionSignals, lookups: Vec<Box<dyn KeyLookup>>) -> Self {
        Self { signals, lookups }
    }

    /// Resolves the connection event and key identity for this invocation.
    ///
    /// Never fails: lookup errors are logged and the identity degrades to
    /// `"unknown"` fields.
    #[must_use]
    pub fn resolve(&self) -> (ConnectionEvent, KeyIdentity) {
        let event = ConnectionEvent {
            source_ip: self.signals.source_ip(),
            local_user: self.signals.local_user(),
            session_type: self.signals.session_type(),
            ssh_client_user: self.signals.ssh_user.clone(),
        };

        let identity = self.resolve_identity(&event);

        debug!(
            source_ip = %event.source_ip,
            user = %event.local_user,
            session_type = %event.session_type,
            fingerprint = %identity.fingerprint,
            "Resolved connection event"
        );

        (event, identity)
    }

    fn resolve_identity(&self, event: &ConnectionEvent) -> KeyIdentity {
        for lookup in &self.lookups {
            match lookup.lookup(&event.source_ip, &event.local_user) {
                Ok(Some(identity)) => return identity,
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Key lookup degraded, trying next method");
                }
            }
        }
        KeyIdentity::unknown()
    }
}
