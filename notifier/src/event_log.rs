//! Structured JSON event log for SSH Sentry.
//!
//! When enabled, every evaluated connection appends exactly one JSON
//! object per line to the configured sink. The log is append-only; prior
//! lines are never rewritten. A record that fails to serialize degrades to
//! a minimal error-tagged line instead of being dropped.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::Utc;
use tracing::warn;

use crate::types::ConnectionRecord;

/// Append-only JSON lines sink.
#[derive(Debug, Clone)]
pub struct EventLogger {
    path: PathBuf,
}

impl EventLogger {
    /// Creates a logger appending to `path`. Parent directories are
    /// created eagerly so the first append cannot fail on a missing tree.
    pub fn new(path: PathBuf) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    /// Appends one record as a JSON line.
    ///
    /// Serialization failure degrades to a minimal error-tagged record;
    /// only the append itself can error.
    pub fn log_event(&self, record: &ConnectionRecord) -> io::Result<()> {
        let line = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize event record, writing error stub");
                format!(
                    "{{\"event_type\":\"log_error\",\"timestamp\":\"{}\",\"error\":\"{}\"}}",
                    Utc::now().to_rfc3339(),
                    e.to_string().replace('"', "'"),
                )
            }
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionEvent, KeyIdentity, Outcome, SessionType, SuppressReason};
    use tempfile::TempDir;

    fn record(outcome: Outcome) -> ConnectionRecord {
        let event = ConnectionEvent {
            source_ip: "198.51.100.50".to_string(),
            local_user: "root".to_string(),
            session_type: SessionType::Interactive,
            ssh_client_user: None,
        };
        ConnectionRecord::new("web-1", &event, &KeyIdentity::unknown(), outcome, false)
    }

    #[test]
    fn appends_one_json_line_per_event() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        let logger = EventLogger::new(path.clone()).unwrap();

        logger.log_event(&record(Outcome::Delivered)).unwrap();
        logger
            .log_event(&record(Outcome::Suppressed(SuppressReason::RateLimited)))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "ssh_login");
        assert_eq!(first["notification_sent"], true);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["notification_sent"], false);
        assert_eq!(second["suppressed"], "rate_limited");
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("log").join("events.json");

        let logger = EventLogger::new(path.clone()).unwrap();
        logger.log_event(&record(Outcome::Delivered)).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn earlier_lines_are_never_rewritten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.json");
        let logger = EventLogger::new(path.clone()).unwrap();

        logger.log_event(&record(Outcome::Delivered)).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        logger.log_event(&record(Outcome::DeliveryFailed)).unwrap();
        let after = std::fs::read_to_string(&path).unwrap();

        assert!(after.starts_with(&before));
    }
}
