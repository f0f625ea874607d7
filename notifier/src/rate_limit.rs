//! Persistent rate limiting for SSH Sentry.
//!
//! The rate limiter deduplicates alerts per composite key (source IP plus
//! key fingerprint, or IP plus the tunnel marker for tunnel sessions). A
//! notification for a given key goes out at most once per cooldown window.
//!
//! # Storage
//!
//! State must survive across invocations, since every SSH login runs a
//! fresh process. The [`RateStore`] trait abstracts the backing store:
//! [`FileRateStore`] keeps one small file per sanitized key containing a
//! decimal epoch-seconds value (the layout an external log-rotation job
//! purges), and [`MemoryRateStore`] backs deterministic unit tests.
//!
//! Two concurrent invocations racing on the same key may both be allowed;
//! that is tolerated by design. The whole-pipeline lock prevents a single
//! process from double-notifying, and the store itself is last-write-wins.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sshsentry_notifier::rate_limit::{MemoryRateStore, RateLimiter};
//!
//! let mut limiter = RateLimiter::new(MemoryRateStore::new());
//! let cooldown = Duration::from_secs(300);
//!
//! assert!(limiter.allow_at("198.51.100.50_SHA256:abc", cooldown, 1_000).unwrap());
//! assert!(!limiter.allow_at("198.51.100.50_SHA256:abc", cooldown, 1_100).unwrap());
//! assert!(limiter.allow_at("198.51.100.50_SHA256:abc", cooldown, 1_300).unwrap());
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::types::{ConnectionEvent, KeyIdentity, SessionType};

/// Builds the rate-limit composite key for a resolved connection.
///
/// Tunnel sessions are keyed per IP and session type rather than per key,
/// since tunnels reconnect frequently with the same fingerprint.
#[must_use]
pub fn composite_key(event: &ConnectionEvent, identity: &KeyIdentity) -> String {
    match event.session_type {
        SessionType::Tunnel => format!("{}_tunnel", event.source_ip),
        _ => format!("{}_{}", event.source_ip, identity.fingerprint),
    }
}

/// Replaces every non-alphanumeric character so a composite key is safe as
/// a flat file name.
#[must_use]
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Durable key to last-notified-timestamp storage.
pub trait RateStore {
    /// Reads the persisted epoch-seconds timestamp for a key, if any.
    fn last_notified(&self, key: &str) -> io::Result<Option<u64>>;

    /// Persists the timestamp for a key, overwriting any previous value.
    fn record(&mut self, key: &str, epoch_secs: u64) -> io::Result<()>;
}

/// File-backed store: one file per sanitized key under a namespace
/// directory, each holding a single decimal epoch-seconds value.
///
/// Stale entries are never deleted here; an external log-rotation
/// collaborator purges them.
#[derive(Debug, Clone)]
pub struct FileRateStore {
    dir: PathBuf,
}

impl FileRateStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    pub fn new(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(sanitize_key(key))
    }
}

impl RateStore for FileRateStore {
    fn last_notified(&self, key: &str) -> io::Result<Option<u64>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => match contents.trim().parse::<u64>() {
                Ok(ts) => Ok(Some(ts)),
                Err(_) => {
                    // A corrupt record is treated as absent; it gets
                    // rewritten on the next allowed notification.
                    warn!(path = %path.display(), "Unreadable rate-limit record, ignoring");
                    Ok(None)
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn record(&mut self, key: &str, epoch_secs: u64) -> io::Result<()> {
        fs::write(self.path_for(key), epoch_secs.to_string())
    }
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryRateStore {
    entries: HashMap<String, u64>,
}

impl MemoryRateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded keys, for assertions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no key has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RateStore for MemoryRateStore {
    fn last_notified(&self, key: &str) -> io::Result<Option<u64>> {
        Ok(self.entries.get(&sanitize_key(key)).copied())
    }

    fn record(&mut self, key: &str, epoch_secs: u64) -> io::Result<()> {
        self.entries.insert(sanitize_key(key), epoch_secs);
        Ok(())
    }
}

/// Cooldown throttle over a [`RateStore`].
pub struct RateLimiter<S: RateStore> {
    store: S,
}

impl<S: RateStore> RateLimiter<S> {
    /// Creates a limiter over the given store.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Checks whether a notification for `key` is allowed right now.
    ///
    /// On allow, the current timestamp is recorded before returning so a
    /// crash after delivery cannot produce a duplicate on restart. On
    /// deny, the store is not touched.
    ///
    /// # Errors
    ///
    /// Propagates store I/O errors; callers decide whether to fail open.
    pub fn allow(&mut self, key: &str, cooldown: Duration) -> io::Result<bool> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .as_secs();
        self.allow_at(key, cooldown, now)
    }

    /// [`allow`](Self::allow) with an explicit clock, for deterministic tests.
    pub fn allow_at(&mut self, key: &str, cooldown: Duration, now: u64) -> io::Result<bool> {
        if let Some(last) = self.store.last_notified(key)? {
            let elapsed = now.saturating_sub(last);
            if elapsed < cooldown.as_secs() {
                debug!(
                    key = %key,
                    elapsed_secs = elapsed,
                    cooldown_secs = cooldown.as_secs(),
                    "Rate limited"
                );
                return Ok(false);
            }
        }

        self.store.record(key, now)?;
        Ok(true)
    }

    /// Access to the underlying store, for assertions in tests.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COOLDOWN: Duration = Duration::from_secs(300);

    fn event(session_type: SessionType) -> ConnectionEvent {
        ConnectionEvent {
            source_ip: "198.51.100.50".to_string(),
            local_user: "root".to_string(),
            session_type,
            ssh_client_user: None,
        }
    }

    fn identity() -> KeyIdentity {
        KeyIdentity {
            fingerprint: "SHA256:abc".to_string(),
            comment: "alice@example.com".to_string(),
            declared_user: None,
        }
    }

    // =========================================================================
    // Composite Key Tests
    // =========================================================================

    #[test]
    fn composite_key_is_ip_and_fingerprint() {
        assert_eq!(
            composite_key(&event(SessionType::Interactive), &identity()),
            "198.51.100.50_SHA256:abc"
        );
    }

    #[test]
    fn tunnel_composite_key_drops_fingerprint() {
        assert_eq!(
            composite_key(&event(SessionType::Tunnel), &identity()),
            "198.51.100.50_tunnel"
        );
    }

    #[test]
    fn sanitize_replaces_non_alphanumerics() {
        assert_eq!(
            sanitize_key("198.51.100.50_SHA256:abc/+="),
            "198_51_100_50_SHA256_abc___"
        );
    }

    // =========================================================================
    // RateLimiter Tests (deterministic clock)
    // =========================================================================

    #[test]
    fn first_call_is_allowed_and_recorded() {
        let mut limiter = RateLimiter::new(MemoryRateStore::new());
        assert!(limiter.allow_at("k", COOLDOWN, 1_000).unwrap());
        assert_eq!(limiter.store().last_notified("k").unwrap(), Some(1_000));
    }

    #[test]
    fn second_call_within_cooldown_is_denied() {
        let mut limiter = RateLimiter::new(MemoryRateStore::new());
        assert!(limiter.allow_at("k", COOLDOWN, 1_000).unwrap());
        assert!(!limiter.allow_at("k", COOLDOWN, 1_299).unwrap());
    }

    #[test]
    fn denial_does_not_refresh_timestamp() {
        let mut limiter = RateLimiter::new(MemoryRateStore::new());
        limiter.allow_at("k", COOLDOWN, 1_000).unwrap();
        limiter.allow_at("k", COOLDOWN, 1_200).unwrap();

        // The stored timestamp is still the original send, so the window
        // opens at 1300, not 1500.
        assert_eq!(limiter.store().last_notified("k").unwrap(), Some(1_000));
        assert!(limiter.allow_at("k", COOLDOWN, 1_300).unwrap());
    }

    #[test]
    fn call_at_exactly_cooldown_is_allowed() {
        let mut limiter = RateLimiter::new(MemoryRateStore::new());
        assert!(limiter.allow_at("k", COOLDOWN, 1_000).unwrap());
        assert!(limiter.allow_at("k", COOLDOWN, 1_300).unwrap());
    }

    #[test]
    fn allowed_refresh_restarts_the_window() {
        let mut limiter = RateLimiter::new(MemoryRateStore::new());
        limiter.allow_at("k", COOLDOWN, 1_000).unwrap();
        limiter.allow_at("k", COOLDOWN, 1_400).unwrap();

        assert!(!limiter.allow_at("k", COOLDOWN, 1_500).unwrap());
        assert!(limiter.allow_at("k", COOLDOWN, 1_700).unwrap());
    }

    #[test]
    fn different_keys_are_independent() {
        let mut limiter = RateLimiter::new(MemoryRateStore::new());
        assert!(limiter.allow_at("a", COOLDOWN, 1_000).unwrap());
        assert!(limiter.allow_at("b", COOLDOWN, 1_000).unwrap());
        assert!(!limiter.allow_at("a", COOLDOWN, 1_001).unwrap());
    }

    #[test]
    fn clock_skew_backwards_still_denies_within_window() {
        let mut limiter = RateLimiter::new(MemoryRateStore::new());
        limiter.allow_at("k", COOLDOWN, 1_000).unwrap();
        // now < stored: saturating elapsed of zero stays inside the window
        assert!(!limiter.allow_at("k", COOLDOWN, 900).unwrap());
    }

    // =========================================================================
    // FileRateStore Tests
    // =========================================================================

    #[test]
    fn file_store_round_trips_timestamps() {
        let dir = TempDir::new().unwrap();
        let mut store = FileRateStore::new(dir.path().to_path_buf()).unwrap();

        assert_eq!(store.last_notified("198.51.100.50_SHA256:abc").unwrap(), None);
        store.record("198.51.100.50_SHA256:abc", 1_700_000_000).unwrap();
        assert_eq!(
            store.last_notified("198.51.100.50_SHA256:abc").unwrap(),
            Some(1_700_000_000)
        );
    }

    #[test]
    fn file_store_writes_decimal_epoch_seconds() {
        let dir = TempDir::new().unwrap();
        let mut store = FileRateStore::new(dir.path().to_path_buf()).unwrap();
        store.record("1.2.3.4_SHA256:x", 1_700_000_000).unwrap();

        let contents =
            fs::read_to_string(dir.path().join(sanitize_key("1.2.3.4_SHA256:x"))).unwrap();
        assert_eq!(contents, "1700000000");
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = FileRateStore::new(dir.path().to_path_buf()).unwrap();
            store.record("k", 42).unwrap();
        }
        let store = FileRateStore::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.last_notified("k").unwrap(), Some(42));
    }

    #[test]
    fn file_store_ignores_corrupt_records() {
        let dir = TempDir::new().unwrap();
        let store = FileRateStore::new(dir.path().to_path_buf()).unwrap();
        fs::write(dir.path().join(sanitize_key("bad")), "not-a-number").unwrap();

        assert_eq!(store.last_notified("bad").unwrap(), None);
    }

    #[test]
    fn file_store_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("state").join("ratelimit");
        let store = FileRateStore::new(nested.clone());
        assert!(store.is_ok());
        assert!(nested.is_dir());
    }

    #[test]
    fn limiter_over_file_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();

        let mut limiter =
            RateLimiter::new(FileRateStore::new(dir.path().to_path_buf()).unwrap());
        assert!(limiter.allow_at("k", COOLDOWN, 1_000).unwrap());

        // Fresh limiter, same directory: still inside the window
        let mut limiter =
            RateLimiter::new(FileRateStore::new(dir.path().to_path_buf()).unwrap());
        assert!(!limiter.allow_at("k", COOLDOWN, 1_100).unwrap());
        assert!(limiter.allow_at("k", COOLDOWN, 1_300).unwrap());
    }
}
