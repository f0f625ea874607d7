//! Configuration module for SSH Sentry.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SSHSENTRY_BOT_TOKEN` | Yes | - | Telegram bot token |
//! | `SSHSENTRY_CHAT_ID` | Yes | - | Telegram chat to deliver alerts to |
//! | `SSHSENTRY_SERVER_NAME` | No | hostname | Display name used in alert text |
//! | `SSHSENTRY_API_URL` | No | `https://api.telegram.org` | Chat API base URL |
//! | `SSHSENTRY_STATE_DIR` | No | `~/.sshsentry` | Rate-limit state and lock file directory |
//! | `SSHSENTRY_COOLDOWN_SECS` | No | 300 | Cooldown window per (ip, fingerprint) |
//! | `SSHSENTRY_TUNNEL_COOLDOWN_SECS` | No | 60 | Cooldown window for tunnel sessions |
//! | `SSHSENTRY_NOTIFY_INTERACTIVE` | No | true | Notify on interactive sessions |
//! | `SSHSENTRY_NOTIFY_TUNNELS` | No | true | Notify on tunnel sessions |
//! | `SSHSENTRY_NOTIFY_COMMANDS` | No | true | Notify on one-shot command sessions |
//! | `SSHSENTRY_SUPPRESS_LOCAL_IPS` | No | true | Suppress alerts from private ranges |
//! | `SSHSENTRY_LOCAL_RANGES` | No | - | Extra CIDR ranges treated as local, comma-separated |
//! | `SSHSENTRY_EXCLUDED_IPS` | No | - | Exact IPs to never alert on, comma-separated |
//! | `SSHSENTRY_EXCLUDED_USERS` | No | - | Usernames to never alert on, comma-separated |
//! | `SSHSENTRY_EXCLUDED_KEY_COMMENTS` | No | - | Key comments to never alert on, comma-separated |
//! | `SSHSENTRY_SILENT` | No | false | Deliver alerts without sound |
//! | `SSHSENTRY_MAX_ATTEMPTS` | No | 3 | Delivery attempts before giving up (1-10) |
//! | `SSHSENTRY_RETRY_DELAY_SECS` | No | 5 | Fixed delay between delivery attempts |
//! | `SSHSENTRY_KEY_LOOKUP_CMD` | No | - | External key-lookup helper command |
//! | `SSHSENTRY_JSON_LOG` | No | - | Path of the JSON event log (enables JSON logging) |
//!
//! # Example
//!
//! ```no_run
//! use sshsentry_notifier::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Alerting chat: {}", config.chat_id);
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

/// Default Telegram API base URL.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Default state directory name relative to home.
const DEFAULT_STATE_DIR: &str = ".sshsentry";

/// Default cooldown window per (ip, fingerprint) composite key.
const DEFAULT_COOLDOWN_SECS: u64 = 300;

/// Default (shorter) cooldown window for tunnel sessions.
const DEFAULT_TUNNEL_COOLDOWN_SECS: u64 = 60;

/// Default maximum delivery attempts.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed delay between delivery attempts (seconds).
const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Minimum allowed delivery attempts.
const MIN_MAX_ATTEMPTS: u32 = 1;

/// Maximum allowed delivery attempts.
const MAX_MAX_ATTEMPTS: u32 = 10;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Configuration for SSH Sentry.
///
/// Built once per invocation and passed into each pipeline component;
/// no component reads the environment after construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token.
    pub bot_token: String,

    /// Telegram chat to deliver alerts to.
    pub chat_id: String,

    /// Host display name used in alert text.
    pub server_name: String,

    /// Chat API base URL. Overridable for tests.
    pub api_url: String,

    /// Directory holding rate-limit state and the pipeline lock file.
    pub state_dir: PathBuf,

    /// Cooldown window per (ip, fingerprint) composite key.
    pub cooldown: Duration,

    /// Cooldown window for tunnel sessions.
    pub tunnel_cooldown: Duration,

    /// Per-session-type notification toggles.
    pub notify_interactive: bool,
    pub notify_tunnels: bool,
    pub notify_commands: bool,

    /// Suppress alerts for source IPs inside local/private ranges.
    pub suppress_local_ips: bool,

    /// Operator-configured CIDR ranges treated as local, on top of the
    /// well-known private blocks.
    pub local_ranges: Vec<String>,

    /// Exact source IPs to never alert on.
    pub excluded_ips: Vec<String>,

    /// Usernames to never alert on.
    pub excluded_users: Vec<String>,

    /// Key comments to never alert on (substring-or-exact match).
    pub excluded_key_comments: Vec<String>,

    /// Deliver alerts without sound.
    pub silent: bool,

    /// Delivery attempts before declaring permanent failure.
    pub max_attempts: u32,

    /// Fixed delay between delivery attempts.
    pub retry_delay: Duration,

    /// External key-lookup helper command, if configured.
    pub key_lookup_cmd: Option<String>,

    /// Path of the JSON event log. `None` disables JSON logging.
    pub json_log_path: Option<PathBuf>,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `SSHSENTRY_BOT_TOKEN` or `SSHSENTRY_CHAT_ID` is not set
    /// - A numeric or boolean variable is set but cannot be parsed
    /// - The home directory cannot be determined (needed for default paths)
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
        let home_dir = base_dirs.home_dir();

        // Required: credentials. Missing either is fatal before any
        // pipeline work happens.
        let bot_token = env::var("SSHSENTRY_BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("SSHSENTRY_BOT_TOKEN".to_string()))?;
        let chat_id = env::var("SSHSENTRY_CHAT_ID")
            .map_err(|_| ConfigError::MissingEnvVar("SSHSENTRY_CHAT_ID".to_string()))?;

        let server_name = env::var("SSHSENTRY_SERVER_NAME").unwrap_or_else(|_| get_hostname());

        let api_url = env::var("SSHSENTRY_API_URL")
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let state_dir = env::var("SSHSENTRY_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home_dir.join(DEFAULT_STATE_DIR));

        let cooldown =
            Duration::from_secs(parse_secs("SSHSENTRY_COOLDOWN_SECS", DEFAULT_COOLDOWN_SECS)?);
        let tunnel_cooldown = Duration::from_secs(parse_secs(
            "SSHSENTRY_TUNNEL_COOLDOWN_SECS",
            DEFAULT_TUNNEL_COOLDOWN_SECS,
        )?);

        let notify_interactive = parse_bool("SSHSENTRY_NOTIFY_INTERACTIVE", true)?;
        let notify_tunnels = parse_bool("SSHSENTRY_NOTIFY_TUNNELS", true)?;
        let notify_commands = parse_bool("SSHSENTRY_NOTIFY_COMMANDS", true)?;
        let suppress_local_ips = parse_bool("SSHSENTRY_SUPPRESS_LOCAL_IPS", true)?;
        let silent = parse_bool("SSHSENTRY_SILENT", false)?;

        let local_ranges = parse_list("SSHSENTRY_LOCAL_RANGES");
        let excluded_ips = parse_list("SSHSENTRY_EXCLUDED_IPS");
        let excluded_users = parse_list("SSHSENTRY_EXCLUDED_USERS");
        let excluded_key_comments = parse_list("SSHSENTRY_EXCLUDED_KEY_COMMENTS");

        let max_attempts = match env::var("SSHSENTRY_MAX_ATTEMPTS") {
            Ok(val) => {
                let attempts = val.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                    key: "SSHSENTRY_MAX_ATTEMPTS".to_string(),
                    message: format!("expected integer 1-10, got '{val}'"),
                })?;
                if !(MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&attempts) {
                    return Err(ConfigError::InvalidValue {
                        key: "SSHSENTRY_MAX_ATTEMPTS".to_string(),
                        message: format!(
                            "attempts must be between {MIN_MAX_ATTEMPTS} and {MAX_MAX_ATTEMPTS}, got {attempts}"
                        ),
                    });
                }
                attempts
            }
            Err(_) => DEFAULT_MAX_ATTEMPTS,
        };

        let retry_delay = Duration::from_secs(parse_secs(
            "SSHSENTRY_RETRY_DELAY_SECS",
            DEFAULT_RETRY_DELAY_SECS,
        )?);

        let key_lookup_cmd = env::var("SSHSENTRY_KEY_LOOKUP_CMD")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let json_log_path = env::var("SSHSENTRY_JSON_LOG")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            bot_token,
            chat_id,
            server_name,
            api_url,
            state_dir,
            cooldown,
            tunnel_cooldown,
            notify_interactive,
            notify_tunnels,
            notify_commands,
            suppress_local_ips,
            local_ranges,
            excluded_ips,
            excluded_users,
            excluded_key_comments,
            silent,
            max_attempts,
            retry_delay,
            key_lookup_cmd,
            json_log_path,
        })
    }
}

/// Parses a non-negative seconds value with a default.
fn parse_secs(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(key) {
        Ok(val) => val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected non-negative integer, got '{val}'"),
        }),
        Err(_) => Ok(default),
    }
}

/// Parses a boolean toggle with a default.
///
/// Accepts `true`/`false`, `1`/`0`, `yes`/`no` (case-insensitive), matching
/// what operators tend to put in shell environment files.
fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected boolean, got '{other}'"),
            }),
        },
        Err(_) => Ok(default),
    }
}

/// Parses a comma-separated list, trimming entries and dropping empties.
fn parse_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|val| {
            val.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Gets the system hostname, falling back to "unknown" if it cannot be determined.
fn get_hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to run tests with isolated environment variables.
    /// Clears all SSHSENTRY_* vars before the test and restores them after.
    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let saved_vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with("SSHSENTRY_"))
            .collect();

        for (key, _) in &saved_vars {
            env::remove_var(key);
        }

        let result = f();

        for (key, value) in saved_vars {
            env::set_var(key, value);
        }

        result
    }

    fn set_required() {
        env::set_var("SSHSENTRY_BOT_TOKEN", "123:abc");
        env::set_var("SSHSENTRY_CHAT_ID", "-100200300");
    }

    #[test]
    #[serial]
    fn missing_bot_token_is_fatal() {
        with_clean_env(|| {
            let result = Config::from_env();
            assert!(result.is_err());

            let err = result.unwrap_err();
            assert!(
                matches!(err, ConfigError::MissingEnvVar(ref s) if s == "SSHSENTRY_BOT_TOKEN")
            );
        });
    }

    #[test]
    #[serial]
    fn missing_chat_id_is_fatal() {
        with_clean_env(|| {
            env::set_var("SSHSENTRY_BOT_TOKEN", "123:abc");
            let result = Config::from_env();
            assert!(result.is_err());

            let err = result.unwrap_err();
            assert!(matches!(err, ConfigError::MissingEnvVar(ref s) if s == "SSHSENTRY_CHAT_ID"));
        });
    }

    #[test]
    #[serial]
    fn minimal_config_uses_defaults() {
        with_clean_env(|| {
            set_required();

            let config = Config::from_env().unwrap();
            assert_eq!(config.bot_token, "123:abc");
            assert_eq!(config.chat_id, "-100200300");
            assert_eq!(config.api_url, DEFAULT_API_URL);
            assert_eq!(config.cooldown, Duration::from_secs(300));
            assert_eq!(config.tunnel_cooldown, Duration::from_secs(60));
            assert!(config.notify_interactive);
            assert!(config.notify_tunnels);
            assert!(config.notify_commands);
            assert!(config.suppress_local_ips);
            assert!(!config.silent);
            assert_eq!(config.max_attempts, 3);
            assert_eq!(config.retry_delay, Duration::from_secs(5));
            assert!(config.excluded_ips.is_empty());
            assert!(config.json_log_path.is_none());
            assert!(config.key_lookup_cmd.is_none());
        });
    }

    #[test]
    #[serial]
    fn exclusion_lists_are_comma_separated() {
        with_clean_env(|| {
            set_required();
            env::set_var("SSHSENTRY_EXCLUDED_IPS", "203.0.113.1, 203.0.113.2,,");
            env::set_var("SSHSENTRY_EXCLUDED_USERS", "deploy");
            env::set_var("SSHSENTRY_EXCLUDED_KEY_COMMENTS", "ci, backup@");

            let config = Config::from_env().unwrap();
            assert_eq!(config.excluded_ips, vec!["203.0.113.1", "203.0.113.2"]);
            assert_eq!(config.excluded_users, vec!["deploy"]);
            assert_eq!(config.excluded_key_comments, vec!["ci", "backup@"]);
        });
    }

    #[test]
    #[serial]
    fn toggles_accept_shell_style_booleans() {
        with_clean_env(|| {
            set_required();
            env::set_var("SSHSENTRY_NOTIFY_TUNNELS", "no");
            env::set_var("SSHSENTRY_SUPPRESS_LOCAL_IPS", "0");
            env::set_var("SSHSENTRY_SILENT", "YES");

            let config = Config::from_env().unwrap();
            assert!(!config.notify_tunnels);
            assert!(!config.suppress_local_ips);
            assert!(config.silent);
        });
    }

    #[test]
    #[serial]
    fn invalid_boolean_is_rejected() {
        with_clean_env(|| {
            set_required();
            env::set_var("SSHSENTRY_NOTIFY_TUNNELS", "maybe");

            let err = Config::from_env().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SSHSENTRY_NOTIFY_TUNNELS")
            );
        });
    }

    #[test]
    #[serial]
    fn invalid_cooldown_is_rejected() {
        with_clean_env(|| {
            set_required();
            env::set_var("SSHSENTRY_COOLDOWN_SECS", "five minutes");

            let err = Config::from_env().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "SSHSENTRY_COOLDOWN_SECS")
            );
        });
    }

    #[test]
    #[serial]
    fn max_attempts_out_of_range_is_rejected() {
        with_clean_env(|| {
            set_required();
            env::set_var("SSHSENTRY_MAX_ATTEMPTS", "0");
            assert!(Config::from_env().is_err());

            env::set_var("SSHSENTRY_MAX_ATTEMPTS", "11");
            assert!(Config::from_env().is_err());

            env::set_var("SSHSENTRY_MAX_ATTEMPTS", "10");
            assert_eq!(Config::from_env().unwrap().max_attempts, 10);
        });
    }

    #[test]
    #[serial]
    fn api_url_trailing_slash_is_stripped() {
        with_clean_env(|| {
            set_required();
            env::set_var("SSHSENTRY_API_URL", "http://localhost:9999/");

            let config = Config::from_env().unwrap();
            assert_eq!(config.api_url, "http://localhost:9999");
        });
    }

    #[test]
    #[serial]
    fn json_log_enabled_by_path() {
        with_clean_env(|| {
            set_required();
            env::set_var("SSHSENTRY_JSON_LOG", "/var/log/sshsentry/events.json");

            let config = Config::from_env().unwrap();
            assert_eq!(
                config.json_log_path,
                Some(PathBuf::from("/var/log/sshsentry/events.json"))
            );
        });
    }
}
