//! SSH Sentry - SSH login notification pipeline.
//!
//! This crate evaluates one SSH connection event per invocation and
//! decides whether to alert an administrator via Telegram, identifying the
//! connecting key, source IP, and session type while avoiding duplicate
//! and noisy alerts.
//!
//! # Pipeline
//!
//! Resolver → Exclusion Filter → Rate Limiter → Notifier → Event Logger.
//! Each stage can short-circuit (suppress) without invoking the next;
//! resolution never fails, it degrades to `"unknown"` fields.
//!
//! # Modules
//!
//! - [`types`]: Connection events, key identities, outcomes
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for notifier operations
//! - [`resolver`]: Session signals and pluggable key lookup
//! - [`exclusion`]: IP/user/comment exclusion and CIDR matching
//! - [`rate_limit`]: Persistent per-key cooldown throttle
//! - [`telegram`]: Alert formatting and delivery with bounded retries
//! - [`event_log`]: Append-only JSON event log
//! - [`lock`]: Non-blocking whole-pipeline advisory lock
//! - [`pipeline`]: Stage orchestration

pub mod config;
pub mod error;
pub mod event_log;
pub mod exclusion;
pub mod lock;
pub mod pipeline;
pub mod rate_limit;
pub mod resolver;
pub mod telegram;
pub mod types;

pub use config::{Config, ConfigError};
pub use error::{NotifierError, Result};
pub use event_log::EventLogger;
pub use exclusion::{Cidr, CidrError, ExclusionFilter, DEFAULT_LOCAL_RANGES};
pub use lock::{LockAttempt, PipelineLock};
pub use pipeline::Pipeline;
pub use rate_limit::{
    composite_key, sanitize_key, FileRateStore, MemoryRateStore, RateLimiter, RateStore,
};
pub use resolver::{
    EnvKeyLookup, HelperKeyLookup, KeyLookup, LookupError, Resolver, SessionSignals,
};
pub use telegram::{format_message, DeliveryError, NotifierConfig, TelegramNotifier};
pub use types::{
    ConnectionEvent, ConnectionRecord, KeyIdentity, Outcome, SessionType, SuppressReason,
};
