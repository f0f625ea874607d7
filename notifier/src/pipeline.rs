//! Pipeline orchestration for SSH Sentry.
//!
//! Wires the stages together in order: exclusion filter → rate limiter →
//! notifier → event logger. Each stage can short-circuit with a
//! [`SuppressReason`] without invoking the next; the event logger runs for
//! every evaluated connection regardless of outcome.
//!
//! Stage failure policy (spec'd behavior, not incidental):
//!
//! - Rate-limit store errors degrade to "allow" so a broken state
//!   directory cannot silence alerts.
//! - Delivery failure after retries is reported as an outcome, not an
//!   error; the pipeline still completes and logs.
//! - Event-log failures are swallowed with a warning.

use tracing::{error, info, warn};

use crate::config::Config;
use crate::event_log::EventLogger;
use crate::exclusion::ExclusionFilter;
use crate::rate_limit::{composite_key, RateLimiter, RateStore};
use crate::telegram::{format_message, TelegramNotifier};
use crate::types::{ConnectionEvent, ConnectionRecord, KeyIdentity, Outcome, SessionType};

/// The assembled notification pipeline.
pub struct Pipeline<S: RateStore> {
    server_name: String,
    silent: bool,
    cooldown: std::time::Duration,
    tunnel_cooldown: std::time::Duration,
    filter: ExclusionFilter,
    limiter: RateLimiter<S>,
    notifier: TelegramNotifier,
    logger: Option<EventLogger>,
}

impl<S: RateStore> Pipeline<S> {
    /// Assembles a pipeline from its stages.
    #[must_use]
    pub fn new(
        config: &Config,
        filter: ExclusionFilter,
        limiter: RateLimiter<S>,
        notifier: TelegramNotifier,
        logger: Option<EventLogger>,
    ) -> Self {
        Self {
            server_name: config.server_name.clone(),
            silent: config.silent,
            cooldown: config.cooldown,
            tunnel_cooldown: config.tunnel_cooldown,
            filter,
            limiter,
            notifier,
            logger,
        }
    }

    /// Evaluates one resolved connection event to completion.
    ///
    /// Always returns an [`Outcome`]; the only failures that surface to
    /// the caller are already folded into [`Outcome::DeliveryFailed`].
    pub async fn run(&mut self, event: &ConnectionEvent, identity: &KeyIdentity) -> Outcome {
        let outcome = self.evaluate(event, identity).await;
        self.log(event, identity, outcome);
        outcome
    }

    async fn evaluate(&mut self, event: &ConnectionEvent, identity: &KeyIdentity) -> Outcome {
        if let Some(reason) = self.filter.evaluate(event, identity) {
            info!(?reason, source_ip = %event.source_ip, "Connection suppressed by exclusion filter");
            return Outcome::Suppressed(reason);
        }

        let key = composite_key(event, identity);
        let cooldown = match event.session_type {
            SessionType::Tunnel => self.tunnel_cooldown,
            _ => self.cooldown,
        };

        // A broken rate-limit store must not silence alerts: fail open.
        let allowed = match self.limiter.allow(&key, cooldown) {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(error = %e, key = %key, "Rate-limit store unavailable, allowing notification");
                true
            }
        };
        if !allowed {
            info!(key = %key, cooldown_secs = cooldown.as_secs(), "Notification rate limited");
            return Outcome::Suppressed(crate::types::SuppressReason::RateLimited);
        }

        let message = format_message(&self.server_name, event, identity);
        match self.notifier.send(&message, self.silent).await {
            Ok(()) => {
                info!(
                    source_ip = %event.source_ip,
                    user = %event.display_user(identity),
                    "Notification delivered"
                );
                Outcome::Delivered
            }
            Err(e) => {
                error!(error = %e, "Notification delivery failed after all retries");
                Outcome::DeliveryFailed
            }
        }
    }

    fn log(&self, event: &ConnectionEvent, identity: &KeyIdentity, outcome: Outcome) {
        let Some(logger) = &self.logger else {
            return;
        };

        let record = ConnectionRecord::new(&self.server_name, event, identity, outcome, self.silent);
        if let Err(e) = logger.log_event(&record) {
            warn!(error = %e, "Failed to append event record");
        }
    }
}
