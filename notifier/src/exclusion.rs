//! Exclusion filtering for SSH Sentry.
//!
//! Decides whether a resolved connection should be suppressed from
//! alerting. All rules are independent OR-suppression predicates; the
//! filter short-circuits on the first match but the outcome does not
//! depend on evaluation order.
//!
//! # Rules
//!
//! - Source IP inside a local/private range (when local-IP suppression is
//!   enabled, the default)
//! - Source IP exactly on the excluded-IPs list
//! - Effective display username exactly on the excluded-usernames list
//! - Key comment equal to, or containing, an excluded-comment entry
//!   (fuzzy on purpose, to tolerate suffixes appended by tooling)
//! - Per-session-type notification toggle disabled
//!
//! Local-range membership uses general CIDR matching (v4 and v6) rather
//! than the four hardcoded blocks the original shipped with; the four
//! canonical private ranges remain the compiled-in defaults.

use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::types::{ConnectionEvent, KeyIdentity, SessionType, SuppressReason};

/// The well-known private ranges every deployment treats as local.
pub const DEFAULT_LOCAL_RANGES: &[&str] =
    &["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16", "127.0.0.0/8"];

/// Errors from parsing a CIDR block.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CidrError {
    /// Not in `address/prefix` form.
    #[error("invalid CIDR notation: {0}")]
    Notation(String),

    /// The address part is not a valid IP address.
    #[error("invalid address in CIDR block: {0}")]
    Address(String),

    /// The prefix length exceeds the address width.
    #[error("prefix length {prefix} out of range for {family} address")]
    PrefixLength { prefix: u8, family: &'static str },
}

/// An IPv4 or IPv6 CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Returns `true` if the address falls inside this block.
    ///
    /// Mixed-family comparisons (v4 address against a v6 block and vice
    /// versa) are never a match.
    #[must_use]
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix))
                };
                u32::from(net) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                u128::from(net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, prefix_part) = s
            .split_once('/')
            .ok_or_else(|| CidrError::Notation(s.to_string()))?;

        let network: IpAddr = addr_part
            .parse()
            .map_err(|_| CidrError::Address(addr_part.to_string()))?;

        let prefix: u8 = prefix_part
            .parse()
            .map_err(|_| CidrError::Notation(s.to_string()))?;

        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(CidrError::PrefixLength {
                prefix,
                family: if max == 32 { "IPv4" } else { "IPv6" },
            });
        }

        Ok(Self { network, prefix })
    }
}

/// Pure predicate deciding whether a resolved connection is suppressed.
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    suppress_local_ips: bool,
    local_ranges: Vec<Cidr>,
    excluded_ips: Vec<String>,
    excluded_users: Vec<String>,
    excluded_key_comments: Vec<String>,
    notify_interactive: bool,
    notify_tunnels: bool,
    notify_commands: bool,
}

impl ExclusionFilter {
    /// Builds a filter from configuration.
    ///
    /// The four canonical private ranges are always present; operator
    /// ranges are appended. Unparseable operator ranges are skipped with a
    /// warning rather than failing startup, since the original silently
    /// ignored them.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut local_ranges: Vec<Cidr> = DEFAULT_LOCAL_RANGES
            .iter()
            .map(|r| r.parse().expect("default range is valid CIDR"))
            .collect();

        for range in &config.local_ranges {
            match range.parse::<Cidr>() {
                Ok(cidr) => local_ranges.push(cidr),
                Err(e) => {
                    tracing::warn!(range = %range, error = %e, "Skipping unparseable local range");
                }
            }
        }

        Self {
            suppress_local_ips: config.suppress_local_ips,
            local_ranges,
            excluded_ips: config.excluded_ips.clone(),
            excluded_users: config.excluded_users.clone(),
            excluded_key_comments: config.excluded_key_comments.clone(),
            notify_interactive: config.notify_interactive,
            notify_tunnels: config.notify_tunnels,
            notify_commands: config.notify_commands,
        }
    }

    /// Evaluates the suppression rules against a resolved connection.
    ///
    /// Returns the first matching [`SuppressReason`], or `None` when the
    /// event should proceed to rate limiting.
    #[must_use]
    pub fn evaluate(
        &self,
        event: &ConnectionEvent,
        identity: &KeyIdentity,
    ) -> Option<SuppressReason> {
        if self.suppress_local_ips && self.is_local_ip(&event.source_ip) {
            debug!(source_ip = %event.source_ip, "Suppressed: local source IP");
            return Some(SuppressReason::LocalIp);
        }

        if self.excluded_ips.iter().any(|ip| ip == &event.source_ip) {
            debug!(source_ip = %event.source_ip, "Suppressed: excluded IP");
            return Some(SuppressReason::ExcludedIp);
        }

        let display_user = event.display_user(identity);
        if self.excluded_users.iter().any(|user| user == display_user) {
            debug!(user = %display_user, "Suppressed: excluded username");
            return Some(SuppressReason::ExcludedUser);
        }

        // Comment matching is substring-or-exact in either direction so
        // that an exclusion entry "ci" catches "pipeline@ci-runner" and a
        // full-comment entry still matches a comment with tool-appended
        // suffixes.
        if !identity.comment.is_empty()
            && self.excluded_key_comments.iter().any(|entry| {
                entry == &identity.comment
                    || identity.comment.contains(entry.as_str())
                    || entry.contains(identity.comment.as_str())
            })
        {
            debug!(comment = %identity.comment, "Suppressed: excluded key comment");
            return Some(SuppressReason::ExcludedComment);
        }

        let type_enabled = match event.session_type {
            SessionType::Interactive => self.notify_interactive,
            SessionType::Tunnel => self.notify_tunnels,
            SessionType::Command => self.notify_commands,
            // Unrecognized types are never suppressed by the toggle rule
            SessionType::Unknown => true,
        };
        if !type_enabled {
            debug!(session_type = %event.session_type, "Suppressed: session type disabled");
            return Some(SuppressReason::TypeDisabled);
        }

        None
    }

    /// Returns `true` if the IP parses and falls inside any local range.
    ///
    /// Unparseable source IPs (including the `"unknown"` placeholder) are
    /// treated as non-local so they still alert.
    #[must_use]
    pub fn is_local_ip(&self, source_ip: &str) -> bool {
        let Ok(addr) = source_ip.parse::<IpAddr>() else {
            return false;
        };
        self.local_ranges.iter().any(|range| range.contains(addr))
    }
}
