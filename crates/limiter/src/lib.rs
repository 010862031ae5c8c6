//! Per-sender admission control.
//!
//! Every inbound message passes through [`RateLimiter::check_message`] before
//! it is relayed. Senders are tracked per network-qualified identity with a
//! sliding window of recent message timestamps; flooding or spam escalates a
//! warning count, and enough warnings earn a timed block. While a block is
//! active every message from that identity is rejected immediately, without
//! re-evaluating the window.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use {dashmap::DashMap, serde::Serialize, tracing::debug};

mod spam;

pub use spam::looks_like_spam;

const CLEANUP_EVERY_CHECKS: u64 = 512;

/// Admission-control thresholds.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum admitted messages per identity within `window`.
    pub max_messages: usize,
    /// Sliding window length.
    pub window: Duration,
    /// Violations beyond this count trigger a block.
    pub warning_threshold: u32,
    /// How long a block lasts.
    pub block_duration: Duration,
    /// Whether the per-message spam heuristic runs at all.
    pub spam_detection: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: 10,
            window: Duration::from_secs(60),
            warning_threshold: 3,
            block_duration: Duration::from_secs(300),
            spam_detection: true,
        }
    }
}

/// Why a message was not admitted.
///
/// The three escalation tracks are distinct variants so callers can report
/// and count them separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Sliding-window rate violation; the sender was warned.
    RateWarning { warnings: u32, threshold: u32 },
    /// The per-message spam heuristic fired; the sender was warned.
    Spam { warnings: u32, threshold: u32 },
    /// The identity is blocked. `just_issued` is true only on the check
    /// that crossed the warning threshold.
    Blocked {
        just_issued: bool,
        remaining: Duration,
    },
}

impl Rejection {
    /// Whether the sender should receive a notice for this rejection.
    ///
    /// Escalations notify once; repeat rejections while already blocked
    /// stay silent.
    #[must_use]
    pub fn should_notify(&self) -> bool {
        !matches!(
            self,
            Self::Blocked {
                just_issued: false,
                ..
            }
        )
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateWarning {
                warnings,
                threshold,
            } => write!(
                f,
                "rate limit warning ({warnings}/{threshold}): sending messages too quickly"
            ),
            Self::Spam {
                warnings,
                threshold,
            } => write!(
                f,
                "spam detected ({warnings}/{threshold}): message looks like spam"
            ),
            Self::Blocked { remaining, .. } => {
                write!(f, "blocked for {}s", remaining.as_secs().max(1))
            },
        }
    }
}

/// Activity tracked per identity.
#[derive(Debug)]
struct UserActivity {
    display_name: String,
    /// Timestamps of admitted messages, oldest first, pruned to the window.
    recent: VecDeque<Instant>,
    warning_count: u32,
    blocked_until: Option<Instant>,
    last_seen: Instant,
}

impl UserActivity {
    fn new(display_name: &str, now: Instant) -> Self {
        Self {
            display_name: display_name.to_owned(),
            recent: VecDeque::new(),
            warning_count: 0,
            blocked_until: None,
            last_seen: now,
        }
    }
}

/// Read-only operational snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub tracked_identities: usize,
    pub blocked_identities: usize,
    pub total_warnings: u64,
}

/// A currently blocked identity.
#[derive(Debug, Clone, Serialize)]
pub struct BlockedUser {
    pub identity: String,
    pub display_name: String,
    pub remaining_secs: u64,
}

/// Sliding-window rate limiter with warning/block escalation.
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: DashMap<String, UserActivity>,
    checks_seen: AtomicU64,
    total_warnings: AtomicU64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            checks_seen: AtomicU64::new(0),
            total_warnings: AtomicU64::new(0),
        }
    }

    /// Check whether a message from `identity` may be relayed.
    ///
    /// `None` admits the message; `Some(rejection)` gives the reason it was
    /// refused. `identity` must be network-qualified so the same display
    /// name on both networks is tracked separately.
    pub fn check_message(
        &self,
        identity: &str,
        display_name: &str,
        text: &str,
    ) -> Option<Rejection> {
        self.check_at(identity, display_name, text, Instant::now())
    }

    fn check_at(
        &self,
        identity: &str,
        display_name: &str,
        text: &str,
        now: Instant,
    ) -> Option<Rejection> {
        let decision = {
            let mut entry = self
                .entries
                .entry(identity.to_owned())
                .or_insert_with(|| UserActivity::new(display_name, now));
            let activity = entry.value_mut();
            activity.last_seen = now;

            self.evaluate(activity, text, now)
        };

        if let Some(rejection) = &decision {
            debug!(identity, display_name, reason = %rejection, "message rejected");
        }
        self.cleanup_if_needed(now);
        decision
    }

    fn evaluate(&self, activity: &mut UserActivity, text: &str, now: Instant) -> Option<Rejection> {
        // An active block short-circuits everything else.
        if let Some(until) = activity.blocked_until {
            if now < until {
                return Some(Rejection::Blocked {
                    just_issued: false,
                    remaining: until - now,
                });
            }
            // Block expired; window-based evaluation resumes normally.
            activity.blocked_until = None;
            activity.recent.clear();
        }

        if self.config.spam_detection && looks_like_spam(text) {
            return Some(self.warn(activity, now, true));
        }

        while let Some(front) = activity.recent.front() {
            if now.duration_since(*front) >= self.config.window {
                activity.recent.pop_front();
            } else {
                break;
            }
        }

        if activity.recent.len() >= self.config.max_messages {
            return Some(self.warn(activity, now, false));
        }

        activity.recent.push_back(now);
        None
    }

    /// Record a violation, blocking the identity once the warning count
    /// passes the threshold.
    fn warn(&self, activity: &mut UserActivity, now: Instant, spam: bool) -> Rejection {
        activity.warning_count += 1;
        self.total_warnings.fetch_add(1, Ordering::Relaxed);

        if activity.warning_count > self.config.warning_threshold {
            activity.blocked_until = Some(now + self.config.block_duration);
            return Rejection::Blocked {
                just_issued: true,
                remaining: self.config.block_duration,
            };
        }

        if spam {
            Rejection::Spam {
                warnings: activity.warning_count,
                threshold: self.config.warning_threshold,
            }
        } else {
            Rejection::RateWarning {
                warnings: activity.warning_count,
                threshold: self.config.warning_threshold,
            }
        }
    }

    /// Read-only operational snapshot.
    #[must_use]
    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let blocked = self
            .entries
            .iter()
            .filter(|e| e.blocked_until.is_some_and(|until| until > now))
            .count();
        RateLimiterStats {
            tracked_identities: self.entries.len(),
            blocked_identities: blocked,
            total_warnings: self.total_warnings.load(Ordering::Relaxed),
        }
    }

    /// Currently blocked identities with their remaining block time.
    #[must_use]
    pub fn blocked_users(&self) -> Vec<BlockedUser> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter_map(|e| {
                let until = e.blocked_until?;
                if until <= now {
                    return None;
                }
                Some(BlockedUser {
                    identity: e.key().clone(),
                    display_name: e.display_name.clone(),
                    remaining_secs: (until - now).as_secs(),
                })
            })
            .collect()
    }

    /// Clear an active block. Returns `false` for unknown identities.
    pub fn unblock(&self, identity: &str) -> bool {
        match self.entries.get_mut(identity) {
            Some(mut entry) => {
                entry.blocked_until = None;
                entry.recent.clear();
                true
            },
            None => false,
        }
    }

    /// Reset the warning count. Returns `false` for unknown identities.
    pub fn clear_warnings(&self, identity: &str) -> bool {
        match self.entries.get_mut(identity) {
            Some(mut entry) => {
                entry.warning_count = 0;
                true
            },
            None => false,
        }
    }

    /// Drop idle, warning-free entries every few hundred checks. Blocked
    /// identities are retained until their block expires regardless of
    /// idleness.
    fn cleanup_if_needed(&self, now: Instant) {
        let seen = self.checks_seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % CLEANUP_EVERY_CHECKS != 0 {
            return;
        }
        let stale_after = self.config.window.saturating_mul(3);
        self.entries.retain(|_, activity| {
            if activity.blocked_until.is_some_and(|until| until > now) {
                return true;
            }
            if activity.warning_count > 0 {
                return true;
            }
            now.duration_since(activity.last_seen) <= stale_after
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: usize, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_messages: max,
            window: Duration::from_secs(window_secs),
            warning_threshold: 2,
            block_duration: Duration::from_secs(120),
            spam_detection: false,
        })
    }

    #[test]
    fn admits_up_to_max_then_rejects_with_rate_reason() {
        let limiter = limiter(5, 60);
        let now = Instant::now();

        for i in 0..5 {
            assert_eq!(
                limiter.check_at("irc:alice", "alice", &format!("msg {i}"), now),
                None,
                "message {} should be admitted",
                i + 1
            );
        }

        let rejection = limiter
            .check_at("irc:alice", "alice", "msg 6", now)
            .expect("sixth message within the window must be rejected");
        assert!(matches!(rejection, Rejection::RateWarning { .. }));
        assert!(rejection.to_string().contains("rate limit warning"));
    }

    #[test]
    fn window_slides_and_old_messages_expire() {
        let limiter = limiter(2, 60);
        let now = Instant::now();

        assert_eq!(limiter.check_at("irc:bob", "bob", "a", now), None);
        assert_eq!(limiter.check_at("irc:bob", "bob", "b", now), None);
        assert!(limiter.check_at("irc:bob", "bob", "c", now).is_some());

        // Past the window the same sender is admitted again.
        let later = now + Duration::from_secs(61);
        assert_eq!(limiter.check_at("irc:bob", "bob", "d", later), None);
    }

    #[test]
    fn repeated_violations_escalate_to_block() {
        let limiter = limiter(1, 60);
        let now = Instant::now();

        assert_eq!(limiter.check_at("irc:eve", "eve", "1", now), None);
        // Violations 1 and 2 warn, violation 3 crosses the threshold.
        assert!(matches!(
            limiter.check_at("irc:eve", "eve", "2", now),
            Some(Rejection::RateWarning { warnings: 1, .. })
        ));
        assert!(matches!(
            limiter.check_at("irc:eve", "eve", "3", now),
            Some(Rejection::RateWarning { warnings: 2, .. })
        ));
        let blocked = limiter.check_at("irc:eve", "eve", "4", now);
        assert!(matches!(
            blocked,
            Some(Rejection::Blocked {
                just_issued: true,
                ..
            })
        ));
    }

    #[test]
    fn blocked_identity_is_rejected_immediately_until_expiry() {
        let limiter = limiter(1, 10);
        let now = Instant::now();

        assert_eq!(limiter.check_at("irc:eve", "eve", "1", now), None);
        for _ in 0..3 {
            limiter.check_at("irc:eve", "eve", "flood", now);
        }
        // Well past the rate window but inside the block: still rejected,
        // and no further notification.
        let during_block = now + Duration::from_secs(30);
        let rejection = limiter
            .check_at("irc:eve", "eve", "hello", during_block)
            .expect("blocked identity must be rejected");
        assert!(matches!(
            rejection,
            Rejection::Blocked {
                just_issued: false,
                ..
            }
        ));
        assert!(!rejection.should_notify());

        // After the block expires, window evaluation resumes normally.
        let after_block = now + Duration::from_secs(121);
        assert_eq!(
            limiter.check_at("irc:eve", "eve", "hello again", after_block),
            None
        );
    }

    #[test]
    fn identities_are_tracked_per_network() {
        let limiter = limiter(1, 60);
        let now = Instant::now();

        assert_eq!(limiter.check_at("irc:alice", "alice", "x", now), None);
        // Same display name on the other network has its own window.
        assert_eq!(limiter.check_at("discord:alice", "alice", "x", now), None);
        assert!(limiter.check_at("irc:alice", "alice", "y", now).is_some());
    }

    #[test]
    fn spam_heuristic_rejects_independent_of_frequency() {
        let limiter = RateLimiter::new(RateLimitConfig {
            spam_detection: true,
            ..RateLimitConfig::default()
        });
        let now = Instant::now();

        let rejection = limiter
            .check_at("irc:mallory", "mallory", &"a".repeat(80), now)
            .expect("repeated-character message must be rejected");
        assert!(matches!(rejection, Rejection::Spam { .. }));
        assert!(rejection.to_string().contains("spam"));
    }

    #[test]
    fn unblock_and_clear_warnings_return_false_for_unknown() {
        let limiter = limiter(1, 60);
        assert!(!limiter.unblock("irc:nobody"));
        assert!(!limiter.clear_warnings("irc:nobody"));

        let now = Instant::now();
        limiter.check_at("irc:eve", "eve", "1", now);
        for _ in 0..3 {
            limiter.check_at("irc:eve", "eve", "flood", now);
        }
        assert_eq!(limiter.blocked_users().len(), 1);
        assert!(limiter.unblock("irc:eve"));
        assert!(limiter.blocked_users().is_empty());
        assert!(limiter.clear_warnings("irc:eve"));
    }

    #[test]
    fn stats_reflect_activity() {
        let limiter = limiter(1, 60);
        let now = Instant::now();
        limiter.check_at("irc:a", "a", "1", now);
        limiter.check_at("irc:b", "b", "1", now);
        limiter.check_at("irc:b", "b", "2", now);

        let stats = limiter.stats();
        assert_eq!(stats.tracked_identities, 2);
        assert_eq!(stats.total_warnings, 1);
    }
}
