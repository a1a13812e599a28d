//! Sliding-window rate limiter
//!
//! Attempts are kept as timestamps per `(action, key)`. An action is refused
//! once its window already holds `max_attempts` entries:
//! - failed logins per username and per client IP
//! - registrations per client IP
//! - comments and review submissions per user

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use chrono::{DateTime, Duration, Utc};

use crate::config::{RateLimitRule, SecurityConfig};

/// What is being limited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateAction {
    Login,
    LoginIp,
    Register,
    Comment,
    StorySubmit,
}

impl RateAction {
    pub const ALL: [RateAction; 5] = [
        RateAction::Login,
        RateAction::LoginIp,
        RateAction::Register,
        RateAction::Comment,
        RateAction::StorySubmit,
    ];
}

/// Returned when an action is over its limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Too many attempts, try again in {retry_after_secs} seconds")]
pub struct RateLimited {
    pub retry_after_secs: i64,
}

type AttemptMap = HashMap<(RateAction, String), Vec<DateTime<Utc>>>;

/// Rate limiter shared by all request handlers
pub struct RateLimiter {
    rules: HashMap<RateAction, RateLimitRule>,
    attempts: Arc<RwLock<AttemptMap>>,
}

impl RateLimiter {
    /// Create a limiter with the limits from the security configuration
    pub fn new(config: &SecurityConfig) -> Self {
        let rules = HashMap::from([
            (RateAction::Login, config.login),
            (RateAction::LoginIp, config.login_ip),
            (RateAction::Register, config.register),
            (RateAction::Comment, config.comment),
            (RateAction::StorySubmit, config.story_submit),
        ]);
        Self {
            rules,
            attempts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn rule(&self, action: RateAction) -> RateLimitRule {
        self.rules
            .get(&action)
            .copied()
            .unwrap_or(RateLimitRule::new(usize::MAX, 1))
    }

    fn entry_key(action: RateAction, key: &str) -> (RateAction, String) {
        (action, key.to_lowercase())
    }

    /// Refuse when the window for `(action, key)` is full
    pub async fn check(&self, action: RateAction, key: &str) -> Result<(), RateLimited> {
        let rule = self.rule(action);
        let mut attempts = self.attempts.write().await;
        match attempts.get_mut(&Self::entry_key(action, key)) {
            Some(times) => Self::admit(rule, times, Utc::now()),
            None => Ok(()),
        }
    }

    /// Prunes `times` to the window, then refuses if it is full
    fn admit(rule: RateLimitRule, times: &mut Vec<DateTime<Utc>>, now: DateTime<Utc>) -> Result<(), RateLimited> {
        let cutoff = now - Duration::seconds(rule.window_seconds);
        times.retain(|time| *time > cutoff);
        if times.len() >= rule.max_attempts {
            // The oldest attempt leaves the window first
            let oldest = times.iter().min().copied().unwrap_or(now);
            let retry_after = (oldest + Duration::seconds(rule.window_seconds) - now)
                .num_seconds()
                .max(1);
            return Err(RateLimited {
                retry_after_secs: retry_after,
            });
        }
        Ok(())
    }

    /// Record an attempt for `(action, key)`
    pub async fn record(&self, action: RateAction, key: &str) {
        let mut attempts = self.attempts.write().await;
        attempts
            .entry(Self::entry_key(action, key))
            .or_default()
            .push(Utc::now());
    }

    /// Check and record in one step, under a single lock
    pub async fn hit(&self, action: RateAction, key: &str) -> Result<(), RateLimited> {
        let rule = self.rule(action);
        let now = Utc::now();
        let mut attempts = self.attempts.write().await;
        let times = attempts.entry(Self::entry_key(action, key)).or_default();
        Self::admit(rule, times, now)?;
        times.push(now);
        Ok(())
    }

    /// Forget the attempts for `(action, key)`, e.g. after a successful login
    pub async fn reset(&self, action: RateAction, key: &str) {
        let mut attempts = self.attempts.write().await;
        attempts.remove(&Self::entry_key(action, key));
    }

    /// Attempts left in the current window
    pub async fn remaining(&self, action: RateAction, key: &str) -> usize {
        let rule = self.rule(action);
        let cutoff = Utc::now() - Duration::seconds(rule.window_seconds);
        let attempts = self.attempts.read().await;
        let used = attempts
            .get(&Self::entry_key(action, key))
            .map(|times| times.iter().filter(|time| **time > cutoff).count())
            .unwrap_or(0);
        rule.max_attempts.saturating_sub(used)
    }

    /// Drop expired attempts and empty entries (called periodically)
    pub async fn cleanup(&self) {
        let now = Utc::now();
        let mut attempts = self.attempts.write().await;
        let before = attempts.len();
        attempts.retain(|(action, _), times| {
            let window = self
                .rules
                .get(action)
                .map(|rule| rule.window_seconds)
                .unwrap_or(0);
            let cutoff = now - Duration::seconds(window);
            times.retain(|time| *time > cutoff);
            !times.is_empty()
        });
        let removed = before - attempts.len();
        if removed > 0 {
            tracing::debug!("Rate limiter cleanup removed {} entries", removed);
        }
    }

    /// Number of tracked `(action, key)` entries
    pub async fn tracked_keys(&self) -> usize {
        self.attempts.read().await.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(&SecurityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limiter_with(rule: RateLimitRule) -> RateLimiter {
        let config = SecurityConfig {
            login: rule,
            login_ip: rule,
            register: rule,
            comment: rule,
            story_submit: rule,
            ..SecurityConfig::default()
        };
        RateLimiter::new(&config)
    }

    #[tokio::test]
    async fn test_login_limit() {
        let limiter = RateLimiter::default();

        for _ in 0..5 {
            assert!(limiter.check(RateAction::Login, "ana").await.is_ok());
            limiter.record(RateAction::Login, "ana").await;
        }

        let err = limiter.check(RateAction::Login, "ana").await.unwrap_err();
        assert!(err.retry_after_secs > 0);
        assert!(err.retry_after_secs <= 15 * 60);

        limiter.reset(RateAction::Login, "ana").await;
        assert!(limiter.check(RateAction::Login, "ana").await.is_ok());
    }

    #[tokio::test]
    async fn test_actions_are_independent() {
        let limiter = limiter_with(RateLimitRule::new(1, 60));
        limiter.hit(RateAction::Comment, "7").await.unwrap();
        assert!(limiter.hit(RateAction::Comment, "7").await.is_err());
        assert!(limiter.hit(RateAction::StorySubmit, "7").await.is_ok());
        assert!(limiter.hit(RateAction::Comment, "8").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_hits_share_one_window() {
        let limiter = Arc::new(limiter_with(RateLimitRule::new(1, 60)));
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.hit(RateAction::Register, "10.0.0.1").await.is_ok() })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(limiter.remaining(RateAction::Register, "10.0.0.1").await, 0);
    }

    #[tokio::test]
    async fn test_keys_are_case_insensitive() {
        let limiter = limiter_with(RateLimitRule::new(3, 60));
        limiter.record(RateAction::Login, "Ana").await;
        limiter.record(RateAction::Login, "ANA").await;
        assert_eq!(limiter.remaining(RateAction::Login, "ana").await, 1);
        limiter.record(RateAction::Login, "ana").await;
        assert!(limiter.check(RateAction::Login, "aNa").await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_drops_expired_windows() {
        let limiter = limiter_with(RateLimitRule::new(3, 0));
        limiter.record(RateAction::Register, "10.0.0.1").await;
        assert_eq!(limiter.tracked_keys().await, 1);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        limiter.cleanup().await;
        assert_eq!(limiter.tracked_keys().await, 0);
    }

    proptest! {
        /// `hit` never admits more than `max_attempts` inside one window
        #[test]
        fn property_never_exceeds_limit(max in 1usize..8, tries in 0usize..20) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let admitted = rt.block_on(async {
                let limiter = limiter_with(RateLimitRule::new(max, 3600));
                let mut admitted = 0;
                for _ in 0..tries {
                    if limiter.hit(RateAction::Comment, "user").await.is_ok() {
                        admitted += 1;
                    }
                }
                admitted
            });
            prop_assert_eq!(admitted, tries.min(max));
        }
    }
}
