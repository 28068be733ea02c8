//! Token-bucket rate limiting.
//!
//! Buckets live in a sharded map keyed by client key. A lookup holds the
//! shard only long enough to clone the bucket handle; the refill-and-take
//! step then runs under that bucket's own lock, so distinct clients never
//! contend.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rampart_config::RateLimitConfig;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Longest retry hint handed out, whatever the refill rate.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Settings for a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitSettings {
    /// Bucket capacity (burst).
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
    /// Buckets untouched for this long are evicted.
    pub idle_ttl: Duration,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

impl From<&RateLimitConfig> for RateLimitSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            capacity: config.burst,
            refill_per_sec: config.requests_per_second,
            idle_ttl: config.bucket_idle_ttl(),
            sweep_interval: config.sweep_interval(),
        }
    }
}

impl RateLimitSettings {
    /// Set the bucket capacity.
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the refill rate in tokens per second.
    pub fn with_refill_per_sec(mut self, rate: f64) -> Self {
        self.refill_per_sec = rate;
        self
    }

    /// Set the idle TTL.
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// A token was taken.
    Admitted {
        /// Bucket capacity.
        limit: u32,
        /// Whole tokens left after this request.
        remaining: u32,
    },
    /// The bucket was empty.
    Rejected {
        /// Bucket capacity.
        limit: u32,
        /// Time until one token is available; `None` when the bucket never refills.
        retry_after: Option<Duration>,
    },
}

impl Decision {
    /// Whether the request was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    /// Bucket capacity.
    pub fn limit(&self) -> u32 {
        match *self {
            Self::Admitted { limit, .. } | Self::Rejected { limit, .. } => limit,
        }
    }

    /// Whole tokens left; zero when rejected.
    pub fn remaining(&self) -> u32 {
        match *self {
            Self::Admitted { remaining, .. } => remaining,
            Self::Rejected { .. } => 0,
        }
    }
}

/// A single client's token bucket.
///
/// `tokens` always stays within `[0, capacity]` and `last_refill` never
/// moves backwards.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(capacity: u32, refill_per_sec: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(0.0),
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    /// Refills for the time elapsed since the last call, then tries to take one token.
    pub fn try_acquire(&mut self, now: Instant) -> Decision {
        let capacity = f64::from(self.capacity);
        if now > self.last_refill {
            let elapsed = now.duration_since(self.last_refill).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(capacity);
            self.last_refill = now;
        }

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::Admitted {
                limit: self.capacity,
                remaining: whole_tokens(self.tokens),
            }
        } else {
            let retry_after = (self.refill_per_sec > 0.0).then(|| {
                Duration::try_from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
                    .map_or(MAX_RETRY_AFTER, |wait| wait.min(MAX_RETRY_AFTER))
            });
            Decision::Rejected {
                limit: self.capacity,
                retry_after,
            }
        }
    }

    /// Current token count.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// When the bucket was last refilled, which is also when it was last used.
    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_tokens(tokens: f64) -> u32 {
    tokens.floor().max(0.0) as u32
}

/// Keyed store of token buckets.
#[derive(Debug)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
}

impl RateLimiter {
    /// Creates an empty limiter.
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            buckets: DashMap::new(),
        }
    }

    /// The limiter's settings.
    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Checks `key` against the default refill rate.
    pub fn check(&self, key: &str) -> Decision {
        self.check_with_rate(key, None)
    }

    /// Checks `key`, creating its bucket on first use.
    ///
    /// `refill_override` replaces the refill rate for a newly created bucket;
    /// callers key override buckets separately so rates never mix.
    pub fn check_with_rate(&self, key: &str, refill_override: Option<f64>) -> Decision {
        let now = Instant::now();

        let bucket = match self.buckets.get(key) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                let rate = refill_override.unwrap_or(self.settings.refill_per_sec);
                let entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
                    Arc::new(Mutex::new(TokenBucket::new(self.settings.capacity, rate, now)))
                });
                Arc::clone(entry.value())
            }
        };

        let decision = bucket.lock().try_acquire(now);
        decision
    }

    /// Removes buckets idle for longer than the TTL; returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let ttl = self.settings.idle_ttl;
        let before = self.buckets.len();

        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.lock().last_refill()) < ttl);

        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "swept idle rate-limit buckets");
        }
        removed
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no bucket exists.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Spawns the background sweeper.
    ///
    /// The task exits on its own once the limiter is dropped; abort the
    /// handle to stop it earlier.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        let period = self.settings.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                match limiter.upgrade() {
                    Some(limiter) => {
                        limiter.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn settings(capacity: u32, rate: f64) -> RateLimitSettings {
        RateLimitSettings::default()
            .with_capacity(capacity)
            .with_refill_per_sec(rate)
            .with_idle_ttl(Duration::from_secs(60))
            .with_sweep_interval(Duration::from_secs(10))
    }

    #[test]
    fn test_settings_from_config() {
        let settings = RateLimitSettings::from(&RateLimitConfig::default());
        assert_eq!(settings.capacity, 10);
        assert!((settings.refill_per_sec - 1.0).abs() < f64::EPSILON);
        assert_eq!(settings.idle_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_bucket_starts_full() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(3, 0.0, now);
        assert_eq!(
            bucket.try_acquire(now),
            Decision::Admitted {
                limit: 3,
                remaining: 2
            }
        );
    }

    #[test]
    fn test_tiny_refill_rate_caps_retry_hint() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(1, 1e-300, now);
        assert!(bucket.try_acquire(now).is_admitted());
        assert_eq!(
            bucket.try_acquire(now),
            Decision::Rejected {
                limit: 1,
                retry_after: Some(MAX_RETRY_AFTER)
            }
        );

        let mut slow = TokenBucket::new(1, 1e-6, now);
        assert!(slow.try_acquire(now).is_admitted());
        let Decision::Rejected { retry_after, .. } = slow.try_acquire(now) else {
            panic!("bucket should be empty");
        };
        assert_eq!(retry_after, Some(MAX_RETRY_AFTER));
    }

    #[test]
    fn test_bucket_without_refill_reports_no_retry() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(1, 0.0, now);
        assert!(bucket.try_acquire(now).is_admitted());
        assert_eq!(
            bucket.try_acquire(now),
            Decision::Rejected {
                limit: 1,
                retry_after: None
            }
        );
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2, 2.0, start);
        assert!(bucket.try_acquire(start).is_admitted());
        assert!(bucket.try_acquire(start).is_admitted());

        match bucket.try_acquire(start) {
            Decision::Rejected { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_millis(500)));
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        let later = start + Duration::from_millis(500);
        assert!(bucket.try_acquire(later).is_admitted());
        assert_eq!(bucket.last_refill(), later);
    }

    #[test]
    fn test_bucket_never_exceeds_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(5, 100.0, start);
        let _ = bucket.try_acquire(start + Duration::from_secs(3600));
        assert!(bucket.tokens() <= 5.0);
        assert!((bucket.tokens() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bucket_ignores_earlier_instant() {
        let start = Instant::now();
        let later = start + Duration::from_secs(1);
        let mut bucket = TokenBucket::new(1, 1.0, later);
        let _ = bucket.try_acquire(start);
        assert_eq!(bucket.last_refill(), later);
    }

    #[test]
    fn test_limiter_keys_are_independent() {
        let limiter = RateLimiter::new(settings(1, 0.0));
        assert!(limiter.check("1.2.3.4").is_admitted());
        assert!(!limiter.check("1.2.3.4").is_admitted());
        assert!(limiter.check("5.6.7.8").is_admitted());
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_override_rate_applies_to_new_bucket() {
        let limiter = RateLimiter::new(settings(1, 0.0));
        assert!(limiter.check_with_rate("ip|/fast", Some(1000.0)).is_admitted());
        match limiter.check_with_rate("ip|/fast", Some(1000.0)) {
            Decision::Rejected { retry_after, .. } => assert!(retry_after.is_some()),
            Decision::Admitted { .. } => {}
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_idle_buckets() {
        let limiter = RateLimiter::new(settings(5, 1.0));
        limiter.check("idle");
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check("active");
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.len(), 1);
        assert!(limiter.buckets.contains_key("active"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs_on_interval() {
        let limiter = Arc::new(RateLimiter::new(settings(5, 1.0)));
        limiter.check("client");
        let handle = limiter.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert!(limiter.is_empty());

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_exits_when_limiter_dropped() {
        let limiter = Arc::new(RateLimiter::new(settings(5, 1.0)));
        let handle = limiter.spawn_sweeper();
        drop(limiter);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(handle.is_finished());
    }

    proptest! {
        #[test]
        fn prop_burst_admits_exactly_capacity(capacity in 1u32..64, extra in 0u32..64, rate in 0.0f64..50.0) {
            let now = Instant::now();
            let mut bucket = TokenBucket::new(capacity, rate, now);

            let admitted = (0..capacity + extra)
                .filter(|_| bucket.try_acquire(now).is_admitted())
                .count();

            prop_assert_eq!(admitted, capacity as usize);
        }

        #[test]
        fn prop_tokens_stay_in_range(capacity in 1u32..16, rate in 0.0f64..10.0, steps in proptest::collection::vec(0u64..2000, 1..40)) {
            let start = Instant::now();
            let mut bucket = TokenBucket::new(capacity, rate, start);
            let mut at = start;
            for step in steps {
                at += Duration::from_millis(step);
                let _ = bucket.try_acquire(at);
                prop_assert!(bucket.tokens() >= 0.0);
                prop_assert!(bucket.tokens() <= f64::from(capacity));
            }
        }
    }
}
