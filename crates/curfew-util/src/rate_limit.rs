//! Rate limiting utilities

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::to_delta;

/// Simple token-bucket rate limiter, keyed per caller
#[derive(Debug)]
pub struct RateLimiter<K> {
    /// Maximum tokens (requests) per bucket
    max_tokens: u32,
    /// How often tokens are replenished
    refill_interval: Duration,
    /// Per-key state
    buckets: HashMap<K, Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl<K: Hash + Eq + Clone> RateLimiter<K> {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `max_requests` - Maximum requests allowed per interval
    /// * `interval` - Time interval for the limit
    pub fn new(max_requests: u32, interval: Duration) -> Self {
        Self {
            max_tokens: max_requests,
            refill_interval: interval,
            buckets: HashMap::new(),
        }
    }

    /// Check if a request should be allowed for the given key
    ///
    /// Returns `true` if allowed, `false` if rate limited
    pub fn check(&mut self, key: &K) -> bool {
        let now = Instant::now();

        let bucket = self.buckets.entry(key.clone()).or_insert(Bucket {
            tokens: self.max_tokens,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill);
        if elapsed >= self.refill_interval {
            let intervals = (elapsed.as_millis() / self.refill_interval.as_millis().max(1)) as u32;
            bucket.tokens = bucket
                .tokens
                .saturating_add(intervals.saturating_mul(self.max_tokens))
                .min(self.max_tokens);
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Remove a key's rate limit state
    pub fn remove(&mut self, key: &K) {
        self.buckets.remove(key);
    }
}

/// At most one event per key per cooldown, measured in wall-clock time.
///
/// Used for the per-subject notification throttle: the caller supplies the
/// instant so decisions are reproducible in tests.
#[derive(Debug)]
pub struct CooldownTracker<K> {
    cooldown: Duration,
    last: HashMap<K, DateTime<Tz>>,
}

impl<K: Hash + Eq + Clone> CooldownTracker<K> {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: HashMap::new(),
        }
    }

    /// Record an event for `key` at `now` if the cooldown has elapsed.
    ///
    /// Returns `true` if the event is allowed (and recorded).
    pub fn try_acquire(&mut self, key: &K, now: DateTime<Tz>) -> bool {
        if let Some(last) = self.last.get(key)
            && now < *last + to_delta(self.cooldown)
        {
            return false;
        }
        self.last.insert(key.clone(), now);
        true
    }

    pub fn forget(&mut self, key: &K) {
        self.last.remove(key);
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

/// Daily call budget that resets at local midnight in the tracker's zone.
#[derive(Debug)]
pub struct DailyQuota {
    limit: u32,
    used: u32,
    day: Option<NaiveDate>,
}

impl DailyQuota {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: 0,
            day: None,
        }
    }

    /// Consume one unit for the local day containing `now`.
    ///
    /// Returns `false` once the day's budget is spent.
    pub fn try_consume(&mut self, now: &DateTime<Tz>) -> bool {
        let today = now.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.used = 0;
        }

        if self.used >= self.limit {
            return false;
        }
        self.used += 1;
        true
    }
}
