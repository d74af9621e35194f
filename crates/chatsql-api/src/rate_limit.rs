//! Per-user token-bucket rate limiting, grounded on the teacher's
//! `TokenBucket`/`RateLimitManager` (`brain-api::rate_limit`), trimmed to
//! the single axis this service actually needs: requests per user per
//! minute, scaled by `UserGroup` rather than a separate role table.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use chatsql_types::model::UserGroup;

fn requests_per_minute(group: UserGroup) -> f64 {
    match group {
        UserGroup::Admin => 1000.0,
        UserGroup::Expert => 300.0,
        UserGroup::User => 120.0,
        UserGroup::Guest => 30.0,
    }
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_second: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_per_second,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `user_id` may proceed. Buckets are created
    /// lazily, sized from `group`'s default rate.
    pub fn allow(&self, user_id: &str, group: UserGroup) -> bool {
        let limit = requests_per_minute(group);
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(user_id.to_string())
            .or_insert_with(|| TokenBucket::new(limit, limit / 60.0));
        bucket.try_consume()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_is_throttled_after_burning_its_small_bucket() {
        let limiter = RateLimiter::new();
        let mut allowed = 0;
        for _ in 0..40 {
            if limiter.allow("guest-1", UserGroup::Guest) {
                allowed += 1;
            }
        }
        assert!(allowed <= 30);
    }

    #[test]
    fn buckets_are_independent_per_user() {
        let limiter = RateLimiter::new();
        for _ in 0..30 {
            assert!(limiter.allow("guest-a", UserGroup::Guest));
        }
        assert!(limiter.allow("guest-b", UserGroup::Guest));
    }
}
