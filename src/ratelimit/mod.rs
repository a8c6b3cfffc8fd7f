//! Per-origin rate limiting
//!
//! Every origin (typically the peer IP as a string) gets its own bucket refilling at
//! `per_second` tokens per second and holding at most `burst` tokens. The
//! buckets live in `governor`'s keyed GCRA limiter, which is equivalent to a
//! token bucket and safe to call from any number of tasks at once.
//!
//! Buckets are created on first sight of an origin and never evicted, so the
//! table grows with the number of distinct origins seen by the process.
//! TODO: prune idle origins periodically with `RateLimiter::retain_recent`.

use std::fmt::Display;
use std::hash::Hash;
use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::debug;

/// Keys are compared as given: two spellings of one address get two buckets.
pub struct OriginLimiter<K = String>
where
    K: Hash + Eq + Clone,
{
    limiter: DefaultKeyedRateLimiter<K>,
    per_second: NonZeroU32,
    burst: NonZeroU32,
}

impl<K> OriginLimiter<K>
where
    K: Hash + Eq + Clone + Display,
{
    /// Zero values are clamped to one.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        Self {
            limiter: RateLimiter::keyed(quota),
            per_second,
            burst,
        }
    }

    /// Try to take one token for `origin`. Never blocks.
    pub fn admit(&self, origin: &K) -> bool {
        let admitted = self.limiter.check_key(origin).is_ok();
        if !admitted {
            debug!(%origin, "rate limit exceeded");
        }
        admitted
    }

    /// Number of origins with a bucket.
    pub fn tracked_origins(&self) -> usize {
        self.limiter.len()
    }

    pub fn per_second(&self) -> u32 {
        self.per_second.get()
    }

    pub fn burst(&self) -> u32 {
        self.burst.get()
    }
}

impl<K> std::fmt::Debug for OriginLimiter<K>
where
    K: Hash + Eq + Clone + Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginLimiter")
            .field("per_second", &self.per_second)
            .field("burst", &self.burst)
            .field("origins", &self.tracked_origins())
            .finish()
    }
}
