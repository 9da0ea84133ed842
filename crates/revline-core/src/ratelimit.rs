//! Token-bucket rate limiting shared across workers
//!
//! One limiter per source, shared by all workers. Tokens refill
//! continuously at `rate` per second up to `burst`; `acquire` blocks the
//! calling worker until a token is available. A 429 response empties the
//! bucket via [`RateLimiter::reset_after`] so the next request waits at
//! least as long as the server asked for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::shutdown::sleep_interruptible;

/// Rate parameters for one source.
#[derive(Debug, Clone, Copy)]
pub struct SourceLimits {
    /// Sustained requests per second
    pub rate: f64,
    /// Bucket capacity (initial fill)
    pub burst: f64,
    /// Minimum gap between consecutive grants, if the source requires one
    pub min_spacing: Option<Duration>,
}

impl SourceLimits {
    /// Documented polite-pool limits per source; unknown sources get a
    /// conservative 1 req/s with no burst.
    pub fn defaults_for(source: &str) -> Self {
        match source {
            "openalex" => Self {
                rate: 10.0,
                burst: 15.0,
                min_spacing: None,
            },
            "semantic_scholar" => Self {
                rate: 1.0,
                burst: 3.0,
                min_spacing: None,
            },
            "arxiv" => Self {
                rate: 1.0 / 3.0,
                burst: 1.0,
                min_spacing: Some(Duration::from_secs(3)),
            },
            "crossref" => Self {
                rate: 50.0,
                burst: 100.0,
                min_spacing: None,
            },
            _ => Self {
                rate: 1.0,
                burst: 1.0,
                min_spacing: None,
            },
        }
    }
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
    /// No grants before this instant (set by `reset_after`)
    not_before: Option<Instant>,
    last_grant: Option<Instant>,
}

/// Token bucket gating requests to a single source.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    min_spacing: Option<Duration>,
    state: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(limits: SourceLimits) -> Self {
        Self {
            rate: limits.rate,
            burst: limits.burst,
            min_spacing: limits.min_spacing,
            state: Mutex::new(Bucket {
                tokens: limits.burst,
                refilled_at: Instant::now(),
                not_before: None,
                last_grant: None,
            }),
        }
    }

    /// Block until one token is available, then take it.
    ///
    /// Returns `false` if shutdown was requested while waiting.
    pub fn acquire(&self) -> bool {
        loop {
            let wait = {
                let mut bucket = self.state.lock().expect("limiter lock poisoned");
                let now = Instant::now();
                bucket.tokens = (bucket.tokens
                    + now.duration_since(bucket.refilled_at).as_secs_f64() * self.rate)
                    .min(self.burst);
                bucket.refilled_at = now;

                match self.time_to_grant(&bucket, now) {
                    None => {
                        bucket.tokens -= 1.0;
                        bucket.last_grant = Some(now);
                        bucket.not_before = None;
                        return true;
                    }
                    Some(wait) => wait,
                }
            };
            if !sleep_interruptible(wait) {
                return false;
            }
        }
    }

    /// Take a token only if one is immediately available.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.state.lock().expect("limiter lock poisoned");
        let now = Instant::now();
        bucket.tokens = (bucket.tokens
            + now.duration_since(bucket.refilled_at).as_secs_f64() * self.rate)
            .min(self.burst);
        bucket.refilled_at = now;
        if self.time_to_grant(&bucket, now).is_none() {
            bucket.tokens -= 1.0;
            bucket.last_grant = Some(now);
            bucket.not_before = None;
            true
        } else {
            false
        }
    }

    /// Empty the bucket and refuse grants until `delay` has elapsed.
    ///
    /// Called after an HTTP 429 with the server's Retry-After hint so the
    /// pool cannot issue a back-to-back violation.
    pub fn reset_after(&self, delay: Duration) {
        let mut bucket = self.state.lock().expect("limiter lock poisoned");
        bucket.tokens = 0.0;
        bucket.refilled_at = Instant::now();
        bucket.not_before = Some(Instant::now() + delay);
    }

    /// How long until a grant is possible; `None` means grant now.
    fn time_to_grant(&self, bucket: &Bucket, now: Instant) -> Option<Duration> {
        if let Some(not_before) = bucket.not_before {
            if not_before > now {
                return Some(not_before - now);
            }
        }
        if bucket.tokens < 1.0 {
            return Some(Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate));
        }
        if let Some(spacing) = self.min_spacing {
            if let Some(last) = bucket.last_grant {
                let since = now.duration_since(last);
                if since < spacing {
                    return Some(spacing - since);
                }
            }
        }
        None
    }
}

/// Process-wide registry of per-source limiters.
///
/// The manager owns one registry; tests substitute their own instance
/// for isolation.
#[derive(Default)]
pub struct LimiterRegistry {
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl LimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the limiter for `source`, creating it from the default limits
    /// table on first use.
    pub fn for_source(&self, source: &str) -> Arc<RateLimiter> {
        let mut map = self.limiters.lock().expect("registry lock poisoned");
        map.entry(source.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(SourceLimits::defaults_for(source))))
            .clone()
    }

    /// Install a custom limiter (used by tests and config overrides).
    pub fn insert(&self, source: &str, limiter: RateLimiter) {
        let mut map = self.limiters.lock().expect("registry lock poisoned");
        map.insert(source.to_string(), Arc::new(limiter));
    }
}
