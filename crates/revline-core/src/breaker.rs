//! Per-source circuit breakers with half-open probing
//!
//! State machine per source: CLOSED → (threshold consecutive failures) →
//! OPEN → (cooldown elapsed) → HALF_OPEN → one probe → CLOSED on success,
//! back to OPEN on failure. State is in-memory only; a process restart
//! begins CLOSED for every source.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before tripping OPEN
    pub threshold: u32,
    /// Time in OPEN before a half-open probe is allowed
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Failure isolation for a single source.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Ask permission to call the source.
    ///
    /// `Ok(())` means the call may proceed (in HALF_OPEN this reserves the
    /// single probe slot). `Err(remaining)` means the circuit is open;
    /// `remaining` is the time until the half-open window.
    pub fn acquire(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(self.config.cooldown);
                if elapsed >= self.config.cooldown {
                    log::debug!("circuit breaker entering half-open");
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(self.config.cooldown - elapsed)
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    // Someone else holds the probe; come back shortly
                    Err(Duration::from_millis(100))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call. Closes the circuit from HALF_OPEN.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != BreakerState::Closed {
            log::info!("circuit breaker closing (probe succeeded)");
            inner.state = BreakerState::Closed;
        }
    }

    /// Record a failed call. Trips OPEN at the threshold; a failed
    /// half-open probe reopens immediately with a fresh cooldown.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                log::warn!("circuit breaker reopening (probe failed)");
                inner.state = BreakerState::Open;
                inner.probe_in_flight = false;
            }
            BreakerState::Closed => {
                if inner.consecutive_failures >= self.config.threshold {
                    log::warn!(
                        "circuit breaker opening after {} consecutive failures",
                        inner.consecutive_failures
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    #[cfg(test)]
    fn force_last_failure(&self, ago: Duration) {
        let mut inner = self.inner.lock().unwrap();
        // None (clock younger than `ago`) also reads as "cooldown over"
        inner.last_failure = Instant::now().checked_sub(ago);
    }
}

/// Process-wide registry of per-source breakers.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_source(&self, source: &str) -> Arc<CircuitBreaker> {
        let mut map = self.breakers.lock().expect("registry lock poisoned");
        map.entry(source.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config)))
            .clone()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
