//! Error taxonomy and adaptive backoff for search operations
//!
//! Every failure crossing the adapter boundary is mapped to exactly one
//! [`ErrorKind`]. Retryable kinds carry a backoff family; delays get
//! uniform ±25% jitter so parallel workers do not reattempt in lockstep.

use std::time::Duration;

use rand::Rng;

/// Classification of a search failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// HTTP 429 or an explicit rate-limit signal from the source
    RateLimit,
    /// Timeout, connection reset, DNS failure
    Network,
    /// 5xx, or a 4xx outside the permanent set
    Api,
    /// Response or record did not match the expected schema
    Parse,
    /// Task inputs invalid (unknown source, bad option, bad date)
    Validation,
    /// 400/401/403/404 — retrying cannot help
    Permanent,
    /// Short-circuited by an open circuit breaker; the adapter was not called
    CircuitOpen,
    /// Cache read/write failure
    Cache,
    /// Invariant violation — fail fast, never swallow
    Internal,
}

impl ErrorKind {
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Api | Self::CircuitOpen
        )
    }

    /// Stable lowercase label used in logs and metrics.
    pub const fn label(self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::Api => "api",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Permanent => "permanent",
            Self::CircuitOpen => "circuit_open",
            Self::Cache => "cache",
            Self::Internal => "internal",
        }
    }

    pub const ALL: [ErrorKind; 9] = [
        Self::RateLimit,
        Self::Network,
        Self::Api,
        Self::Parse,
        Self::Validation,
        Self::Permanent,
        Self::CircuitOpen,
        Self::Cache,
        Self::Internal,
    ];
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified search failure with the original context attached.
#[derive(Debug, Clone)]
pub struct SearchError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    retry_after: Option<Duration>,
}

impl std::fmt::Display for SearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(s) => write!(f, "{} (HTTP {s}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for SearchError {}

impl SearchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: ErrorKind::RateLimit,
            message: message.into(),
            status: Some(429),
            retry_after,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn circuit_open(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CircuitOpen, message)
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Map an HTTP status to the taxonomy.
    ///
    /// 429 → RATE_LIMIT, {400, 401, 403, 404} → PERMANENT, everything
    /// else in 4xx/5xx → API.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let snippet: String = body.chars().take(200).collect();
        let kind = match status {
            429 => ErrorKind::RateLimit,
            400 | 401 | 403 | 404 => ErrorKind::Permanent,
            _ => ErrorKind::Api,
        };
        Self {
            kind,
            message: snippet,
            status: Some(status),
            retry_after,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Backoff delay before retrying `attempt` (1-indexed).
    ///
    /// Families per kind:
    /// - RATE_LIMIT: exponential, base 2s, cap 60s; a server Retry-After
    ///   hint acts as a floor on the delay
    /// - NETWORK: linear, 1s × attempt, cap 30s
    /// - API: exponential, base 4s, cap 120s
    ///
    /// Returns `None` for non-retryable kinds and for CIRCUIT_OPEN,
    /// where the wait is the breaker's half-open window instead.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        let attempt = attempt.max(1).min(16);
        let secs = match self.kind {
            ErrorKind::RateLimit => (2.0 * 2f64.powi(attempt as i32 - 1)).min(60.0),
            ErrorKind::Network => (f64::from(attempt)).min(30.0),
            ErrorKind::Api => (4.0 * 2f64.powi(attempt as i32 - 1)).min(120.0),
            _ => return None,
        };
        let jittered = jitter(secs);
        Some(match self.retry_after {
            Some(hint) if hint > jittered => hint,
            _ => jittered,
        })
    }
}

/// Uniform ±25% jitter.
fn jitter(secs: f64) -> Duration {
    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_secs_f64(secs * factor)
}
