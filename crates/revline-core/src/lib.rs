//! Revline Core - Common infrastructure for literature acquisition
//!
//! This crate provides the building blocks shared by the search pipeline:
//! the paper record model, identifier normalization, the error taxonomy
//! with adaptive backoff, per-source rate limiters and circuit breakers,
//! and the blocking HTTP facade used by source adapters.

pub mod breaker;
pub mod error;
pub mod http;
pub mod ids;
pub mod logging;
pub mod model;
pub mod progress;
pub mod ratelimit;
pub mod shutdown;

// Re-exports for convenience
pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker};
pub use error::{ErrorKind, SearchError};
pub use http::{HttpResponse, SHARED_RUNTIME, http_client};
pub use logging::{IndicatifLogger, init_logging};
pub use model::{Author, DateRange, Paper, Provenance, Reference};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use ratelimit::{LimiterRegistry, RateLimiter, SourceLimits};
pub use shutdown::{
    is_shutdown_requested, request_shutdown, shutdown_flag, sleep_interruptible,
};
