//! Graceful shutdown support via atomic flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Global shutdown flag — set by SIGTERM/SIGINT handler
pub fn shutdown_flag() -> &'static AtomicBool {
    static FLAG: AtomicBool = AtomicBool::new(false);
    &FLAG
}

/// Check if shutdown was requested
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Request shutdown (for signal handlers)
pub fn request_shutdown() {
    shutdown_flag().store(true, Ordering::Relaxed);
}

/// Granularity of interruptible sleeps — shutdown is observed at least
/// this often during backoff and rate-limit waits.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Sleep for `total`, waking early if shutdown is requested.
///
/// Returns `false` if the sleep was cut short by a shutdown request.
pub fn sleep_interruptible(total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if is_shutdown_requested() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
