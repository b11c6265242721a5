//! Clock abstractions used to anchor quota windows.

use tokio::time::Instant;

/// Clock abstraction so window timing can be faked in tests.
///
/// Implementations must be monotonic: a later call never returns an earlier instant.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

/// Monotonic clock backed by `tokio::time::Instant::now()`.
///
/// Follows tokio's paused test clock when the runtime is started with `start_paused`, so
/// limiters built on it can be driven deterministically from `#[tokio::test]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
