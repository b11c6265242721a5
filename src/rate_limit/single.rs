//! Single-tier limiter: one quota, one lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::{Clock, MonotonicClock};
use crate::context::AcquireContext;
use crate::error::{AcquireError, ConfigError};
use crate::rate_limit::window::WindowCounter;
use crate::rate_limit::{
    admit_with, check_capacity, Admission, Behavior, Limiter, RateLimit, TierSnapshot, Verdict,
    WindowKind,
};
use crate::sleeper::{Sleeper, TokioSleeper};

/// Limiter enforcing one `(count, period)` quota.
///
/// Clones share the same window via `Arc`, so every handle draws from one quota. That is how
/// several clients share a limit: build it once and clone it into each of them.
///
/// # Examples
/// ```
/// use quota_gate::{AcquireContext, Behavior, Limiter, SingleTierLimiter};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let limiter = SingleTierLimiter::new(2, Duration::from_secs(1), Behavior::Raise).unwrap();
/// let ctx = AcquireContext::background();
///
/// assert!(limiter.acquire(&ctx, 1, None).await.unwrap().is_granted());
/// assert!(limiter.acquire(&ctx, 1, None).await.unwrap().is_granted());
/// assert!(limiter.acquire(&ctx, 1, None).await.unwrap_err().is_rate_limited());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SingleTierLimiter {
    limit: RateLimit,
    window: Arc<Mutex<WindowCounter>>,
    behavior: Behavior,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl SingleTierLimiter {
    /// Create a limiter admitting `count` units per `period`. Errors on a zero count or period.
    pub fn new(count: u32, period: Duration, behavior: Behavior) -> Result<Self, ConfigError> {
        Ok(Self::from_limit(RateLimit::new(count, period)?, behavior))
    }

    /// Create a limiter from an already validated quota, using a sliding window.
    pub fn from_limit(limit: RateLimit, behavior: Behavior) -> Self {
        Self {
            limit,
            window: Arc::new(Mutex::new(WindowCounter::new(limit, WindowKind::default()))),
            behavior,
            clock: Arc::new(MonotonicClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Switch the window algorithm. Starts a fresh window, so call it before sharing the
    /// limiter; existing clones keep the old window.
    pub fn with_window(mut self, kind: WindowKind) -> Self {
        self.window = Arc::new(Mutex::new(WindowCounter::new(self.limit, kind)));
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override how blocked callers sleep.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    pub fn window_kind(&self) -> WindowKind {
        self.lock().kind()
    }

    /// Whether `other` draws from the same quota as `self`.
    pub fn shares_quota_with(&self, other: &SingleTierLimiter) -> bool {
        Arc::ptr_eq(&self.window, &other.window)
    }

    /// The tier's state is plain counters, so a panic mid-update cannot leave it unusable.
    pub(crate) fn lock(&self) -> MutexGuard<'_, WindowCounter> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stable identity of the shared window, used to order locks across tiers.
    pub(crate) fn window_id(&self) -> usize {
        Arc::as_ptr(&self.window) as usize
    }

    fn try_admit(&self, units: u32) -> Verdict {
        let now = self.clock.now();
        let mut window = self.lock();
        window.roll(now);
        if window.has_headroom(units) {
            window.commit(units, now);
            Verdict::Granted
        } else {
            Verdict::Denied { limit: self.limit, retry_after: window.until_free(units, now) }
        }
    }
}

#[async_trait]
impl Limiter for SingleTierLimiter {
    async fn acquire(
        &self,
        ctx: &AcquireContext,
        units: u32,
        behavior: Option<Behavior>,
    ) -> Result<Admission, AcquireError> {
        if units == 0 {
            return Ok(Admission::Granted);
        }
        check_capacity(units, [self.limit])?;
        let behavior = behavior.unwrap_or(self.behavior);
        admit_with(ctx, self.sleeper.as_ref(), behavior, units, || self.try_admit(units)).await
    }

    fn default_behavior(&self) -> Behavior {
        self.behavior
    }

    fn limits(&self) -> Vec<RateLimit> {
        vec![self.limit]
    }

    fn snapshot(&self) -> Vec<TierSnapshot> {
        let now = self.clock.now();
        vec![self.lock().snapshot(now)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::TrackingSleeper;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, Clone)]
    struct ManualClock {
        base: Instant,
        offset_millis: Arc<AtomicUsize>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { base: Instant::now(), offset_millis: Arc::new(AtomicUsize::new(0)) }
        }

        fn advance(&self, millis: usize) {
            self.offset_millis.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + Duration::from_millis(self.offset_millis.load(Ordering::SeqCst) as u64)
        }
    }

    fn limiter(count: u32, period: Duration, behavior: Behavior) -> SingleTierLimiter {
        SingleTierLimiter::new(count, period, behavior).expect("valid limiter")
    }

    #[test]
    fn rejects_invalid_quota() {
        let err = SingleTierLimiter::new(0, Duration::from_secs(1), Behavior::Block)
            .expect_err("zero count should be invalid");
        assert_eq!(err, ConfigError::ZeroCount);
        let err = SingleTierLimiter::new(1, Duration::ZERO, Behavior::Block)
            .expect_err("zero period should be invalid");
        assert_eq!(err, ConfigError::ZeroPeriod);
    }

    #[tokio::test]
    async fn raise_denies_third_call_and_recovers_after_period() {
        let clock = ManualClock::new();
        let limiter =
            limiter(2, Duration::from_secs(1), Behavior::Raise).with_clock(clock.clone());
        let ctx = AcquireContext::background();

        assert_eq!(limiter.acquire(&ctx, 1, None).await, Ok(Admission::Granted));
        clock.advance(50);
        assert_eq!(limiter.acquire(&ctx, 1, None).await, Ok(Admission::Granted));
        clock.advance(50);
        let err = limiter.acquire(&ctx, 1, None).await.unwrap_err();
        assert_eq!(
            err,
            AcquireError::RateLimitExceeded {
                limit: limiter.limit(),
                retry_after: Duration::from_millis(900),
            }
        );

        clock.advance(1_000);
        assert_eq!(limiter.acquire(&ctx, 1, None).await, Ok(Admission::Granted));
    }

    #[tokio::test]
    async fn raise_leaves_counter_unchanged() {
        let limiter = limiter(1, Duration::from_secs(1), Behavior::Raise);
        let ctx = AcquireContext::background();

        limiter.acquire(&ctx, 1, None).await.unwrap();
        for _ in 0..5 {
            assert!(limiter.acquire(&ctx, 1, None).await.is_err());
        }
        assert_eq!(limiter.snapshot()[0].consumed, 1);
    }

    #[tokio::test]
    async fn skip_returns_skipped_without_error() {
        let sleeper = TrackingSleeper::new();
        let limiter =
            limiter(1, Duration::from_secs(1), Behavior::Skip).with_sleeper(sleeper.clone());
        let ctx = AcquireContext::background();

        assert_eq!(limiter.acquire(&ctx, 1, None).await, Ok(Admission::Granted));
        assert_eq!(limiter.acquire(&ctx, 1, None).await, Ok(Admission::Skipped));
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn per_call_override_beats_default() {
        let limiter = limiter(1, Duration::from_secs(1), Behavior::Block);
        let ctx = AcquireContext::background();

        limiter.acquire(&ctx, 1, None).await.unwrap();
        assert_eq!(limiter.acquire(&ctx, 1, Some(Behavior::Skip)).await, Ok(Admission::Skipped));
        assert!(limiter.acquire(&ctx, 1, Some(Behavior::Raise)).await.unwrap_err().is_rate_limited());
        assert_eq!(limiter.default_behavior(), Behavior::Block);
    }

    #[tokio::test(start_paused = true)]
    async fn block_waits_until_window_frees() {
        let sleeper = TrackingSleeper::new();
        let limiter =
            limiter(2, Duration::from_secs(1), Behavior::Block).with_sleeper(sleeper.clone());
        let ctx = AcquireContext::background();
        let start = Instant::now();

        limiter.acquire(&ctx, 1, None).await.unwrap();
        limiter.acquire(&ctx, 1, None).await.unwrap();
        assert!(sleeper.calls().is_empty(), "first two calls must not block");

        assert_eq!(limiter.acquire(&ctx, 1, None).await, Ok(Admission::Granted));
        assert_eq!(sleeper.calls(), vec![Duration::from_secs(1)]);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_consumes_nothing() {
        let limiter = limiter(1, Duration::from_secs(10), Behavior::Block);
        limiter.acquire(&AcquireContext::background(), 1, None).await.unwrap();

        let (ctx, handle) = AcquireContext::cancellable();
        let blocked = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire(&ctx, 1, None).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel();

        assert_eq!(blocked.await.unwrap(), Err(AcquireError::Cancelled));
        assert_eq!(limiter.snapshot()[0].consumed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_surfaces_as_deadline_exceeded() {
        let limiter = limiter(1, Duration::from_secs(10), Behavior::Block);
        limiter.acquire(&AcquireContext::background(), 1, None).await.unwrap();

        let ctx = AcquireContext::background().with_timeout(Duration::from_millis(200));
        assert_eq!(limiter.acquire(&ctx, 1, None).await, Err(AcquireError::DeadlineExceeded));
        assert_eq!(limiter.snapshot()[0].consumed, 1);
    }

    #[tokio::test]
    async fn context_is_ignored_on_fast_path() {
        let limiter = limiter(1, Duration::from_secs(1), Behavior::Block);
        let (ctx, handle) = AcquireContext::cancellable();
        handle.cancel();
        assert_eq!(limiter.acquire(&ctx, 1, None).await, Ok(Admission::Granted));
    }

    #[tokio::test]
    async fn zero_units_and_oversized_requests() {
        let limiter = limiter(3, Duration::from_secs(1), Behavior::Block);
        let ctx = AcquireContext::background();

        assert_eq!(limiter.acquire(&ctx, 0, None).await, Ok(Admission::Granted));
        assert_eq!(limiter.snapshot()[0].consumed, 0);
        assert_eq!(
            limiter.acquire(&ctx, 4, None).await,
            Err(AcquireError::ExceedsCapacity { units: 4, limit: limiter.limit() })
        );
        assert_eq!(limiter.acquire(&ctx, 3, None).await, Ok(Admission::Granted));
    }

    #[tokio::test]
    async fn huge_period_denies_without_panicking() {
        for kind in [WindowKind::Sliding, WindowKind::Fixed] {
            let limiter = limiter(1, Duration::MAX, Behavior::Raise).with_window(kind);
            let ctx = AcquireContext::background();

            assert_eq!(limiter.acquire(&ctx, 1, None).await, Ok(Admission::Granted));
            let err = limiter.acquire(&ctx, 1, None).await.unwrap_err();
            assert_eq!(err.retry_after(), Some(Duration::MAX), "{kind:?}");
            assert_eq!(limiter.acquire(&ctx, 1, Some(Behavior::Skip)).await, Ok(Admission::Skipped));

            let snapshot = limiter.snapshot();
            assert_eq!(snapshot[0].consumed, 1);
            assert_eq!(snapshot[0].frees_in, Some(Duration::MAX));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn huge_period_block_still_honours_deadline() {
        let limiter = limiter(1, Duration::MAX, Behavior::Block);
        limiter.acquire(&AcquireContext::background(), 1, None).await.unwrap();

        let ctx = AcquireContext::background().with_timeout(Duration::from_secs(1));
        assert_eq!(limiter.acquire(&ctx, 1, None).await, Err(AcquireError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn idle_limiter_grants_full_quota_again() {
        let clock = ManualClock::new();
        let limiter =
            limiter(3, Duration::from_secs(1), Behavior::Raise).with_clock(clock.clone());
        let ctx = AcquireContext::background();

        for _ in 0..3 {
            limiter.acquire(&ctx, 1, None).await.unwrap();
        }
        clock.advance(5_000);
        for _ in 0..3 {
            assert_eq!(limiter.acquire(&ctx, 1, None).await, Ok(Admission::Granted));
        }
        assert!(limiter.acquire(&ctx, 1, None).await.is_err(), "no quota carried over");
    }

    #[tokio::test]
    async fn clones_share_quota_but_separate_limiters_do_not() {
        let a = limiter(1, Duration::from_secs(1), Behavior::Raise);
        let b = a.clone();
        let independent = limiter(1, Duration::from_secs(1), Behavior::Raise);
        let ctx = AcquireContext::background();

        assert!(a.shares_quota_with(&b));
        assert!(!a.shares_quota_with(&independent));

        a.acquire(&ctx, 1, None).await.unwrap();
        assert!(b.acquire(&ctx, 1, None).await.unwrap_err().is_rate_limited());
        assert_eq!(independent.acquire(&ctx, 1, None).await, Ok(Admission::Granted));
    }

    #[tokio::test]
    async fn fixed_window_can_be_selected() {
        let limiter =
            limiter(1, Duration::from_secs(1), Behavior::Raise).with_window(WindowKind::Fixed);
        assert_eq!(limiter.window_kind(), WindowKind::Fixed);
        let ctx = AcquireContext::background();
        limiter.acquire(&ctx, 1, None).await.unwrap();
        assert!(limiter.acquire(&ctx, 1, None).await.is_err());
    }
}
