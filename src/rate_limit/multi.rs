//! Multi-tier limiter: several quotas, one all-or-nothing decision.
//!
//! Each admission pass locks every tier, rolls and checks all of them without mutating, and
//! commits to all of them only when every tier has headroom. A request denied by any tier
//! consumes nothing anywhere. Locks are always taken in one global order (by window
//! identity), so limiters that share tiers with each other cannot deadlock.

use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::{Clock, MonotonicClock};
use crate::context::AcquireContext;
use crate::error::{AcquireError, ConfigError};
use crate::rate_limit::window::WindowCounter;
use crate::rate_limit::{
    admit_with, check_capacity, Admission, Behavior, Limiter, RateLimit, SingleTierLimiter,
    TierSnapshot, Verdict,
};
use crate::sleeper::{Sleeper, TokioSleeper};

/// Limiter that admits a request only when every tier can.
///
/// # Examples
/// ```
/// use quota_gate::{AcquireContext, Behavior, Limiter, MultiTierLimiter, RateLimit};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let wallet = MultiTierLimiter::new(
///     [RateLimit::per_second(30).unwrap(), RateLimit::per_minute(150).unwrap()],
///     Behavior::Raise,
/// )
/// .unwrap();
///
/// let ctx = AcquireContext::background();
/// assert!(wallet.acquire(&ctx, 1, None).await.unwrap().is_granted());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MultiTierLimiter {
    tiers: Arc<[SingleTierLimiter]>,
    lock_order: Arc<[usize]>,
    behavior: Behavior,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl MultiTierLimiter {
    /// Create a limiter with one fresh tier per quota, in the given order.
    pub fn new(
        limits: impl IntoIterator<Item = RateLimit>,
        behavior: Behavior,
    ) -> Result<Self, ConfigError> {
        let tiers: Vec<_> = limits
            .into_iter()
            .map(|limit| SingleTierLimiter::from_limit(limit, behavior))
            .collect();
        if tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }
        Ok(Self::from_distinct(tiers, behavior))
    }

    /// Compose existing tiers. Tiers stay shared with any other holder of the same limiter,
    /// so one per-minute tier can back several multi-tier limiters.
    ///
    /// Errors if `tiers` is empty or holds the same quota twice.
    pub fn from_tiers(
        tiers: Vec<SingleTierLimiter>,
        behavior: Behavior,
    ) -> Result<Self, ConfigError> {
        if tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }
        for (index, tier) in tiers.iter().enumerate() {
            if tiers[..index].iter().any(|earlier| earlier.shares_quota_with(tier)) {
                return Err(ConfigError::DuplicateTier { index });
            }
        }
        Ok(Self::from_distinct(tiers, behavior))
    }

    /// Callers guarantee `tiers` is non-empty and holds no quota twice.
    pub(crate) fn from_distinct(tiers: Vec<SingleTierLimiter>, behavior: Behavior) -> Self {
        let mut lock_order: Vec<usize> = (0..tiers.len()).collect();
        lock_order.sort_by_key(|&i| tiers[i].window_id());
        Self {
            tiers: tiers.into(),
            lock_order: lock_order.into(),
            behavior,
            clock: Arc::new(MonotonicClock),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Override the clock (useful for deterministic tests). Every tier is judged against
    /// this clock during a pass.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override how blocked callers sleep.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Tiers in declaration order.
    pub fn tiers(&self) -> &[SingleTierLimiter] {
        &self.tiers
    }

    /// Lock every tier in global order, returning the guards in declaration order.
    fn lock_all(&self) -> Vec<MutexGuard<'_, WindowCounter>> {
        let mut slots: Vec<Option<MutexGuard<'_, WindowCounter>>> =
            self.tiers.iter().map(|_| None).collect();
        for &index in self.lock_order.iter() {
            slots[index] = Some(self.tiers[index].lock());
        }
        slots.into_iter().flatten().collect()
    }

    /// One check-then-commit pass.
    ///
    /// A denial names the first denying tier in declaration order and the longest wait
    /// among all denying tiers, so one sleep covers every tier that said no.
    fn try_admit(&self, units: u32) -> Verdict {
        let now = self.clock.now();
        let mut windows = self.lock_all();

        let mut denied: Option<(RateLimit, Duration)> = None;
        for window in windows.iter_mut() {
            window.roll(now);
            if !window.has_headroom(units) {
                let wait = window.until_free(units, now);
                denied = Some(match denied {
                    Some((first, longest)) => (first, longest.max(wait)),
                    None => (window.limit(), wait),
                });
            }
        }

        if let Some((limit, retry_after)) = denied {
            return Verdict::Denied { limit, retry_after };
        }
        for window in windows.iter_mut() {
            window.commit(units, now);
        }
        Verdict::Granted
    }
}

#[async_trait]
impl Limiter for MultiTierLimiter {
    async fn acquire(
        &self,
        ctx: &AcquireContext,
        units: u32,
        behavior: Option<Behavior>,
    ) -> Result<Admission, AcquireError> {
        if units == 0 {
            return Ok(Admission::Granted);
        }
        check_capacity(units, self.tiers.iter().map(SingleTierLimiter::limit))?;
        let behavior = behavior.unwrap_or(self.behavior);
        admit_with(ctx, self.sleeper.as_ref(), behavior, units, || self.try_admit(units)).await
    }

    fn default_behavior(&self) -> Behavior {
        self.behavior
    }

    fn limits(&self) -> Vec<RateLimit> {
        self.tiers.iter().map(SingleTierLimiter::limit).collect()
    }

    fn snapshot(&self) -> Vec<TierSnapshot> {
        let now = self.clock.now();
        self.tiers.iter().map(|tier| tier.lock().snapshot(now)).collect()
    }
}
