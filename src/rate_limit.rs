//! Admission control primitives.
//!
//! This module provides the building blocks for gating calls against a quota:
//! - [`Limiter`]: the admission contract shared by every limiter.
//! - [`SingleTierLimiter`]: one `(count, period)` quota.
//! - [`MultiTierLimiter`]: several quotas that must all admit a request.
//! - [`AdmissionLayer`]: tower middleware that asks the endpoint registry before each call.
//!
//! # Behaviors
//!
//! When a request does not fit the current window, the [`Behavior`] decides what happens:
//! - **Block**: wait for the window to free enough units, then try again. The wait races the
//!   caller's [`AcquireContext`](crate::AcquireContext).
//! - **Raise**: fail immediately with [`AcquireError::RateLimitExceeded`].
//! - **Skip**: return [`Admission::Skipped`]; the caller quietly does not make the call.
//!
//! # Fairness
//!
//! Blocked callers are not queued. When a window frees up, whichever caller re-checks first
//! wins and the others go back to waiting. Every blocked caller eventually gets through as
//! long as quota keeps recovering, but no FIFO order is promised.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::context::AcquireContext;
use crate::error::AcquireError;
use crate::sleeper::Sleeper;

pub mod middleware;
pub mod multi;
pub mod single;
pub mod window;

pub use middleware::{AdmissionError, AdmissionLayer, AdmissionService, EndpointRequest};
pub use multi::MultiTierLimiter;
pub use single::SingleTierLimiter;
pub use window::{RateLimit, WindowKind};

/// What to do when a request does not fit the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Behavior {
    /// Wait until quota frees up (cancellable through the context).
    #[default]
    Block,
    /// Fail with [`AcquireError::RateLimitExceeded`].
    Raise,
    /// Return [`Admission::Skipped`] without error.
    Skip,
}

/// Successful outcome of [`Limiter::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Quota was consumed; the call may proceed.
    Granted,
    /// No quota was available and the behavior was `Skip`; the call should not be made.
    Skipped,
}

impl Admission {
    /// Helper to check if the call may proceed.
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }
}

/// Point-in-time view of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSnapshot {
    /// The tier's quota.
    pub limit: RateLimit,
    /// Units consumed in the live window.
    pub consumed: u32,
    /// Units still available in the live window.
    pub remaining: u32,
    /// Time until at least one consumed unit is released, if any are consumed.
    pub frees_in: Option<Duration>,
}

/// Core admission contract.
///
/// Implementations are cheap to clone handles over shared state: hand the same limiter (or a
/// clone of it) to several clients and they draw from one quota. Two limiters constructed
/// separately never coordinate, even if they describe the same quota.
#[async_trait]
pub trait Limiter: Send + Sync + fmt::Debug {
    /// Try to consume `units` of quota.
    ///
    /// `behavior` overrides the limiter's default for this call; `None` keeps the default.
    ///
    /// # Errors
    /// - [`AcquireError::RateLimitExceeded`] when denied under `Raise`.
    /// - [`AcquireError::Cancelled`] / [`AcquireError::DeadlineExceeded`] when the context ends
    ///   while blocked. No quota is consumed in that case.
    /// - [`AcquireError::ExceedsCapacity`] when `units` is larger than a tier's count.
    async fn acquire(
        &self,
        ctx: &AcquireContext,
        units: u32,
        behavior: Option<Behavior>,
    ) -> Result<Admission, AcquireError>;

    /// Behavior used when a call passes no override.
    fn default_behavior(&self) -> Behavior;

    /// Quotas enforced by this limiter, in declaration order.
    fn limits(&self) -> Vec<RateLimit>;

    /// Current state of every tier, in declaration order.
    fn snapshot(&self) -> Vec<TierSnapshot>;
}

/// Result of one non-blocking admission pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Granted,
    Denied { limit: RateLimit, retry_after: Duration },
}

/// Rejects requests no window could ever hold.
pub(crate) fn check_capacity(
    units: u32,
    limits: impl IntoIterator<Item = RateLimit>,
) -> Result<(), AcquireError> {
    match limits.into_iter().find(|limit| units > limit.count()) {
        Some(limit) => Err(AcquireError::ExceedsCapacity { units, limit }),
        None => Ok(()),
    }
}

/// Runs admission passes until one grants, or the behavior ends the call.
///
/// `pass` must do all of its locking internally; nothing is held across the wait.
pub(crate) async fn admit_with<F>(
    ctx: &AcquireContext,
    sleeper: &dyn Sleeper,
    behavior: Behavior,
    units: u32,
    mut pass: F,
) -> Result<Admission, AcquireError>
where
    F: FnMut() -> Verdict + Send,
{
    loop {
        match pass() {
            Verdict::Granted => {
                trace!(target: "quota_gate::limiter", units, "quota granted");
                return Ok(Admission::Granted);
            }
            Verdict::Denied { limit, retry_after } => match behavior {
                Behavior::Raise => {
                    debug!(target: "quota_gate::limiter", %limit, ?retry_after, "quota exceeded; raising");
                    return Err(AcquireError::RateLimitExceeded { limit, retry_after });
                }
                Behavior::Skip => {
                    debug!(target: "quota_gate::limiter", %limit, "quota exceeded; skipping call");
                    return Ok(Admission::Skipped);
                }
                Behavior::Block => {
                    debug!(target: "quota_gate::limiter", %limit, ?retry_after, "quota exceeded; waiting");
                    ctx.wait(sleeper, retry_after).await?;
                }
            },
        }
    }
}
