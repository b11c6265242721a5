//! Error types for admission control
use crate::rate_limit::RateLimit;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`Limiter::acquire`](crate::Limiter::acquire).
///
/// Skipped calls are not errors; they come back as
/// [`Admission::Skipped`](crate::Admission::Skipped).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// A tier had no headroom and the behavior was `Raise`.
    #[error("rate limit exceeded for {limit} (retry in {retry_after:?})")]
    RateLimitExceeded {
        /// The first tier that denied the request.
        limit: RateLimit,
        /// Time until that tier frees enough units.
        retry_after: Duration,
    },
    /// The caller cancelled its context while blocked waiting for quota.
    #[error("acquire cancelled while waiting for quota")]
    Cancelled,
    /// The caller's deadline elapsed while blocked waiting for quota.
    #[error("deadline exceeded while waiting for quota")]
    DeadlineExceeded,
    /// The request asks for more units than a tier holds in one period.
    #[error("{units} units can never be admitted by {limit}")]
    ExceedsCapacity {
        /// Units requested.
        units: u32,
        /// Tier whose count is smaller than `units`.
        limit: RateLimit,
    },
}

impl AcquireError {
    /// Check if this error is a quota rejection under `Raise`.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
    /// Check if the caller cancelled the wait.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
    /// Check if the caller's deadline elapsed during the wait.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }
    /// Check if this error came from the caller's context rather than the limiter.
    pub fn is_context_error(&self) -> bool {
        self.is_cancelled() || self.is_deadline_exceeded()
    }
    /// Suggested wait before retrying, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
    /// The tier that produced this error, if any.
    pub fn limit(&self) -> Option<RateLimit> {
        match self {
            Self::RateLimitExceeded { limit, .. } | Self::ExceedsCapacity { limit, .. } => {
                Some(*limit)
            }
            _ => None,
        }
    }
}

/// Errors produced when validating limiter or registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Tier count must be > 0.
    #[error("rate limit count must be > 0")]
    ZeroCount,
    /// Tier period must be > 0.
    #[error("rate limit period must be > 0")]
    ZeroPeriod,
    /// A multi-tier limiter needs at least one tier.
    #[error("multi-tier limiter needs at least one tier")]
    NoTiers,
    /// The same tier instance was passed twice to one multi-tier limiter.
    #[error("tier at index {index} is already part of this limiter")]
    DuplicateTier {
        /// Position of the repeated tier.
        index: usize,
    },
    /// A registry route references a limiter group that was never defined.
    #[error("endpoint '{endpoint}' references unknown limiter group '{group}'")]
    UnknownGroup {
        /// Endpoint whose route is broken.
        endpoint: String,
        /// Missing group name.
        group: String,
    },
    /// Configuration text could not be parsed.
    #[error("invalid limiter configuration: {0}")]
    Parse(String),
}
