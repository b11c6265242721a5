use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ConfigError;
use crate::rate_limit::TierSnapshot;

/// One tier's quota: `count` units per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimit {
    count: u32,
    period: Duration,
}

impl RateLimit {
    /// Create a quota, rejecting a zero count or a zero period.
    pub fn new(count: u32, period: Duration) -> Result<Self, ConfigError> {
        if count == 0 {
            return Err(ConfigError::ZeroCount);
        }
        if period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        Ok(Self { count, period })
    }

    /// `count` units per second.
    pub fn per_second(count: u32) -> Result<Self, ConfigError> {
        Self::new(count, Duration::from_secs(1))
    }

    /// `count` units per minute.
    pub fn per_minute(count: u32) -> Result<Self, ConfigError> {
        Self::new(count, Duration::from_secs(60))
    }

    /// Callers guarantee `count > 0` and a non-zero period.
    pub(crate) const fn from_parts(count: u32, period: Duration) -> Self {
        Self { count, period }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.count, self.period)
    }
}

/// How a tier decides which past grants still count against its quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum WindowKind {
    /// Every grant counts for exactly `period` after it was made. No span of length `period`
    /// ever holds more than `count` units.
    #[default]
    Sliding,
    /// The window opens at the first request after the previous one expired and resets as a
    /// whole once `period` has passed. Cheapest, but two adjacent windows can together admit
    /// up to `2 * count` units inside one `period`.
    Fixed,
}

#[derive(Debug)]
enum WindowState {
    Fixed { consumed: u32, window_start: Option<Instant> },
    Sliding { consumed: u32, grants: VecDeque<(Instant, u32)> },
}

/// Consumed-unit bookkeeping for one tier.
///
/// Plain data; the owning limiter serializes access. Resets are lazy: nothing happens until
/// [`roll`](Self::roll) is called with the current time.
#[derive(Debug)]
pub(crate) struct WindowCounter {
    limit: RateLimit,
    state: WindowState,
}

impl WindowCounter {
    pub(crate) fn new(limit: RateLimit, kind: WindowKind) -> Self {
        let state = match kind {
            WindowKind::Fixed => WindowState::Fixed { consumed: 0, window_start: None },
            WindowKind::Sliding => WindowState::Sliding { consumed: 0, grants: VecDeque::new() },
        };
        Self { limit, state }
    }

    pub(crate) fn limit(&self) -> RateLimit {
        self.limit
    }

    pub(crate) fn kind(&self) -> WindowKind {
        match self.state {
            WindowState::Fixed { .. } => WindowKind::Fixed,
            WindowState::Sliding { .. } => WindowKind::Sliding,
        }
    }

    pub(crate) fn consumed(&self) -> u32 {
        match &self.state {
            WindowState::Fixed { consumed, .. } | WindowState::Sliding { consumed, .. } => {
                *consumed
            }
        }
    }

    /// Drop whatever has expired by `now`.
    pub(crate) fn roll(&mut self, now: Instant) {
        let period = self.limit.period;
        match &mut self.state {
            WindowState::Fixed { consumed, window_start } => {
                let expired = !matches!(
                    window_start,
                    Some(start) if now.saturating_duration_since(*start) < period
                );
                if expired {
                    *consumed = 0;
                    *window_start = Some(now);
                }
            }
            WindowState::Sliding { consumed, grants } => {
                while let Some(&(at, units)) = grants.front() {
                    if now.saturating_duration_since(at) < period {
                        break;
                    }
                    grants.pop_front();
                    *consumed = consumed.saturating_sub(units);
                }
            }
        }
    }

    pub(crate) fn has_headroom(&self, units: u32) -> bool {
        u64::from(self.consumed()) + u64::from(units) <= u64::from(self.limit.count)
    }

    /// Record `units` as consumed at `now`. Callers check headroom first.
    pub(crate) fn commit(&mut self, units: u32, now: Instant) {
        match &mut self.state {
            WindowState::Fixed { consumed, window_start } => {
                window_start.get_or_insert(now);
                *consumed += units;
            }
            WindowState::Sliding { consumed, grants } => {
                grants.push_back((now, units));
                *consumed += units;
            }
        }
        debug_assert!(self.consumed() <= self.limit.count);
    }

    /// Time until `units` more would fit, assuming no other grants. Zero when they fit now.
    pub(crate) fn until_free(&self, units: u32, now: Instant) -> Duration {
        if self.has_headroom(units) {
            return Duration::ZERO;
        }
        let period = self.limit.period;
        match &self.state {
            WindowState::Fixed { window_start, .. } => window_start
                .map(|start| frees_after(start, period, now))
                .unwrap_or(Duration::ZERO),
            WindowState::Sliding { consumed, grants } => {
                let excess =
                    u64::from(*consumed) + u64::from(units) - u64::from(self.limit.count);
                let mut freed = 0u64;
                for &(at, granted) in grants {
                    freed += u64::from(granted);
                    if freed >= excess {
                        return frees_after(at, period, now);
                    }
                }
                Duration::ZERO
            }
        }
    }

    /// Read-only view as of `now`, without rolling the stored state.
    pub(crate) fn snapshot(&self, now: Instant) -> TierSnapshot {
        let period = self.limit.period;
        let (consumed, frees_in) = match &self.state {
            WindowState::Fixed { consumed, window_start } => match window_start {
                Some(start) if now.saturating_duration_since(*start) < period && *consumed > 0 => {
                    (*consumed, Some(frees_after(*start, period, now)))
                }
                _ => (0, None),
            },
            WindowState::Sliding { grants, .. } => {
                let mut live = grants
                    .iter()
                    .filter(|(at, _)| now.saturating_duration_since(*at) < period)
                    .peekable();
                let frees_in =
                    live.peek().map(|(at, _)| frees_after(*at, period, now));
                (live.map(|(_, units)| *units).sum(), frees_in)
            }
        };
        TierSnapshot {
            limit: self.limit,
            consumed,
            remaining: self.limit.count.saturating_sub(consumed),
            frees_in,
        }
    }
}

/// Time from `now` until `period` has passed since `at`. A period ending beyond the
/// representable range never frees.
fn frees_after(at: Instant, period: Duration, now: Instant) -> Duration {
    at.checked_add(period)
        .map_or(Duration::MAX, |end| end.saturating_duration_since(now))
}
