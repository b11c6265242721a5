//! The five official quota tiers and a shareable set of limiters for them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::rate_limit::{Behavior, Limiter, MultiTierLimiter, RateLimit, SingleTierLimiter};
use crate::registry::EndpointLimiterRegistry;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

const BULK: [RateLimit; 1] = [RateLimit::from_parts(300, SECOND)];
const HIGH: [RateLimit; 1] = [RateLimit::from_parts(150, SECOND)];
const GENERAL: [RateLimit; 1] = [RateLimit::from_parts(100, SECOND)];
const WALLET: [RateLimit; 2] = [RateLimit::from_parts(30, SECOND), RateLimit::from_parts(150, MINUTE)];
const RESTRICTED: [RateLimit; 1] = [RateLimit::from_parts(2, SECOND)];

/// Quota tiers published by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OfficialTier {
    /// 300 per second.
    Bulk,
    /// 150 per second.
    High,
    /// 100 per second; also the fallback for unregistered endpoints.
    General,
    /// 30 per second and 150 per minute.
    Wallet,
    /// 2 per second.
    Restricted,
}

impl OfficialTier {
    pub const ALL: [OfficialTier; 5] = [
        OfficialTier::Bulk,
        OfficialTier::High,
        OfficialTier::General,
        OfficialTier::Wallet,
        OfficialTier::Restricted,
    ];

    /// Quotas this tier enforces, most restrictive period first.
    pub fn limits(self) -> &'static [RateLimit] {
        match self {
            OfficialTier::Bulk => &BULK,
            OfficialTier::High => &HIGH,
            OfficialTier::General => &GENERAL,
            OfficialTier::Wallet => &WALLET,
            OfficialTier::Restricted => &RESTRICTED,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OfficialTier::Bulk => "bulk",
            OfficialTier::High => "high",
            OfficialTier::General => "general",
            OfficialTier::Wallet => "wallet",
            OfficialTier::Restricted => "restricted",
        }
    }

    fn limiter(self, behavior: Behavior) -> Arc<dyn Limiter> {
        match self.limits() {
            [single] => Arc::new(SingleTierLimiter::from_limit(*single, behavior)),
            limits => {
                let tiers = limits
                    .iter()
                    .map(|limit| SingleTierLimiter::from_limit(*limit, behavior))
                    .collect();
                Arc::new(MultiTierLimiter::from_distinct(tiers, behavior))
            }
        }
    }
}

impl fmt::Display for OfficialTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One limiter per official tier.
///
/// Clones share every quota. Build one set per API key and hand clones to each client using
/// that key; separately built sets never coordinate.
///
/// # Examples
/// ```
/// use quota_gate::{Behavior, OfficialLimiters, OfficialTier};
///
/// let limiters = OfficialLimiters::new(Behavior::Block);
/// let registry = limiters.registry(&[
///     ("market/ticker", OfficialTier::Bulk),
///     ("wallet/withdraw", OfficialTier::Wallet),
/// ]);
/// assert_eq!(registry.resolve("wallet/withdraw").limits().len(), 2);
/// assert_eq!(registry.resolve("unlisted").limits()[0].count(), 100);
/// ```
#[derive(Debug, Clone)]
pub struct OfficialLimiters {
    bulk: Arc<dyn Limiter>,
    high: Arc<dyn Limiter>,
    general: Arc<dyn Limiter>,
    wallet: Arc<dyn Limiter>,
    restricted: Arc<dyn Limiter>,
}

impl OfficialLimiters {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            bulk: OfficialTier::Bulk.limiter(behavior),
            high: OfficialTier::High.limiter(behavior),
            general: OfficialTier::General.limiter(behavior),
            wallet: OfficialTier::Wallet.limiter(behavior),
            restricted: OfficialTier::Restricted.limiter(behavior),
        }
    }

    pub fn get(&self, tier: OfficialTier) -> &Arc<dyn Limiter> {
        match tier {
            OfficialTier::Bulk => &self.bulk,
            OfficialTier::High => &self.high,
            OfficialTier::General => &self.general,
            OfficialTier::Wallet => &self.wallet,
            OfficialTier::Restricted => &self.restricted,
        }
    }

    /// Registry routing each endpoint in `table` to its tier's shared limiter, with the
    /// general tier as the fallback.
    pub fn registry(&self, table: &[(&str, OfficialTier)]) -> EndpointLimiterRegistry {
        table
            .iter()
            .fold(EndpointLimiterRegistry::builder(self.general.clone()), |builder, (endpoint, tier)| {
                builder.route(*endpoint, self.get(*tier).clone())
            })
            .build()
    }
}
