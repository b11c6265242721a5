//! Limiter and registry configuration loaded from JSON.
//!
//! ```json
//! {
//!   "default_group": "general",
//!   "groups": {
//!     "general": { "tiers": [{ "count": 100, "period_ms": 1000 }] },
//!     "wallet": {
//!       "behavior": "raise",
//!       "tiers": [{ "count": 30, "period_ms": 1000 }, { "count": 150, "period_ms": 60000 }]
//!     }
//!   },
//!   "endpoints": { "wallet/withdraw": "wallet", "wallet/deposit": "wallet" }
//! }
//! ```
//!
//! Every group becomes exactly one limiter; all endpoints naming a group share it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::rate_limit::{
    Behavior, Limiter, MultiTierLimiter, RateLimit, SingleTierLimiter, WindowKind,
};
use crate::registry::EndpointLimiterRegistry;

/// One `(count, period)` tier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    pub count: u32,
    pub period_ms: u64,
}

impl TierConfig {
    pub fn to_limit(&self) -> Result<RateLimit, ConfigError> {
        RateLimit::new(self.count, Duration::from_millis(self.period_ms))
    }
}

/// A limiter: one tier builds a [`SingleTierLimiter`], several build a [`MultiTierLimiter`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimiterConfig {
    pub tiers: Vec<TierConfig>,
    #[serde(default)]
    pub behavior: Behavior,
    #[serde(default)]
    pub window: WindowKind,
}

impl LimiterConfig {
    pub fn build(&self) -> Result<Arc<dyn Limiter>, ConfigError> {
        let mut tiers = self
            .tiers
            .iter()
            .map(|tier| -> Result<SingleTierLimiter, ConfigError> {
                Ok(SingleTierLimiter::from_limit(tier.to_limit()?, self.behavior)
                    .with_window(self.window))
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        match tiers.len() {
            0 => Err(ConfigError::NoTiers),
            1 => Ok(Arc::new(tiers.remove(0))),
            _ => Ok(Arc::new(MultiTierLimiter::from_distinct(tiers, self.behavior))),
        }
    }
}

/// Named limiter groups, the endpoints routed to them, and the fallback group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    pub default_group: String,
    pub groups: BTreeMap<String, LimiterConfig>,
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

impl RegistryConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn build(&self) -> Result<EndpointLimiterRegistry, ConfigError> {
        let mut limiters: BTreeMap<&str, Arc<dyn Limiter>> = BTreeMap::new();
        for (name, group) in &self.groups {
            limiters.insert(name.as_str(), group.build()?);
        }

        let lookup = |endpoint: &str, group: &str| {
            limiters.get(group).cloned().ok_or_else(|| ConfigError::UnknownGroup {
                endpoint: endpoint.to_string(),
                group: group.to_string(),
            })
        };

        let mut builder =
            EndpointLimiterRegistry::builder(lookup("<default>", &self.default_group)?);
        for (endpoint, group) in &self.endpoints {
            builder = builder.route(endpoint.clone(), lookup(endpoint, group)?);
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AcquireContext, Admission};

    const CONFIG: &str = r#"{
        "default_group": "general",
        "groups": {
            "general": { "tiers": [{ "count": 100, "period_ms": 1000 }] },
            "wallet": {
                "behavior": "raise",
                "window": "fixed",
                "tiers": [{ "count": 2, "period_ms": 1000 }, { "count": 150, "period_ms": 60000 }]
            }
        },
        "endpoints": { "wallet/withdraw": "wallet", "wallet/deposit": "wallet" }
    }"#;

    #[test]
    fn parses_groups_and_defaults() {
        let config = RegistryConfig::from_json(CONFIG).unwrap();
        assert_eq!(config.groups["general"].behavior, Behavior::Block);
        assert_eq!(config.groups["general"].window, WindowKind::Sliding);
        assert_eq!(config.groups["wallet"].behavior, Behavior::Raise);
        assert_eq!(config.groups["wallet"].window, WindowKind::Fixed);
        assert_eq!(config.endpoints.len(), 2);
    }

    #[tokio::test]
    async fn endpoints_in_one_group_share_a_limiter() {
        let registry = RegistryConfig::from_json(CONFIG).unwrap().build().unwrap();
        let ctx = AcquireContext::background();

        assert_eq!(registry.resolve("wallet/withdraw").limits().len(), 2);
        assert_eq!(registry.resolve("market/ticker").limits()[0].count(), 100);

        for _ in 0..2 {
            let granted = registry.resolve("wallet/withdraw").acquire(&ctx, 1, None).await;
            assert_eq!(granted, Ok(Admission::Granted));
        }
        let denied = registry.resolve("wallet/deposit").acquire(&ctx, 1, None).await;
        assert!(denied.unwrap_err().is_rate_limited());
    }

    #[test]
    fn unknown_group_is_reported() {
        let mut config = RegistryConfig::from_json(CONFIG).unwrap();
        config.endpoints.insert("orders".into(), "missing".into());
        let err = config.build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownGroup { endpoint: "orders".into(), group: "missing".into() }
        );
    }

    #[test]
    fn invalid_tiers_are_rejected() {
        let zero = LimiterConfig {
            tiers: vec![TierConfig { count: 0, period_ms: 1000 }],
            behavior: Behavior::Block,
            window: WindowKind::Sliding,
        };
        assert_eq!(zero.build().unwrap_err(), ConfigError::ZeroCount);

        let empty = LimiterConfig { tiers: vec![], ..zero };
        assert_eq!(empty.build().unwrap_err(), ConfigError::NoTiers);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = RegistryConfig::from_json(r#"{ "groups": 1 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let err = RegistryConfig::from_json(r#"{ "default_group": "g", "groups": {}, "extra": 1 }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
