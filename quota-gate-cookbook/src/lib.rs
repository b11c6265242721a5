//! Ready-to-use admission recipes (“cookbook”) for quota-gate.
//!
//! **Ladder:**
//! - Simple: [`EXCHANGE_ENDPOINTS`] and [`exchange_registry`], the published endpoint table
//! - Intermediate: [`Dispatcher`], gate any async call by endpoint id
//! - Advanced: [`KeyedLimiters`], one shared quota set per API key across many clients
//! - Tower: [`exchange_layer`], the same table as middleware

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use quota_gate::{
    AcquireContext, AcquireError, Admission, AdmissionLayer, Behavior, EndpointLimiterRegistry,
    OfficialLimiters, OfficialTier,
};

/// Endpoint ids of the exchange API and the quota tier each one draws from.
///
/// Endpoints missing from this table fall back to [`OfficialTier::General`].
pub const EXCHANGE_ENDPOINTS: &[(&str, OfficialTier)] = &[
    ("market/ticker", OfficialTier::Bulk),
    ("market/depth", OfficialTier::Bulk),
    ("market/trades", OfficialTier::Bulk),
    ("market/candles", OfficialTier::High),
    ("account/balances", OfficialTier::High),
    ("orders/open", OfficialTier::High),
    ("orders/history", OfficialTier::General),
    ("wallet/deposit_address", OfficialTier::Wallet),
    ("wallet/deposit", OfficialTier::Wallet),
    ("wallet/withdraw", OfficialTier::Wallet),
    ("orders/add", OfficialTier::Restricted),
    ("orders/cancel", OfficialTier::Restricted),
    ("orders/cancel_all", OfficialTier::Restricted),
];

/// Registry for [`EXCHANGE_ENDPOINTS`] over `limiters`.
pub fn exchange_registry(limiters: &OfficialLimiters) -> EndpointLimiterRegistry {
    limiters.registry(EXCHANGE_ENDPOINTS)
}

/// Tower layer gating requests by endpoint against the exchange table.
pub fn exchange_layer(limiters: &OfficialLimiters) -> AdmissionLayer {
    AdmissionLayer::new(Arc::new(exchange_registry(limiters)))
}

/// Gates arbitrary async calls through the limiter of the endpoint they hit.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<EndpointLimiterRegistry>,
    ctx: AcquireContext,
}

impl Dispatcher {
    pub fn new(registry: Arc<EndpointLimiterRegistry>) -> Self {
        Self { registry, ctx: AcquireContext::background() }
    }

    /// Context every wait races, e.g. one cancelled when the client shuts down.
    pub fn with_context(mut self, ctx: AcquireContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Run `call` once `endpoint`'s limiter admits it.
    ///
    /// `Ok(None)` means the limiter skipped the call and `call` never ran.
    pub async fn dispatch<F, Fut, T>(&self, endpoint: &str, call: F) -> Result<Option<T>, AcquireError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.dispatch_weighted(endpoint, 1, None, call).await
    }

    /// Like [`dispatch`](Self::dispatch) for calls costing `units`, with an optional
    /// per-call behavior.
    pub async fn dispatch_weighted<F, Fut, T>(
        &self,
        endpoint: &str,
        units: u32,
        behavior: Option<Behavior>,
        call: F,
    ) -> Result<Option<T>, AcquireError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.registry.resolve(endpoint).acquire(&self.ctx, units, behavior).await? {
            Admission::Granted => Ok(Some(call().await)),
            Admission::Skipped => Ok(None),
        }
    }
}

/// One [`OfficialLimiters`] set per API key.
///
/// The exchange counts quota per key, so every client built for the same key must draw from
/// the same limiters while different keys stay independent.
#[derive(Debug)]
pub struct KeyedLimiters {
    behavior: Behavior,
    sets: Mutex<HashMap<String, OfficialLimiters>>,
}

impl KeyedLimiters {
    pub fn new(behavior: Behavior) -> Self {
        Self { behavior, sets: Mutex::new(HashMap::new()) }
    }

    /// Limiters for `api_key`, created on first use.
    pub fn limiters(&self, api_key: &str) -> OfficialLimiters {
        let mut sets = self.sets.lock().unwrap_or_else(PoisonError::into_inner);
        sets.entry(api_key.to_string())
            .or_insert_with(|| OfficialLimiters::new(self.behavior))
            .clone()
    }

    /// A dispatcher for a new client using `api_key`.
    pub fn dispatcher(&self, api_key: &str) -> Dispatcher {
        Dispatcher::new(Arc::new(exchange_registry(&self.limiters(api_key))))
    }
}
