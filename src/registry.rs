//! Registry mapping API endpoints to the limiter that governs them.
//!
//! Built once when a client is constructed and read-only afterwards, so lookups need no
//! locking. Several endpoints usually map to one shared limiter: they draw from one quota.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::rate_limit::{Limiter, TierSnapshot};

/// Endpoint id -> limiter, with a fallback for endpoints nobody registered.
#[derive(Clone)]
pub struct EndpointLimiterRegistry {
    routes: HashMap<String, Arc<dyn Limiter>>,
    default: Arc<dyn Limiter>,
}

impl fmt::Debug for EndpointLimiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut endpoints: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        endpoints.sort_unstable();
        f.debug_struct("EndpointLimiterRegistry")
            .field("endpoints", &endpoints)
            .field("default", &self.default)
            .finish()
    }
}

impl EndpointLimiterRegistry {
    /// Start a registry whose unregistered endpoints fall back to `default`.
    pub fn builder(default: Arc<dyn Limiter>) -> RegistryBuilder {
        RegistryBuilder { routes: HashMap::new(), default }
    }

    /// Limiter responsible for `endpoint`; the default limiter when it is not registered.
    pub fn resolve(&self, endpoint: &str) -> &Arc<dyn Limiter> {
        self.routes.get(endpoint).unwrap_or(&self.default)
    }

    pub fn is_registered(&self, endpoint: &str) -> bool {
        self.routes.contains_key(endpoint)
    }

    pub fn default_limiter(&self) -> &Arc<dyn Limiter> {
        &self.default
    }

    /// Number of explicitly registered endpoints.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Tier state per registered endpoint, sorted by endpoint id.
    pub fn snapshot(&self) -> Vec<(String, Vec<TierSnapshot>)> {
        let mut entries: Vec<(String, Vec<TierSnapshot>)> =
            self.routes.iter().map(|(k, v)| (k.clone(), v.snapshot())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

/// Collects routes for an [`EndpointLimiterRegistry`].
pub struct RegistryBuilder {
    routes: HashMap<String, Arc<dyn Limiter>>,
    default: Arc<dyn Limiter>,
}

impl RegistryBuilder {
    /// Route `endpoint` to `limiter`, replacing any earlier route for it.
    ///
    /// Replacement is deliberate: the last registration wins and a warning is logged, since
    /// two tables naming the same endpoint usually means one of them is stale.
    pub fn route(mut self, endpoint: impl Into<String>, limiter: Arc<dyn Limiter>) -> Self {
        let endpoint = endpoint.into();
        if self.routes.contains_key(&endpoint) {
            warn!(target: "quota_gate::registry", endpoint = %endpoint, "endpoint route replaced; last registration wins");
        }
        self.routes.insert(endpoint, limiter);
        self
    }

    /// Route every endpoint in `endpoints` to one shared `limiter`.
    pub fn route_all<I, E>(mut self, endpoints: I, limiter: &Arc<dyn Limiter>) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<String>,
    {
        for endpoint in endpoints {
            self = self.route(endpoint, limiter.clone());
        }
        self
    }

    pub fn build(self) -> EndpointLimiterRegistry {
        EndpointLimiterRegistry { routes: self.routes, default: self.default }
    }
}
