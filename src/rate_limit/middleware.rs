use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;
use tracing::debug;

use crate::context::AcquireContext;
use crate::error::AcquireError;
use crate::rate_limit::Admission;
use crate::registry::EndpointLimiterRegistry;

/// Requests that name the API endpoint they are about to call.
pub trait EndpointRequest {
    fn endpoint(&self) -> &str;
}

impl EndpointRequest for String {
    fn endpoint(&self) -> &str {
        self
    }
}

impl EndpointRequest for &'static str {
    fn endpoint(&self) -> &str {
        self
    }
}

/// Errors from [`AdmissionService`].
#[derive(Debug, Clone)]
pub enum AdmissionError<E> {
    /// The endpoint's limiter refused the call.
    Denied(AcquireError),
    /// The call was admitted and the inner service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for AdmissionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied(e) => write!(f, "request not admitted: {}", e),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AdmissionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Denied(e) => Some(e),
            Self::Inner(e) => Some(e),
        }
    }
}

impl<E> AdmissionError<E> {
    /// The admission error, if the limiter refused the call.
    pub fn as_denied(&self) -> Option<&AcquireError> {
        match self {
            Self::Denied(e) => Some(e),
            Self::Inner(_) => None,
        }
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Denied(_) => None,
        }
    }
}

/// A layer that gates every request through the endpoint's limiter.
///
/// Each request costs one unit from the limiter its endpoint resolves to. Skipped requests
/// never reach the inner service and complete with `Ok(None)`.
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    registry: Arc<EndpointLimiterRegistry>,
    ctx: AcquireContext,
}

impl AdmissionLayer {
    /// Create a new admission layer over `registry`.
    pub fn new(registry: Arc<EndpointLimiterRegistry>) -> Self {
        Self { registry, ctx: AcquireContext::background() }
    }

    /// Context applied to every wait, e.g. one cancelled on shutdown.
    pub fn with_context(mut self, ctx: AcquireContext) -> Self {
        self.ctx = ctx;
        self
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService {
            inner: service,
            registry: self.registry.clone(),
            ctx: self.ctx.clone(),
        }
    }
}

/// Middleware service that acquires quota before forwarding each request.
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    registry: Arc<EndpointLimiterRegistry>,
    ctx: AcquireContext,
}

impl<S, Req> Service<Req> for AdmissionService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
    Req: EndpointRequest + Send + 'static,
{
    type Response = Option<S::Response>;
    type Error = AdmissionError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.registry.resolve(req.endpoint()).clone();
        let ctx = self.ctx.clone();
        // Keep the instance that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match limiter.acquire(&ctx, 1, None).await {
                Ok(Admission::Granted) => inner.call(req).await.map(Some).map_err(AdmissionError::Inner),
                Ok(Admission::Skipped) => {
                    debug!(target: "quota_gate::middleware", endpoint = req.endpoint(), "request skipped by limiter");
                    Ok(None)
                }
                Err(e) => Err(AdmissionError::Denied(e)),
            }
        })
    }
}
