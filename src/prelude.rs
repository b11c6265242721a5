//! Convenient re-exports for common quota-gate types.
pub use crate::{
    context::{AcquireContext, CancelHandle},
    error::{AcquireError, ConfigError},
    rate_limit::{
        Admission, AdmissionLayer, Behavior, Limiter, MultiTierLimiter, RateLimit,
        SingleTierLimiter, WindowKind,
    },
    registry::EndpointLimiterRegistry,
    tiers::{OfficialLimiters, OfficialTier},
};
