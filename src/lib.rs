#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # quota-gate
//!
//! Client-side admission control for APIs that publish per-endpoint call quotas.
//!
//! Every outgoing call first asks a [`Limiter`] for permission. A limiter enforces one or more
//! `(count, period)` quotas and, when the call does not fit, either waits, fails, or quietly
//! skips it depending on its [`Behavior`].
//!
//! ## Features
//!
//! - **Single-tier limiters** over one fixed or sliding window
//! - **Multi-tier limiters** that admit a call only when every tier has room
//! - **Cancellable waits** through [`AcquireContext`] (cancel handle or deadline)
//! - **Endpoint registry** routing endpoint ids to shared limiters, with a fallback
//! - **Official tiers** preset for the published quota table
//! - **Tower middleware** gating any `Service` by endpoint
//!
//! ## Quick Start
//!
//! ```rust
//! use quota_gate::{AcquireContext, Admission, Behavior, OfficialLimiters, OfficialTier};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiters = OfficialLimiters::new(Behavior::Block);
//!     let registry = limiters.registry(&[
//!         ("market/ticker", OfficialTier::Bulk),
//!         ("wallet/withdraw", OfficialTier::Wallet),
//!     ]);
//!
//!     let ctx = AcquireContext::background();
//!     let admission = registry.resolve("wallet/withdraw").acquire(&ctx, 1, None).await;
//!     assert_eq!(admission, Ok(Admission::Granted));
//! }
//! ```

pub mod clock;
#[cfg(feature = "serde")]
pub mod config;
pub mod context;
pub mod error;
pub mod prelude;
pub mod rate_limit;
pub mod registry;
pub mod sleeper;
pub mod tiers;

// Re-exports
pub use clock::{Clock, MonotonicClock};
#[cfg(feature = "serde")]
pub use config::{LimiterConfig, RegistryConfig, TierConfig};
pub use context::{AcquireContext, CancelHandle};
pub use error::{AcquireError, ConfigError};
pub use rate_limit::{
    Admission, AdmissionError, AdmissionLayer, AdmissionService, Behavior, EndpointRequest,
    Limiter, MultiTierLimiter, RateLimit, SingleTierLimiter, TierSnapshot, WindowKind,
};
pub use registry::{EndpointLimiterRegistry, RegistryBuilder};
pub use sleeper::{Sleeper, TokioSleeper, TrackingSleeper};
pub use tiers::{OfficialLimiters, OfficialTier};
