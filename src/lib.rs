//! Country Admission Gateway
//!
//! A per-client request admission control layer that sits in front of an
//! HTTP service. Each inbound request is resolved to a country of origin,
//! matched against a configured rate rule, and either forwarded upstream or
//! rejected with 429 based on a rolling count of recent admissions.

pub mod config;
pub mod error;
pub mod gateway;
pub mod geo;
pub mod limiter;
pub mod metrics;
pub mod store;

// Re-export main types
pub use config::{Rule, RuleSet};
pub use error::{GateError, Result};
pub use limiter::{Decision, RateLimitDecider};
