//! # Tower Tally
//!
//! `tower-tally` gates HTTP requests through a
//! [`tally_limit::RateGate`](https://docs.rs/tally-limit) before they reach
//! the wrapped service.
//!
//! ## How requests are classified
//!
//! The middleware reads the caller's API token from the `api_key` header and
//! the originating client IP from the first hop of `x-forwarded-for` (both
//! header names are configurable). The gate applies its token policy when a
//! token is present, its IP policy otherwise, and refuses requests carrying
//! neither.
//!
//! ## Outcomes
//!
//! 1. **Allowed**: the request proceeds to the inner service untouched.
//! 2. **Rate limited** ([`GateError::RateLimited`]): the caller's window is
//!    exhausted; with the `axum` feature this becomes `429` plus a
//!    `Retry-After` header.
//! 3. **No identity** ([`GateError::MissingIdentity`]): `400`.
//! 4. **Store failure** ([`GateError::Store`]): `500`. The stack fails
//!    closed: a counter store outage blocks traffic rather than waving it
//!    through uncounted.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`GateError`], allowing automatic
//!   conversion to HTTP status codes (429, 400, 500).

mod error;
mod layer;
mod service;
mod utils;

#[cfg(test)]
mod tests;

pub use error::GateError;
pub use layer::DEFAULT_FORWARDED_HEADER;
pub use layer::DEFAULT_TOKEN_HEADER;
pub use layer::RateGateLayer;
pub use service::RateGateService;
pub use utils::ServiceBuilderExt;
