//! # tally-limit
//!
//! `tally-limit` provides fixed-window rate limiting backed by a shared
//! counter store.
//!
//! ## Core Philosophy
//!
//! The decision logic carries no mutable state of its own. Every piece of
//! shared state lives behind the [`CounterStore`] contract, whose single
//! operation ([`CounterStore::bump`]) atomically increments a keyed counter
//! and arms its expiry in the same indivisible step. Because the store
//! linearizes increments, any number of processes can evaluate the same
//! caller concurrently without lost updates or lost TTLs.
//!
//! ## Key Concepts
//!
//! * **Fixed Window**: a counter resets entirely when its TTL elapses; a
//!   caller gets `max_requests` allowances per window and is rejected from
//!   `max_requests + 1` onward.
//! * **Identity Priority**: callers are classified by API token first, source
//!   IP second. Selection is exclusive, so a token-bearing request never
//!   touches the IP counter.
//! * **Store Contract**: any backend offering an atomic
//!   increment-with-conditional-expire satisfies [`CounterStore`]; the bundled
//!   [`MemoryCounterStore`] is sufficient for tests and single-process use.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tally_limit::Decision;
//! use tally_limit::MemoryCounterStore;
//! use tally_limit::RateGate;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let gate = RateGate::new(Arc::new(MemoryCounterStore::new()));
//!
//! let decision = gate.evaluate(Some("token123"), None).await.unwrap();
//! assert_eq!(decision, Decision::Allow);
//! # });
//! ```

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

mod gate;
mod memory;
mod policy;

pub use gate::Decision;
pub use gate::RateGate;
pub use memory::MemoryCounterStore;
pub use policy::Identity;
pub use policy::RateLimitPolicy;

/// Failures surfaced by a [`CounterStore`].
///
/// A store failure is never a rate decision. Callers must propagate it
/// rather than mapping it onto an allow or a reject.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the atomic bump could not complete.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The store answered, but not with the integer count the bump contract
    /// promises. Surfaced instead of being coerced to zero, which would
    /// silently turn every malformed reply into an allow.
    #[error("counter store returned an unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The bump did not complete within the caller's deadline.
    #[error("counter store call timed out")]
    Timeout,
}

/// The contract every counter backend must satisfy.
///
/// Implementations must be shareable across tasks and safe under arbitrary
/// concurrent callers, including callers in other processes when the store
/// is networked.
#[async_trait]
pub trait CounterStore: Debug + Send + Sync {
    /// Atomically increments the counter at `key` and returns the
    /// post-increment count.
    ///
    /// When the pre-increment value is absent (the first touch of a fresh
    /// window) the store must arm the key's expiry to `ttl` within the same
    /// atomic unit of work as the increment. Arming the TTL separately opens
    /// a race where two first-touches leave the key without any expiry at
    /// all, and the counter never resets.
    ///
    /// `key` must be non-empty and `ttl` at least one second; both are
    /// guaranteed by [`RateGate`], which derives them from a validated
    /// [`RateLimitPolicy`] and a non-empty identity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the bump could not complete. On failure no
    /// partial state may be observable: either the whole bump happened or
    /// none of it did.
    async fn bump(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;
}
