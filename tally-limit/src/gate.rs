use std::num::NonZeroU32;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tracing::trace;

use super::CounterStore;
use super::Identity;
use super::RateLimitPolicy;
use super::StoreError;

const DEFAULT_TOKEN_MAX_REQUESTS: NonZeroU32 = NonZeroU32::new(3).unwrap();
const DEFAULT_TOKEN_WINDOW_SECS: NonZeroU64 = NonZeroU64::new(1).unwrap();
const DEFAULT_IP_MAX_REQUESTS: NonZeroU32 = NonZeroU32::new(2).unwrap();
const DEFAULT_IP_WINDOW_SECS: NonZeroU64 = NonZeroU64::new(1).unwrap();

const DEFAULT_TOKEN_KEY_PREFIX: &str = "/rl/token/";
const DEFAULT_IP_KEY_PREFIX: &str = "/rl/ip/";

/// The outcome of one rate evaluation. Ephemeral, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The caller is within its quota; the request may proceed.
    Allow,
    /// The caller exhausted its quota for the current window.
    Reject {
        /// Upper bound on how long the caller should wait before retrying.
        /// A fixed window resets wholesale, so the true wait is at most one
        /// window length.
        retry_after: Duration,
    },
    /// The request carried no identity at all. No counter was touched.
    MalformedRequest,
}

/// The rate decision engine.
///
/// Immutable after construction and safe to share across any number of
/// concurrent evaluations: it holds no per-request state and delegates all
/// shared mutable state to the [`CounterStore`]. Each evaluation performs at
/// most one suspending store call and is otherwise pure comparison.
///
/// The store handle is shared, never owned exclusively; the gate neither
/// closes nor reconfigures it.
#[derive(Debug)]
pub struct RateGate {
    token_policy: RateLimitPolicy,
    ip_policy: RateLimitPolicy,
    token_key_prefix: String,
    ip_key_prefix: String,
    store: Arc<dyn CounterStore>,
}

impl RateGate {
    /// Creates a gate over `store` with the default policies (token: 3/1s,
    /// IP: 2/1s) and key prefixes (`/rl/token/`, `/rl/ip/`).
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            token_policy: default_token_policy(),
            ip_policy: default_ip_policy(),
            token_key_prefix: DEFAULT_TOKEN_KEY_PREFIX.to_owned(),
            ip_key_prefix: DEFAULT_IP_KEY_PREFIX.to_owned(),
            store,
        }
    }

    /// Creates a gate configured from the process environment.
    ///
    /// Reads `MAX_REQUESTS_PER_TOKEN`, `TIME_PER_TOKEN` (seconds),
    /// `MAX_REQUESTS_PER_IP`, `TIME_PER_IP` (seconds), `TOKEN_KEY_PREFIX`
    /// and `IP_KEY_PREFIX`. Unset or unparseable variables fall back to the
    /// defaults of [`RateGate::new`].
    pub fn from_env(store: Arc<dyn CounterStore>) -> Self {
        let token_policy = RateLimitPolicy::new(
            env_parsed("MAX_REQUESTS_PER_TOKEN").unwrap_or(DEFAULT_TOKEN_MAX_REQUESTS),
            env_parsed("TIME_PER_TOKEN").unwrap_or(DEFAULT_TOKEN_WINDOW_SECS),
        );
        let ip_policy = RateLimitPolicy::new(
            env_parsed("MAX_REQUESTS_PER_IP").unwrap_or(DEFAULT_IP_MAX_REQUESTS),
            env_parsed("TIME_PER_IP").unwrap_or(DEFAULT_IP_WINDOW_SECS),
        );

        let mut gate = Self::new(store)
            .with_token_policy(token_policy)
            .with_ip_policy(ip_policy);
        if let Ok(prefix) = std::env::var("TOKEN_KEY_PREFIX") {
            gate = gate.with_token_key_prefix(prefix);
        }
        if let Ok(prefix) = std::env::var("IP_KEY_PREFIX") {
            gate = gate.with_ip_key_prefix(prefix);
        }
        gate
    }

    /// Replaces the policy applied to token-identified callers.
    pub fn with_token_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.token_policy = policy;
        self
    }

    /// Replaces the policy applied to IP-identified callers.
    pub fn with_ip_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.ip_policy = policy;
        self
    }

    /// Replaces the namespace prefix for token counters.
    ///
    /// Prefixes keep the token and IP namespaces disjoint, so identical
    /// literal values can never collide across the two policies.
    pub fn with_token_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.token_key_prefix = prefix.into();
        self
    }

    /// Replaces the namespace prefix for IP counters.
    pub fn with_ip_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ip_key_prefix = prefix.into();
        self
    }

    /// The policy applied to token-identified callers.
    pub fn token_policy(&self) -> RateLimitPolicy {
        self.token_policy
    }

    /// The policy applied to IP-identified callers.
    pub fn ip_policy(&self) -> RateLimitPolicy {
        self.ip_policy
    }

    /// Evaluates one request given its extracted token and IP.
    ///
    /// Resolves the identity (token over IP, exclusively), bumps the matching
    /// counter with the policy's window as TTL, and compares the returned
    /// count against the policy's limit with a strict `>`: a caller is
    /// allowed exactly `max_requests` requests per window and rejected from
    /// `max_requests + 1` onward.
    ///
    /// A request with no resolvable identity yields
    /// [`Decision::MalformedRequest`] without any store call.
    ///
    /// # Errors
    ///
    /// Propagates [`StoreError`] untouched. A store failure is never folded
    /// into an allow or a reject, and the gate performs no retries; whether
    /// to fail open or closed is the boundary layer's call.
    pub async fn evaluate(
        &self,
        token: Option<&str>,
        ip: Option<&str>,
    ) -> Result<Decision, StoreError> {
        let Some(identity) = Identity::resolve(token, ip) else {
            trace!("request carried neither token nor ip");
            return Ok(Decision::MalformedRequest);
        };

        let (policy, key) = match &identity {
            Identity::Token(token) => (
                self.token_policy,
                format!("{}{}", self.token_key_prefix, token),
            ),
            Identity::Ip(ip) => (self.ip_policy, format!("{}{}", self.ip_key_prefix, ip)),
        };

        let count = self.store.bump(&key, policy.window()).await?;
        trace!(key = %key, count, limit = policy.max_requests(), "bumped counter");

        if count > policy.max_requests() {
            debug!(key = %key, count, limit = policy.max_requests(), "rate limit exceeded");
            Ok(Decision::Reject {
                retry_after: policy.window(),
            })
        } else {
            Ok(Decision::Allow)
        }
    }
}

fn default_token_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(DEFAULT_TOKEN_MAX_REQUESTS, DEFAULT_TOKEN_WINDOW_SECS)
}

fn default_ip_policy() -> RateLimitPolicy {
    RateLimitPolicy::new(DEFAULT_IP_MAX_REQUESTS, DEFAULT_IP_WINDOW_SECS)
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
