use std::num::NonZeroU32;
use std::num::NonZeroU64;
use std::time::Duration;

/// An immutable limit/window pair.
///
/// Two independent policies exist per gate: one for token-identified callers
/// and one for IP-identified callers. The non-zero constructor arguments make
/// a zero limit or a zero-length window unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    max_requests: NonZeroU32,
    window: Duration,
}

impl RateLimitPolicy {
    /// Creates a policy allowing `max_requests` per fixed window of
    /// `window_secs` seconds.
    pub fn new(max_requests: NonZeroU32, window_secs: NonZeroU64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs.get()),
        }
    }

    /// The number of requests allowed within one window. A caller is
    /// rejected starting with request `max_requests + 1`.
    pub fn max_requests(&self) -> u64 {
        u64::from(self.max_requests.get())
    }

    /// The window length, which is also the TTL armed on the counter's
    /// first increment.
    pub fn window(&self) -> Duration {
        self.window
    }
}

/// The caller-classification value used as the counting key's variable
/// component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// An API token taken from the request.
    Token(String),
    /// The originating client IP, as reported by the routing layer.
    Ip(String),
}

impl Identity {
    /// Resolves a request's identity from its extracted token and IP.
    ///
    /// Selection is exclusive and ordered: a non-empty token wins outright,
    /// a non-empty IP is the fallback, and a request carrying neither has no
    /// identity at all. Values are trimmed first, so whitespace-only headers
    /// count as absent.
    pub fn resolve(token: Option<&str>, ip: Option<&str>) -> Option<Self> {
        if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
            return Some(Identity::Token(token.to_owned()));
        }
        if let Some(ip) = ip.map(str::trim).filter(|ip| !ip.is_empty()) {
            return Some(Identity::Ip(ip.to_owned()));
        }
        None
    }

    /// The raw identity value, without its namespace.
    pub fn value(&self) -> &str {
        match self {
            Identity::Token(token) => token,
            Identity::Ip(ip) => ip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_wins_over_ip() {
        let identity = Identity::resolve(Some("token123"), Some("1.2.3.4"));
        assert_eq!(identity, Some(Identity::Token("token123".to_owned())));
    }

    #[test]
    fn ip_is_the_fallback() {
        let identity = Identity::resolve(None, Some("1.2.3.4"));
        assert_eq!(identity, Some(Identity::Ip("1.2.3.4".to_owned())));

        let identity = Identity::resolve(Some("   "), Some("1.2.3.4"));
        assert_eq!(identity, Some(Identity::Ip("1.2.3.4".to_owned())));
    }

    #[test]
    fn neither_means_no_identity() {
        assert_eq!(Identity::resolve(None, None), None);
        assert_eq!(Identity::resolve(Some(""), Some("  ")), None);
    }

    #[test]
    fn values_are_trimmed() {
        let identity = Identity::resolve(Some("  token123  "), None);
        assert_eq!(identity, Some(Identity::Token("token123".to_owned())));
    }

    #[test]
    fn policy_accessors() {
        let policy = RateLimitPolicy::new(
            NonZeroU32::new(3).unwrap(),
            NonZeroU64::new(60).unwrap(),
        );
        assert_eq!(policy.max_requests(), 3);
        assert_eq!(policy.window(), Duration::from_secs(60));
    }
}
