use std::sync::Arc;
use std::time::Duration;

use http::HeaderName;
use tower::Layer;

use tally_limit::RateGate;

use crate::service::RateGateService;

/// Header carrying the caller's API token, as the original deployment names
/// it.
pub const DEFAULT_TOKEN_HEADER: HeaderName = HeaderName::from_static("api_key");

/// Header carrying the proxy chain; only the left-most hop is used.
pub const DEFAULT_FORWARDED_HEADER: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Applies a [`RateGate`] to every request passing through the service.
#[derive(Clone, Debug)]
pub struct RateGateLayer {
    gate: Arc<RateGate>,
    token_header: HeaderName,
    forwarded_header: HeaderName,
    bump_timeout: Option<Duration>,
}

impl RateGateLayer {
    /// Creates a layer around a shared gate, reading the `api_key` and
    /// `x-forwarded-for` headers.
    pub fn new(gate: Arc<RateGate>) -> Self {
        RateGateLayer {
            gate,
            token_header: DEFAULT_TOKEN_HEADER,
            forwarded_header: DEFAULT_FORWARDED_HEADER,
            bump_timeout: None,
        }
    }

    /// Read the API token from a different header.
    pub fn with_token_header(mut self, header: HeaderName) -> Self {
        self.token_header = header;
        self
    }

    /// Read the client IP from a different forwarding header.
    pub fn with_forwarded_header(mut self, header: HeaderName) -> Self {
        self.forwarded_header = header;
        self
    }

    /// Bound the counter store call with a deadline.
    ///
    /// A bump that misses the deadline is surfaced as a store failure; the
    /// request is never held back waiting on an unresponsive store.
    pub fn with_bump_timeout(mut self, timeout: Duration) -> Self {
        self.bump_timeout = Some(timeout);
        self
    }
}

impl<S> Layer<S> for RateGateLayer {
    type Service = RateGateService<S>;

    fn layer(&self, service: S) -> Self::Service {
        let mut svc = RateGateService::new(service, self.gate.clone())
            .with_token_header(self.token_header.clone())
            .with_forwarded_header(self.forwarded_header.clone());
        if let Some(timeout) = self.bump_timeout {
            svc = svc.with_bump_timeout(timeout);
        }
        svc
    }
}
