use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use futures::future::BoxFuture;
use http::HeaderMap;
use http::HeaderName;
use http::Request;
use tokio::time::timeout;
use tower::BoxError;
use tower::Service;

use tally_limit::Decision;
use tally_limit::RateGate;
use tally_limit::StoreError;

use crate::error::GateError;
use crate::layer::DEFAULT_FORWARDED_HEADER;
use crate::layer::DEFAULT_TOKEN_HEADER;

/// A service that evaluates every request against a shared [`RateGate`]
/// before handing it to the inner service.
///
/// Decisions map onto the error domain: a rejection becomes
/// [`GateError::RateLimited`], a request with no identity becomes
/// [`GateError::MissingIdentity`], and a store failure becomes
/// [`GateError::Store`]. Only allowed requests ever reach the inner service.
#[derive(Clone, Debug)]
pub struct RateGateService<S> {
    inner: S,
    gate: Arc<RateGate>,
    token_header: HeaderName,
    forwarded_header: HeaderName,
    bump_timeout: Option<Duration>,
}

impl<S> RateGateService<S> {
    /// Wraps `inner` with the gate, using the default header names.
    pub fn new(inner: S, gate: Arc<RateGate>) -> Self {
        Self {
            inner,
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
    pub fn with_bump_timeout(mut self, timeout: Duration) -> Self {
        self.bump_timeout = Some(timeout);
        self
    }
}

impl<S, B> Service<Request<B>> for RateGateService<S>
where
    S: Service<Request<B>, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send,
    S::Response: Send,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<S::Response, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let token = header_str(req.headers(), &self.token_header).map(ToOwned::to_owned);
        let ip = forwarded_client(req.headers(), &self.forwarded_header).map(ToOwned::to_owned);

        // The readiness we signalled belongs to `self.inner`; move that
        // instance into the future and leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let gate = Arc::clone(&self.gate);
        let bump_timeout = self.bump_timeout;

        Box::pin(async move {
            let evaluation = match bump_timeout {
                Some(limit) => timeout(limit, gate.evaluate(token.as_deref(), ip.as_deref()))
                    .await
                    .unwrap_or(Err(StoreError::Timeout)),
                None => gate.evaluate(token.as_deref(), ip.as_deref()).await,
            };

            match evaluation {
                Ok(Decision::Allow) => inner.call(req).await,
                Ok(Decision::Reject { retry_after }) => {
                    Err(BoxError::from(GateError::RateLimited { retry_after }))
                }
                Ok(Decision::MalformedRequest) => Err(BoxError::from(GateError::MissingIdentity)),
                Err(err) => Err(BoxError::from(GateError::Store(err.to_string()))),
            }
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// The left-most hop of a comma-separated proxy chain: the originating
/// client. Later hops are ignored. Trimming and the empty-value check are
/// the gate's job.
fn forwarded_client<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    header_str(headers, name).and_then(|chain| chain.split(',').next())
}
