use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::Ready;
use futures::future::ready;
use http::Request;
use http::Response;
use tower::BoxError;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;

use tally_limit::CounterStore;
use tally_limit::MemoryCounterStore;
use tally_limit::RateGate;
use tally_limit::RateLimitPolicy;
use tally_limit::StoreError;

use super::*;

#[derive(Clone)]
struct MockService {
    pub count: Arc<AtomicUsize>,
}

impl Service<Request<()>> for MockService {
    type Response = Response<()>;
    type Error = BoxError;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: Request<()>) -> Self::Future {
        self.count.fetch_add(1, Ordering::SeqCst);
        ready(Ok(Response::new(())))
    }
}

/// A store that always fails, standing in for an unreachable server.
#[derive(Debug)]
struct FailingStore;

#[async_trait]
impl CounterStore for FailingStore {
    async fn bump(&self, _key: &str, _ttl: Duration) -> Result<u64, StoreError> {
        Err(StoreError::Unavailable("store down".to_owned()))
    }
}

/// A store whose bump never completes, standing in for a hung connection.
#[derive(Debug)]
struct StalledStore;

#[async_trait]
impl CounterStore for StalledStore {
    async fn bump(&self, _key: &str, _ttl: Duration) -> Result<u64, StoreError> {
        std::future::pending().await
    }
}

fn policy(max: u32) -> RateLimitPolicy {
    RateLimitPolicy::new(max.try_into().unwrap(), 60u64.try_into().unwrap())
}

fn gated(token_max: u32, ip_max: u32) -> (RateGateService<MockService>, Arc<AtomicUsize>) {
    let gate = Arc::new(
        RateGate::new(Arc::new(MemoryCounterStore::new()))
            .with_token_policy(policy(token_max))
            .with_ip_policy(policy(ip_max)),
    );
    let count = Arc::new(AtomicUsize::new(0));
    let service = RateGateLayer::new(gate).layer(MockService {
        count: Arc::clone(&count),
    });
    (service, count)
}

fn request(token: Option<&str>, forwarded: Option<&str>) -> Request<()> {
    let mut builder = Request::builder().uri("/");
    if let Some(token) = token {
        builder = builder.header("api_key", token);
    }
    if let Some(forwarded) = forwarded {
        builder = builder.header("x-forwarded-for", forwarded);
    }
    builder.body(()).unwrap()
}

async fn call(
    service: &mut RateGateService<MockService>,
    req: Request<()>,
) -> Result<Response<()>, BoxError> {
    service.ready().await.unwrap().call(req).await
}

fn gate_error(err: &BoxError) -> &GateError {
    err.downcast_ref().expect("middleware errors are GateError")
}

#[tokio::test]
async fn token_limit_allows_then_rejects() {
    let (mut service, count) = gated(2, 5);

    assert!(call(&mut service, request(Some("token123"), None)).await.is_ok());
    assert!(call(&mut service, request(Some("token123"), None)).await.is_ok());

    let err = call(&mut service, request(Some("token123"), None))
        .await
        .unwrap_err();
    assert!(matches!(
        gate_error(&err),
        GateError::RateLimited {
            retry_after
        } if *retry_after == Duration::from_secs(60)
    ));
    // The rejected request never reached the inner service.
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn ip_limit_counts_only_the_first_forwarded_hop() {
    let (mut service, _) = gated(5, 2);

    assert!(
        call(&mut service, request(None, Some("1.2.3.4, 10.0.0.1")))
            .await
            .is_ok()
    );
    assert!(
        call(&mut service, request(None, Some("1.2.3.4, 172.16.0.9")))
            .await
            .is_ok()
    );

    // Same originating client, different later hops: same counter.
    let err = call(&mut service, request(None, Some("1.2.3.4")))
        .await
        .unwrap_err();
    assert!(matches!(gate_error(&err), GateError::RateLimited { .. }));
}

#[tokio::test]
async fn missing_identity_is_a_bad_request() {
    let (mut service, count) = gated(2, 2);

    let err = call(&mut service, request(None, None)).await.unwrap_err();
    assert!(matches!(gate_error(&err), GateError::MissingIdentity));

    // An empty first hop is the same as no IP at all.
    let err = call(&mut service, request(None, Some(", 10.0.0.1")))
        .await
        .unwrap_err();
    assert!(matches!(gate_error(&err), GateError::MissingIdentity));

    let err = call(&mut service, request(Some("   "), None))
        .await
        .unwrap_err();
    assert!(matches!(gate_error(&err), GateError::MissingIdentity));

    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn token_takes_priority_over_ip() {
    let (mut service, _) = gated(1, 2);

    let both = || request(Some("token123"), Some("1.2.3.4"));

    assert!(call(&mut service, both()).await.is_ok());

    // The token quota (1) governs even though the IP quota (2) has room.
    let err = call(&mut service, both()).await.unwrap_err();
    assert!(matches!(gate_error(&err), GateError::RateLimited { .. }));
}

#[tokio::test]
async fn store_failure_blocks_the_request() {
    let gate = Arc::new(RateGate::new(Arc::new(FailingStore)));
    let count = Arc::new(AtomicUsize::new(0));
    let mut service = RateGateLayer::new(gate).layer(MockService {
        count: Arc::clone(&count),
    });

    let err = call(&mut service, request(Some("token123"), None))
        .await
        .unwrap_err();
    assert!(matches!(gate_error(&err), GateError::Store(_)));

    let err = call(&mut service, request(None, Some("1.2.3.4")))
        .await
        .unwrap_err();
    assert!(matches!(gate_error(&err), GateError::Store(_)));

    // Fail-closed: nothing got through while the store was down.
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_store_hits_the_bump_timeout() {
    let gate = Arc::new(RateGate::new(Arc::new(StalledStore)));
    let count = Arc::new(AtomicUsize::new(0));
    let mut service = RateGateLayer::new(gate)
        .with_bump_timeout(Duration::from_millis(50))
        .layer(MockService {
            count: Arc::clone(&count),
        });

    let err = call(&mut service, request(Some("token123"), None))
        .await
        .unwrap_err();
    match gate_error(&err) {
        GateError::Store(msg) => assert!(msg.contains("timed out")),
        other => panic!("expected a store failure, got {other:?}"),
    }
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn service_builder_extension_stacks_the_gate() {
    let gate = Arc::new(
        RateGate::new(Arc::new(MemoryCounterStore::new())).with_token_policy(policy(1)),
    );
    let count = Arc::new(AtomicUsize::new(0));
    let mut service = tower::ServiceBuilder::new()
        .rate_gate(gate)
        .service(MockService {
            count: Arc::clone(&count),
        });

    assert!(call(&mut service, request(Some("token123"), None)).await.is_ok());

    let err = call(&mut service, request(Some("token123"), None))
        .await
        .unwrap_err();
    assert!(matches!(gate_error(&err), GateError::RateLimited { .. }));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn custom_header_names_are_honoured() {
    let gate = Arc::new(
        RateGate::new(Arc::new(MemoryCounterStore::new())).with_token_policy(policy(1)),
    );
    let count = Arc::new(AtomicUsize::new(0));
    let mut service = RateGateLayer::new(gate)
        .with_token_header(http::HeaderName::from_static("x-api-key"))
        .layer(MockService {
            count: Arc::clone(&count),
        });

    let req = Request::builder()
        .uri("/")
        .header("x-api-key", "token123")
        .body(())
        .unwrap();
    assert!(call(&mut service, req).await.is_ok());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
