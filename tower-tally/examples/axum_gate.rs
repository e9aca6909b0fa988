use axum::{
    Router, error_handling::HandleErrorLayer, http::StatusCode, response::IntoResponse,
    routing::get,
};
use std::sync::Arc;
use std::time::Duration;
use tally_limit::{MemoryCounterStore, RateGate};
use tower::BoxError;
use tower::ServiceBuilder;
use tower_tally::{GateError, RateGateLayer};

#[tokio::main]
async fn main() {
    // 1. Build the gate: policies and key prefixes come from the
    //    environment (MAX_REQUESTS_PER_TOKEN, TIME_PER_IP, ...), with the
    //    in-memory store standing in for a shared Redis.
    let store = Arc::new(MemoryCounterStore::new());
    let gate = Arc::new(RateGate::from_env(store));

    // 2. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Tally!" }))
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_gate_error))
                // 2. The middle layer: introduces BoxError
                .layer(RateGateLayer::new(gate).with_bump_timeout(Duration::from_millis(500)))
                // 3. Converts the Route's Infallible to BoxError so that
                //    RateGateLayer is happy wrapping it.
                .map_err(BoxError::from),
        );

    // 3. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await.unwrap();
}

/// The signature must match BoxError -> IntoResponse
async fn handle_gate_error(err: tower::BoxError) -> impl IntoResponse {
    if let Some(gate_err) = err.downcast_ref::<GateError>() {
        gate_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
