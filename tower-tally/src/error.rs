/// Errors produced by the rate gate middleware.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GateError {
    /// The caller exhausted its quota for the current window.
    ///
    /// The duration is an upper bound on when the window resets.
    /// When the `axum` feature is enabled, this converts to
    /// `429 Too Many Requests` with a `Retry-After` header.
    #[error("rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// How long the caller should wait before retrying, at most.
        retry_after: std::time::Duration,
    },

    /// The request carried neither an API token nor a forwarded client IP,
    /// so there is nothing to rate the caller by.
    ///
    /// When the `axum` feature is enabled, this converts to `400 Bad Request`.
    #[error("no valid token or client IP found on the request")]
    MissingIdentity,

    /// The counter store could not complete the bump.
    ///
    /// Surfaced rather than mapped onto an allow or a reject, so a store
    /// outage blocks traffic (fail-closed). When the `axum` feature is
    /// enabled, this converts to `500 Internal Server Error`.
    #[error("counter store failure: {0}")]
    Store(String),
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for GateError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, msg, headers) = match self {
            Self::RateLimited { retry_after } => {
                let secs = retry_after.as_secs().max(1);
                let val = axum::http::HeaderValue::from(secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    self.to_string(),
                    Some((axum::http::header::RETRY_AFTER, val)),
                )
            }
            Self::MissingIdentity => (StatusCode::BAD_REQUEST, self.to_string(), None),
            Self::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string(), None),
        };

        let mut response = (status, msg).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}
