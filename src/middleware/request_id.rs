//! Request correlation ids.
//!
//! Every request carries an `X-Request-Id`. A client-supplied id is kept when
//! it is short printable ASCII; otherwise a UUIDv4 is generated. The id is
//! written back on the request (so handlers can log it next to store errors)
//! and echoed on the response.
//!
//! ```bash
//! curl -H "X-Request-Id: logger-7f3a" -X POST http://localhost:3000/plants/log/<apiID>
//! ```

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{HeaderMap, Request, Response};
use tower::{Layer, Service};
use tracing::{Span, debug};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest client-supplied id that is passed through.
pub const MAX_REQUEST_ID_LENGTH: usize = 128;

#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let value = accepted_request_id(req.headers()).unwrap_or_else(generate_request_id);
        req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());

        if let Ok(id) = value.to_str() {
            Span::current().record("request_id", id);
            debug!(request_id = id, "Processing request");
        }

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
            Ok(response)
        })
    }
}

/// The client's id, if it is acceptable as-is.
fn accepted_request_id(headers: &HeaderMap) -> Option<HeaderValue> {
    let value = headers.get(REQUEST_ID_HEADER)?;
    let text = value.to_str().ok()?;

    let acceptable = !text.is_empty()
        && text.len() <= MAX_REQUEST_ID_LENGTH
        && text.bytes().all(|b| b.is_ascii_graphic());
    acceptable.then(|| value.clone())
}

fn generate_request_id() -> HeaderValue {
    // A hyphenated UUID is always a valid header value.
    HeaderValue::from_str(&Uuid::new_v4().to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

/// The request id set by [`RequestIdLayer`], for log correlation.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}
