//! Per-client HTTP request throttling.
//!
//! Applies to every route and is independent of the per-plant logging
//! interval enforced during ingestion. Clients are keyed by the same resolved
//! address the ingestion allow-list sees, so loggers behind a trusted proxy
//! each get their own bucket.
//!
//! Governor's GCRA limiter with `RATE_LIMIT_RPS` sustained requests per
//! second and `RATE_LIMIT_BURST` burst capacity. A throttled request gets a
//! 429 error envelope with `Retry-After` and `X-RateLimit-Limit` headers.
//!
//! Buckets are keyed by parsed IP address. A forwarded value that is not an
//! address falls back to the socket peer, so header garbage cannot mint new
//! buckets. Idle buckets are dropped by [`RateLimitLayer::prune`], which the
//! application state runs every [`RATE_LIMIT_PRUNE_INTERVAL`].

use std::future::{Future, ready};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Request, Response};
use axum::response::IntoResponse;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::debug;

use super::ip::resolve_client_ip;
use super::proxy::TrustedProxies;
use crate::error::AppError;

pub const RATE_LIMIT_HEADER: &str = "x-ratelimit-limit";

/// How often idle client buckets are dropped.
pub const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("RATE_LIMIT_RPS must be positive; set it to 0 to disable the limiter")]
    ZeroRps,
}

type ClientLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Tower layer throttling requests per resolved client address.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<ClientLimiter>,
    rps: u32,
    proxies: Arc<TrustedProxies>,
}

impl RateLimitLayer {
    /// A zero `burst` is raised to one.
    pub fn new(
        rps: u32,
        burst: u32,
        proxies: Arc<TrustedProxies>,
    ) -> Result<Self, RateLimitError> {
        let per_second = NonZeroU32::new(rps).ok_or(RateLimitError::ZeroRps)?;
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        Ok(Self {
            limiter: Arc::new(RateLimiter::keyed(quota)),
            rps,
            proxies,
        })
    }

    /// Drop buckets that are back at full capacity and release their memory.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Number of client buckets currently held.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

/// Bucket for a request: the resolved address when it parses, else the peer.
///
/// Requests with neither share the unspecified-address bucket.
fn bucket_key(resolved: &str, peer: Option<SocketAddr>) -> IpAddr {
    resolved
        .parse::<IpAddr>()
        .ok()
        .or_else(|| peer.map(|addr| addr.ip()))
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |ip| ip.to_canonical())
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
            rps: self.rps,
            proxies: Arc::clone(&self.proxies),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<ClientLimiter>,
    rps: u32,
    proxies: Arc<TrustedProxies>,
}

impl<S> RateLimitService<S> {
    fn throttled(&self, retry_after_secs: u64) -> Response<Body> {
        let mut response = AppError::TooManyRequests { retry_after_secs }.into_response();
        response
            .headers_mut()
            .insert(RATE_LIMIT_HEADER, HeaderValue::from(self.rps));
        response
    }
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let resolved = resolve_client_ip(req.headers(), peer, &self.proxies);
        let client = bucket_key(&resolved, peer);

        match self.limiter.check_key(&client) {
            Ok(()) => Box::pin(self.inner.call(req)),
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                let retry_after_secs = (wait.as_secs() + u64::from(wait.subsec_nanos() > 0)).max(1);

                debug!(
                    client = %client,
                    path = %req.uri().path(),
                    retry_after_secs,
                    "HTTP rate limit exceeded"
                );

                let response = self.throttled(retry_after_secs);
                Box::pin(ready(Ok(response)))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::Router;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    fn app(rps: u32, burst: u32, proxies: TrustedProxies) -> Router {
        with_layer(RateLimitLayer::new(rps, burst, Arc::new(proxies)).unwrap())
    }

    fn with_layer(layer: RateLimitLayer) -> Router {
        Router::new().route("/", get(|| async { "ok" })).layer(layer)
    }

    fn from(peer: &str, forwarded: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let peer: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        request
    }

    #[test]
    fn test_zero_rps_is_an_error() {
        let result = RateLimitLayer::new(0, 10, Arc::default());
        assert!(matches!(result, Err(RateLimitError::ZeroRps)));
    }

    #[tokio::test]
    async fn test_throttled_request_gets_error_envelope() {
        let app = app(1, 1, TrustedProxies::default());

        let first = app.clone().oneshot(from("203.0.113.1:5000", None)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(from("203.0.113.1:5001", None)).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("retry-after"));
        assert_eq!(second.headers()[RATE_LIMIT_HEADER], "1");

        let bytes = to_bytes(second.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "too_many_requests");
    }

    #[tokio::test]
    async fn test_clients_behind_trusted_proxy_have_separate_buckets() {
        let app = app(1, 1, TrustedProxies::from_config(&["10.0.0.0/8".to_string()]));

        for logger in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
            let response = app
                .clone()
                .oneshot(from("10.0.0.5:443", Some(logger)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{logger}");
        }
    }

    #[tokio::test]
    async fn test_untrusted_peer_cannot_rotate_forwarded_addresses() {
        let app = app(1, 1, TrustedProxies::from_config(&["10.0.0.0/8".to_string()]));

        let first = app
            .clone()
            .oneshot(from("203.0.113.7:9000", Some("198.51.100.1")))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(from("203.0.113.7:9000", Some("198.51.100.2")))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_bucket_key_prefers_parsed_address() {
        let peer: Option<SocketAddr> = Some("192.0.2.1:4000".parse().unwrap());

        assert_eq!(bucket_key("198.51.100.4", peer), "198.51.100.4".parse::<IpAddr>().unwrap());
        assert_eq!(bucket_key("not-an-ip", peer), "192.0.2.1".parse::<IpAddr>().unwrap());
        assert_eq!(bucket_key("::ffff:192.0.2.9", None), "192.0.2.9".parse::<IpAddr>().unwrap());
        assert_eq!(bucket_key("unknown", None), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[tokio::test]
    async fn test_garbage_forwarded_values_share_the_peer_bucket() {
        let layer = RateLimitLayer::new(1000, 1000, Arc::default()).unwrap();
        let app = with_layer(layer.clone());

        for i in 0..200 {
            let forwarded = format!("not-an-ip-{i}");
            let response = app
                .clone()
                .oneshot(from("203.0.113.50:7000", Some(&forwarded)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(layer.tracked_clients(), 1);
    }

    #[tokio::test]
    async fn test_prune_drops_idle_buckets() {
        let layer = RateLimitLayer::new(1000, 1, Arc::default()).unwrap();
        let app = with_layer(layer.clone());

        for i in 1..=20 {
            let peer = format!("198.51.100.{i}:9000");
            app.clone().oneshot(from(&peer, None)).await.unwrap();
        }
        assert_eq!(layer.tracked_clients(), 20);

        // At 1000 rps a single-request bucket refills within a millisecond.
        tokio::time::sleep(Duration::from_millis(50)).await;
        layer.prune();

        assert_eq!(layer.tracked_clients(), 0);
    }
}
