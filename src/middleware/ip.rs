//! Client IP resolution shared by the HTTP rate limiter and the ingestion
//! endpoint.
//!
//! # Sources
//!
//! Checked in order, first match wins:
//!
//! 1. `X-Forwarded-For` (first entry of the comma-separated list)
//! 2. `X-Real-IP`
//! 3. The socket peer address (`ConnectInfo<SocketAddr>`)
//! 4. [`UNKNOWN_IP`]
//!
//! # Security Warning: IP Spoofing Risk
//!
//! Forwarding headers are client-controlled. The ingestion allow-list is only
//! as strong as the proxy in front of this service, so deploy behind a
//! reverse proxy that overwrites (not appends to) these headers:
//!
//! ```nginx
//! proxy_set_header X-Real-IP $remote_addr;
//! proxy_set_header X-Forwarded-For $remote_addr;
//! ```
//!
//! With `TRUSTED_PROXIES` configured, forwarding headers are honoured only
//! when the socket peer lies inside one of the trusted CIDR ranges. Requests
//! from any other peer are attributed to the peer address itself.
//!
//! ```text
//!   headers ─┐
//!            ├─► resolve_client_ip ─► strip port / brackets ─► Cow<'static, str>
//!   peer ────┘          ▲
//!                       └── TrustedProxies
//! ```

use std::borrow::Cow;
use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use tracing::debug;

use super::proxy::TrustedProxies;
use crate::state::AppState;

/// Fallback when no client address can be determined.
///
/// Never parses as an IP, so ingestion from such a request is refused.
pub const UNKNOWN_IP: &str = "unknown";

/// Where a raw address was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtractedIp<'a> {
    FromXff(&'a str),
    FromRealIp(&'a str),
    NotFound,
}

#[inline]
fn extract_ip_from_headers(headers: &HeaderMap) -> ExtractedIp<'_> {
    // Format: "client, proxy1, proxy2"
    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
    {
        return ExtractedIp::FromXff(first_ip.trim());
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
    {
        return ExtractedIp::FromRealIp(value.trim());
    }

    ExtractedIp::NotFound
}

/// Drop a port suffix or IPv6 brackets, leaving other text untouched.
///
/// `"203.0.113.5:8080"` and `"[2001:db8::1]:443"` yield the bare address;
/// anything that is not a socket address is returned as-is.
pub fn strip_port(raw: &str) -> &str {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        let host = match addr {
            SocketAddr::V4(_) => raw.rsplit_once(':').map_or(raw, |(host, _)| host),
            SocketAddr::V6(_) => raw
                .rsplit_once("]:")
                .map_or(raw, |(host, _)| host.trim_start_matches('[')),
        };
        return host;
    }
    raw.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(raw)
}

/// Resolve the address a request is attributed to.
///
/// See the module documentation for the order of sources.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: &TrustedProxies,
) -> Cow<'static, str> {
    if let Some(peer) = peer
        && trusted_proxies.is_enabled()
        && !trusted_proxies.contains(peer.ip())
    {
        if !matches!(extract_ip_from_headers(headers), ExtractedIp::NotFound) {
            debug!(peer = %peer, "Ignoring forwarding headers from untrusted peer");
        }
        return Cow::Owned(peer.ip().to_string());
    }

    match extract_ip_from_headers(headers) {
        ExtractedIp::FromXff(ip) | ExtractedIp::FromRealIp(ip) => {
            Cow::Owned(strip_port(ip).to_string())
        }
        ExtractedIp::NotFound => match peer {
            Some(peer) => Cow::Owned(peer.ip().to_string()),
            None => Cow::Borrowed(UNKNOWN_IP),
        },
    }
}

/// Extractor yielding the resolved client address of a request.
///
/// The value is not validated; the authorizer normalizes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl ClientIp {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(Self(
            resolve_client_ip(&parts.headers, peer, &state.trusted_proxies).into_owned(),
        ))
    }
}
