//! HTTP middleware and request extractors.
//!
//! - **Rate Limiting**: per-client token bucket (`governor`), trusted-proxy aware
//! - **Owner Authentication**: bearer token extractor for owner endpoints
//! - **Client IP**: source address resolution used by ingestion
//! - **Trusted Proxies**: CIDR blocks allowed to forward client addresses
//! - **Request ID**: generation and propagation for log correlation
//!
//! ```text
//! Request → Rate Limiter → Request ID → Trace → Handler
//!              ↓                                  ↓
//!          429 Too Many            OwnerIdentity (401) / ClientIp
//! ```

pub mod auth;
pub mod ip;
pub mod proxy;
pub mod rate_limit;
pub mod request_id;

pub use auth::{Claims, OwnerAuth, OwnerIdentity};
pub use ip::{ClientIp, UNKNOWN_IP, resolve_client_ip};
pub use proxy::{Cidr, CidrError, TrustedProxies};
pub use rate_limit::{RATE_LIMIT_PRUNE_INTERVAL, RateLimitError, RateLimitLayer};
pub use request_id::RequestIdLayer;
