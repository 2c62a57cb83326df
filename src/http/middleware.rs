//! Admission middleware.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{instrument, warn};

use crate::ratelimit::{CounterStore, RateLimiter};

/// Header carrying the original client address when behind a proxy.
pub const FORWARDED_FOR_HEADER: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Header carrying the client's API token (sent as `API_KEY`).
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("api_key");

/// Body of the response sent to rate limited clients.
pub const RATE_LIMITED_BODY: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Body of the response sent when the store cannot decide.
pub const STORE_FAILURE_BODY: &str = "Internal Server Error";

/// Who a request comes from, as far as admission is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Client address (peer host or first forwarded entry)
    pub address: String,
    /// API token, empty when absent
    pub token: String,
}

impl ClientIdentity {
    /// Extract the identity from the peer address and request headers.
    ///
    /// The first `X-Forwarded-For` entry replaces the peer host when present.
    pub fn extract(peer: Option<SocketAddr>, headers: &HeaderMap) -> Self {
        let forwarded = headers
            .get(&FORWARDED_FOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|first| !first.is_empty());

        let address = match forwarded {
            Some(first) => first.to_string(),
            None => peer.map(|addr| addr.ip().to_string()).unwrap_or_default(),
        };

        let token = headers
            .get(&API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Self { address, token }
    }

    /// Extract the identity from a request.
    pub fn from_request(request: &Request) -> Self {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self::extract(peer, request.headers())
    }
}

/// Admit or reject a request before it reaches the application.
///
/// Mount with [`axum::middleware::from_fn_with_state`].
#[instrument(
    skip_all,
    fields(
        method = %request.method(),
        path = %request.uri().path()
    )
)]
pub async fn enforce<S: CounterStore + 'static>(
    State(limiter): State<RateLimiter<S>>,
    request: Request,
    next: Next,
) -> Response {
    let identity = ClientIdentity::from_request(&request);

    match limiter.check(&identity.address, &identity.token).await {
        Ok(true) => next.run(request).await,
        Ok(false) => (StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_BODY).into_response(),
        Err(e) => {
            warn!(
                error = %e,
                address = %identity.address,
                "Admission check failed, rejecting request"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, STORE_FAILURE_BODY).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.10:52100".parse().unwrap())
    }

    #[test]
    fn test_peer_host_is_default_address() {
        let identity = ClientIdentity::extract(peer(), &HeaderMap::new());
        assert_eq!(identity.address, "192.0.2.10");
        assert_eq!(identity.token, "");
    }

    #[test]
    fn test_ipv6_peer_host() {
        let peer = Some("[2001:db8::1]:443".parse().unwrap());
        let identity = ClientIdentity::extract(peer, &HeaderMap::new());
        assert_eq!(identity.address, "2001:db8::1");
    }

    #[test]
    fn test_forwarded_for_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("9.9.9.9, 1.1.1.1"));

        let identity = ClientIdentity::extract(peer(), &headers);
        assert_eq!(identity.address, "9.9.9.9");
    }

    #[test]
    fn test_empty_forwarded_entry_keeps_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static(" , 1.1.1.1"));

        let identity = ClientIdentity::extract(peer(), &headers);
        assert_eq!(identity.address, "192.0.2.10");
    }

    #[test]
    fn test_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("abc-123"));

        let identity = ClientIdentity::extract(peer(), &headers);
        assert_eq!(identity.token, "abc-123");
        assert_eq!(identity.address, "192.0.2.10");
    }

    #[test]
    fn test_missing_peer() {
        let identity = ClientIdentity::extract(None, &HeaderMap::new());
        assert_eq!(identity.address, "");
    }
}
