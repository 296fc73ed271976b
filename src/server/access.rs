//! Allow-list middleware for the HTTP server.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::{error::ApiError, AppState};

/// Header consulted when the service runs behind a trusted proxy
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Client address that passed the allow list, for handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

/// Address to check: the peer, or the first `X-Forwarded-For` hop when the
/// proxy is trusted and the header is present.
pub fn client_address(headers: &HeaderMap, peer: SocketAddr, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|first| !first.is_empty());
        if let Some(first) = forwarded {
            return first.to_string();
        }
    }
    peer.ip().to_string()
}

/// Rejects requests whose client address is not allow-listed.
pub async fn ip_gate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let candidate = client_address(request.headers(), peer, state.trust_proxy);

    let addr = match candidate.parse::<IpAddr>() {
        Ok(addr) => addr,
        Err(_) => {
            warn!(
                address = %candidate,
                path = %request.uri().path(),
                "Denied request with unparseable client address"
            );
            return Err(ApiError::Forbidden);
        }
    };

    if !state.policy.is_allowed_addr(addr) {
        warn!(
            address = %addr,
            path = %request.uri().path(),
            "Denied request from address not in allow list"
        );
        return Err(ApiError::Forbidden);
    }

    request.extensions_mut().insert(ClientAddr(addr));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "192.0.2.7:40000".parse().unwrap()
    }

    fn forwarded(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_peer_address_by_default() {
        let headers = forwarded("10.0.0.1");
        assert_eq!(client_address(&headers, peer(), false), "192.0.2.7");
    }

    #[test]
    fn test_forwarded_first_hop_when_trusted() {
        let headers = forwarded(" 10.0.0.1 , 172.16.0.1");
        assert_eq!(client_address(&headers, peer(), true), "10.0.0.1");
    }

    #[test]
    fn test_trusted_without_header_uses_peer() {
        assert_eq!(client_address(&HeaderMap::new(), peer(), true), "192.0.2.7");
        assert_eq!(client_address(&forwarded(""), peer(), true), "192.0.2.7");
    }
}
