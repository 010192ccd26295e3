//! Client IP resolution from trusted reverse-proxy headers.
//!
//! Priority: `CF-Connecting-IP` (only when [`ProxyTrust::cf_connecting_ip`]
//! is enabled) -> rightmost `X-Forwarded-For` (appended by the proxy in front
//! of us) -> socket peer address.
//!
//! ```ignore
//! async fn handler(ClientIp(ip): ClientIp, ...) -> impl IntoResponse { ... }
//! ```

use crate::state::AppState;
use crate::web::error::ApiError;
use axum::extract::connect_info::MockConnectInfo;
use axum::extract::{ConnectInfo, FromRequestParts};
use http::Extensions;
use http::request::Parts;
use std::net::{IpAddr, SocketAddr};

/// Which client-supplied proxy headers are believed.
///
/// `X-Forwarded-For` is always consulted (rightmost entry only). Headers a
/// client can set end-to-end stay off unless the deployment guarantees the
/// edge overwrites them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyTrust {
    pub cf_connecting_ip: bool,
}

/// The resolved client IP address.
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub IpAddr);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = peer_addr(&parts.extensions);

        resolve_client_ip(&parts.headers, peer, state.proxy_trust)
            .map(ClientIp)
            .ok_or(ApiError::UnknownClient)
    }
}

/// Socket peer from `ConnectInfo`, or from `MockConnectInfo` when the router
/// is driven without a real listener.
pub fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .or_else(|| {
            extensions
                .get::<MockConnectInfo<SocketAddr>>()
                .map(|MockConnectInfo(addr)| *addr)
        })
}

/// Resolve the client address from proxy headers, falling back to `peer`.
pub fn resolve_client_ip(
    headers: &http::HeaderMap,
    peer: Option<SocketAddr>,
    trust: ProxyTrust,
) -> Option<IpAddr> {
    if trust.cf_connecting_ip
        && let Some(ip) =
            header_str(headers, "cf-connecting-ip").and_then(|s| s.trim().parse().ok())
    {
        return Some(ip);
    }

    if let Some(xff) = header_str(headers, "x-forwarded-for")
        && let Some(ip) = xff
            .rsplit(',')
            .next()
            .map(str::trim)
            .and_then(|s| s.parse::<IpAddr>().ok())
    {
        return Some(ip);
    }

    peer.map(|addr| addr.ip())
}

pub fn header_str<'a>(headers: &'a http::HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
