//! Client address extraction for middleware logging.
//!
//! The address reported alongside a threat signal is the peer socket address
//! recorded by axum's `ConnectInfo` extension. Proxy headers are only
//! consulted when the deployment opts in with `TRUST_PROXY_HEADERS`, since
//! any client can set them.
//!
//! # Resolution Order
//!
//! ```text
//! ConnectInfo<SocketAddr>  ──found──▶ peer IP
//!        │ missing
//!        ▼
//! trust_proxy_headers?  ──no──▶ "unknown"
//!        │ yes
//!        ▼
//! X-Forwarded-For (first hop) ▶ X-Real-IP ▶ "unknown"
//! ```

use std::borrow::Cow;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;

/// Fallback value when no client address can be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Address found in a forwarding header, with its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForwardedIp<'a> {
    /// First entry of `X-Forwarded-For`.
    FromXff(&'a str),
    /// Value of `X-Real-IP`.
    FromRealIp(&'a str),
    NotFound,
}

#[inline]
fn forwarded_ip<B>(req: &Request<B>) -> ForwardedIp<'_> {
    // Format: "client, proxy1, proxy2" - the first entry is the client
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(first_ip) = value.split(',').next()
        && !first_ip.trim().is_empty()
    {
        return ForwardedIp::FromXff(first_ip.trim());
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && !value.trim().is_empty()
    {
        return ForwardedIp::FromRealIp(value.trim());
    }

    ForwardedIp::NotFound
}

/// Resolve the client network address of a request.
///
/// Returns a borrowed [`UNKNOWN_IP`] when nothing is available, owned
/// strings otherwise.
#[inline]
pub fn client_addr<B>(req: &Request<B>, trust_proxy_headers: bool) -> Cow<'static, str> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Cow::Owned(addr.ip().to_string());
    }

    if !trust_proxy_headers {
        return Cow::Borrowed(UNKNOWN_IP);
    }

    match forwarded_ip(req) {
        ForwardedIp::FromXff(ip) | ForwardedIp::FromRealIp(ip) => Cow::Owned(ip.to_string()),
        ForwardedIp::NotFound => Cow::Borrowed(UNKNOWN_IP),
    }
}
