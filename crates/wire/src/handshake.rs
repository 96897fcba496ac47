//! WebSocket upgrade handshake (RFC 6455 §4).

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha1::{Digest, Sha1};

use crate::WireError;
use crate::http::{Request, Response};

/// The GUID appended to the client key in the `Sec-WebSocket-Accept`
/// calculation (RFC 6455 §1.3).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Returns `true` if the request asks to upgrade to WebSocket:
/// `Upgrade: websocket`, a `Connection` header containing the `upgrade`
/// token, and a `Sec-WebSocket-Key`.
pub fn is_websocket_upgrade(req: &Request) -> bool {
    let upgrade = req
        .header("upgrade")
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = req.header("connection").is_some_and(|v| {
        v.split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    });
    upgrade && connection && req.header("sec-websocket-key").is_some()
}

/// Computes the `Sec-WebSocket-Accept` value: Base64(SHA-1(key + GUID)).
/// Deterministic, no randomness.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Builds the `101 Switching Protocols` response for a computed accept
/// key.
pub fn build_handshake_response(accept_key: &str) -> Response {
    Response::new("101 Switching Protocols")
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Accept", accept_key)
}

/// Validates an upgrade request and produces the switching response.
///
/// Returns [`WireError::NotAWebSocketRequest`] when the request is
/// plain HTTP; the caller decides whether that is the status endpoint
/// or an error.
pub fn upgrade(req: &Request) -> Result<Response, WireError> {
    if !is_websocket_upgrade(req) {
        return Err(WireError::NotAWebSocketRequest);
    }
    // is_websocket_upgrade checked the key is present.
    let key = req.header("sec-websocket-key").unwrap_or_default();
    Ok(build_handshake_response(&compute_accept_key(key)))
}
