//! Byte-level codecs for the GhostText server.
//!
//! Pure transforms over byte buffers, no I/O: a minimal HTTP/1.1
//! request/response codec for the handshake endpoint ([`http`]), the
//! RFC 6455 frame codec ([`frame`]), and the WebSocket upgrade
//! handshake ([`handshake`]).

pub mod frame;
pub mod handshake;
pub mod http;

pub use frame::{Frame, MessageAssembler, OpCode, Role};
pub use http::{Request, Response};

/// Errors produced while decoding wire data.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Not enough bytes buffered yet; retry after the next read.
    #[error("incomplete frame: need {needed} more bytes")]
    Incomplete { needed: usize },

    /// The HTTP request could not be parsed. Unrecoverable for the
    /// connection.
    #[error("malformed HTTP request: {0}")]
    Malformed(String),

    /// An RFC 6455 violation. The connection must be closed with a
    /// protocol-error close code.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The request parsed fine but is not a WebSocket upgrade. This is
    /// a routing branch, not a failure: callers fall back to plain HTTP
    /// handling.
    #[error("not a websocket upgrade request")]
    NotAWebSocketRequest,
}
