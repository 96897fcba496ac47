//! Protocol servers for GhostText.
//!
//! An [`HttpStatusServer`] answers the browser extension's handshake
//! request by spinning up a dedicated [`WebSocketServer`] on an
//! ephemeral port; each accepted socket becomes a
//! [`session::SessionHandle`]-controlled connection that decodes frames
//! with the `ghosttext-wire` codec and delivers complete text messages
//! to the registered subscriber.

pub mod http_server;
pub mod session;
pub mod subscription;
pub mod ws_server;

pub use http_server::{ConnectHooks, HttpStatusServer};
pub use session::{CloseHandler, MessageHandler, SessionHandle, SessionState};
pub use subscription::Subscription;
pub use ws_server::WebSocketServer;

/// Send queue capacity per session. GhostText traffic is one small JSON
/// message per keystroke burst, so a short queue is plenty.
pub const SEND_BUFFER_SIZE: usize = 64;

/// Errors produced by the servers.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("wire error: {0}")]
    Wire(#[from] ghosttext_wire::WireError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `send_text` outside the Open state. Recoverable: the caller
    /// drops the message (this protocol has no reconnect).
    #[error("session is not open")]
    SessionNotOpen,

    #[error("timed out waiting for the client handshake")]
    HandshakeTimeout,

    #[error("session server not ready within {0:?}")]
    NotReady(std::time::Duration),
}
