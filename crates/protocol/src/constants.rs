//! Protocol constants and timings shared by the servers.

use std::time::Duration;

/// Version reported in the HTTP handshake reply.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default port for the HTTP handshake endpoint.
pub const DEFAULT_SERVER_PORT: u16 = 4001;

/// Maximum size of a reassembled WebSocket message.
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum size of a buffered HTTP request (the handshake requests
/// involved here are a few hundred bytes).
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// How long the status server waits for a freshly spawned WebSocket
/// server to report it is listening before failing the handshake.
pub const READY_WAIT: Duration = Duration::from_secs(3);

/// How long a connection may sit in the Connecting state before the
/// session gives up on it.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a session waits for the peer's close frame after initiating
/// the close handshake.
pub const CLOSE_WAIT: Duration = Duration::from_secs(5);

/// How long a closing session waits for queued frames to flush.
pub const FLUSH_WAIT: Duration = Duration::from_secs(1);
