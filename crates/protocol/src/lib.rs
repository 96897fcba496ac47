//! Wire protocol types for GhostText browser-editor communication.
//!
//! The browser extension and the editor exchange JSON payloads over
//! WebSocket text frames: the browser pushes the text box content
//! ([`SyncMessage`]), the editor pushes edits back ([`EditorUpdate`]).
//! The initial HTTP handshake is answered with a [`HandshakeReply`].

pub mod constants;
pub mod messages;

pub use constants::PROTOCOL_VERSION;
pub use messages::{EditorUpdate, HandshakeReply, Selection, SyncMessage};
