//! JSON message bodies exchanged over the protocol.

use serde::{Deserialize, Serialize};

use crate::constants::PROTOCOL_VERSION;

/// A selection range, in character offsets into the document text.
///
/// `start <= end` for well-formed ranges; a caret is a zero-width range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    /// A zero-width selection (caret) at the given offset.
    pub fn caret(offset: usize) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    /// Returns `true` if the range is well-formed (`start <= end`).
    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }
}

/// Inbound message from the browser: the current state of a text box.
///
/// `title` and `url` describe the page hosting the text box; only the
/// first message of a session uses them to create the editable surface,
/// but the browser sends them on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub text: String,
    #[serde(default)]
    pub selections: Vec<Selection>,
}

impl SyncMessage {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Outbound message from the editor: updated text and selections.
///
/// The browser does not need `title`/`url` echoed back, so they are
/// absent by design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditorUpdate {
    pub text: String,
    pub selections: Vec<Selection>,
}

impl EditorUpdate {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Body of the HTTP handshake response.
///
/// Field names are fixed by the browser extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeReply {
    #[serde(rename = "WebSocketPort")]
    pub web_socket_port: u16,
    #[serde(rename = "ProtocolVersion")]
    pub protocol_version: u32,
}

impl HandshakeReply {
    pub fn new(web_socket_port: u16) -> Self {
        Self {
            web_socket_port,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}
