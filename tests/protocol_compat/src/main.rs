fn main() {
    println!("Run `cargo test -p protocol-compat` to execute protocol compatibility tests.");
}

/// End-to-end tests driving the real servers the way the browser
/// extension does: an HTTP handshake for a port, then a WebSocket
/// session. tokio-tungstenite acts as an independent RFC 6455 client;
/// raw TCP plus the `ghosttext-wire` codec covers the cases a
/// conformant client cannot produce.
#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;

    use ghosttext_editor::{ConnectOptions, Editor, MemoryEditor, SyncBridge, SyntaxMap};
    use ghosttext_protocol::messages::HandshakeReply;
    use ghosttext_protocol::{EditorUpdate, Selection, SyncMessage};
    use ghosttext_server::HttpStatusServer;
    use ghosttext_wire::frame::CLOSE_PROTOCOL_ERROR;
    use ghosttext_wire::{Frame, OpCode, Role, WireError};

    const SETTLE: Duration = Duration::from_millis(100);

    struct Fixture {
        editor: Arc<MemoryEditor>,
        server: Arc<HttpStatusServer>,
    }

    async fn start_server() -> Fixture {
        let editor = Arc::new(MemoryEditor::new(SyntaxMap {
            host_to_syntax: BTreeMap::from([
                ("github.com".to_string(), "markdown".to_string()),
            ]),
            default_syntax: "plaintext".to_string(),
        }));
        let bridge = Arc::new(SyncBridge::new(
            Arc::clone(&editor),
            ConnectOptions::default(),
        ));
        let server = HttpStatusServer::bind(0, bridge).await.unwrap();
        Fixture { editor, server }
    }

    /// Performs the HTTP handshake and returns the session port.
    async fn handshake(port: u16) -> u16 {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "got: {text}");

        let body = text.split("\r\n\r\n").nth(1).unwrap();
        let reply: HandshakeReply = serde_json::from_str(body).unwrap();
        assert_eq!(reply.protocol_version, 1);
        reply.web_socket_port
    }

    type WsClient = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn connect_ws(session_port: u16) -> WsClient {
        let url = format!("ws://127.0.0.1:{session_port}/");
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        ws
    }

    fn sync_message(text: &str) -> String {
        SyncMessage {
            title: "Issue #42".into(),
            url: "https://github.com/x/y/issues/42".into(),
            text: text.into(),
            selections: vec![Selection { start: 0, end: 2 }],
        }
        .to_json()
        .unwrap()
    }

    #[tokio::test]
    async fn full_sync_session() {
        let fixture = start_server().await;
        let session_port = handshake(fixture.server.port()).await;

        let mut ws = connect_ws(session_port).await;
        ws.send(Message::Text(sync_message("hello from the browser").into()))
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;

        // The first message created and filled the surface.
        let surface = fixture.editor.latest_surface().unwrap();
        let snapshot = fixture.editor.surface(surface).unwrap();
        assert_eq!(snapshot.title, "Issue #42");
        assert_eq!(snapshot.text, "hello from the browser");
        assert_eq!(snapshot.selections, vec![Selection { start: 0, end: 2 }]);
        assert_eq!(snapshot.syntax, "markdown");
        assert_eq!(fixture.editor.observer_count(), 1);

        // A local edit flows back as an EditorUpdate without
        // title/url.
        fixture.editor.replace_surface_content(
            surface,
            "edited in the editor",
            &[Selection::caret(5)],
        );
        let received = tokio::time::timeout(Duration::from_secs(1), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(json) = received else {
            panic!("expected a text message, got {received:?}");
        };
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("title").is_none());
        assert!(value.get("url").is_none());
        let update = EditorUpdate::from_json(&json).unwrap();
        assert_eq!(update.text, "edited in the editor");
        assert_eq!(update.selections, vec![Selection::caret(5)]);

        fixture.server.stop();
    }

    #[tokio::test]
    async fn inbound_replace_does_not_echo() {
        let fixture = start_server().await;
        let session_port = handshake(fixture.server.port()).await;

        let mut ws = connect_ws(session_port).await;
        ws.send(Message::Text(sync_message("first").into()))
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;

        // A second inbound message replaces the surface content...
        ws.send(Message::Text(sync_message("second").into()))
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;

        let surface = fixture.editor.latest_surface().unwrap();
        assert_eq!(fixture.editor.surface(surface).unwrap().text, "second");

        // ...and triggers exactly zero outbound sends.
        let echo = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
        assert!(echo.is_err(), "replace echoed back: {echo:?}");

        fixture.server.stop();
    }

    #[tokio::test]
    async fn empty_selections_put_caret_at_end() {
        let fixture = start_server().await;
        let session_port = handshake(fixture.server.port()).await;

        let mut ws = connect_ws(session_port).await;
        let message = SyncMessage {
            title: "t".into(),
            url: "https://example.com/".into(),
            text: "abc".into(),
            selections: Vec::new(),
        };
        ws.send(Message::Text(message.to_json().unwrap().into()))
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;

        let surface = fixture.editor.latest_surface().unwrap();
        let snapshot = fixture.editor.surface(surface).unwrap();
        assert_eq!(snapshot.selections, vec![Selection::caret(3)]);
        assert_eq!(snapshot.syntax, "plaintext");

        fixture.server.stop();
    }

    #[tokio::test]
    async fn concurrent_sessions_are_isolated() {
        let fixture = start_server().await;

        let first_port = handshake(fixture.server.port()).await;
        let second_port = handshake(fixture.server.port()).await;
        assert_ne!(first_port, second_port);

        let mut first = connect_ws(first_port).await;
        let mut second = connect_ws(second_port).await;

        first
            .send(Message::Text(sync_message("tab one").into()))
            .await
            .unwrap();
        second
            .send(Message::Text(sync_message("tab two").into()))
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;
        assert_eq!(fixture.editor.surface_count(), 2);

        // Closing the first session must not affect the second.
        first.close(None).await.unwrap();
        tokio::time::sleep(SETTLE).await;

        second
            .send(Message::Text(sync_message("tab two, updated").into()))
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;

        let texts: Vec<String> = fixture
            .editor
            .surfaces()
            .into_iter()
            .map(|(_, surface)| surface.text)
            .collect();
        assert!(
            texts.contains(&"tab two, updated".to_string()),
            "surfaces: {texts:?}"
        );

        fixture.server.stop();
    }

    #[tokio::test]
    async fn close_unregisters_the_observer() {
        let fixture = start_server().await;
        let session_port = handshake(fixture.server.port()).await;

        let mut ws = connect_ws(session_port).await;
        ws.send(Message::Text(sync_message("bound").into()))
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;
        assert_eq!(fixture.editor.observer_count(), 1);

        ws.close(None).await.unwrap();
        tokio::time::sleep(SETTLE).await;
        assert_eq!(fixture.editor.observer_count(), 0);

        fixture.server.stop();
    }

    #[tokio::test]
    async fn malformed_json_is_dropped_without_closing() {
        let fixture = start_server().await;
        let session_port = handshake(fixture.server.port()).await;

        let mut ws = connect_ws(session_port).await;
        ws.send(Message::Text("{not json".to_string().into()))
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;
        assert_eq!(fixture.editor.surface_count(), 0);

        // The connection survived: a valid message still lands.
        ws.send(Message::Text(sync_message("recovered").into()))
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;
        assert_eq!(fixture.editor.surface_count(), 1);

        fixture.server.stop();
    }

    #[tokio::test]
    async fn ping_is_answered_with_identical_pong() {
        let fixture = start_server().await;
        let session_port = handshake(fixture.server.port()).await;

        let mut ws = connect_ws(session_port).await;
        ws.send(Message::Ping(b"probe".to_vec().into()))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match received {
            Message::Pong(payload) => assert_eq!(payload.as_ref(), b"probe"),
            other => panic!("expected pong, got {other:?}"),
        }

        fixture.server.stop();
    }

    // --- Raw-socket cases a conformant client cannot produce ---

    /// Upgrades a raw TCP connection with a hand-written request.
    async fn raw_ws_connect(session_port: u16) -> TcpStream {
        let mut stream = TcpStream::connect(("127.0.0.1", session_port))
            .await
            .unwrap();
        stream
            .write_all(
                b"GET / HTTP/1.1\r\n\
                  Host: 127.0.0.1\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                  Sec-WebSocket-Version: 13\r\n\r\n",
            )
            .await
            .unwrap();

        let mut response = Vec::new();
        loop {
            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed during upgrade");
            response.extend_from_slice(&chunk[..n]);
            if response.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        stream
    }

    /// Reads one server frame off a raw connection.
    async fn read_frame(stream: &mut TcpStream) -> Option<Frame> {
        let mut buf = Vec::new();
        loop {
            match Frame::parse(&buf, Role::Server) {
                Ok((frame, _consumed)) => return Some(frame),
                Err(WireError::Incomplete { .. }) => {}
                Err(e) => panic!("bad server frame: {e}"),
            }
            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[tokio::test]
    async fn fragmented_message_is_reassembled() {
        let fixture = start_server().await;
        let session_port = handshake(fixture.server.port()).await;
        let mut stream = raw_ws_connect(session_port).await;

        let json = sync_message("one two three");
        let bytes = json.as_bytes();
        let (a, rest) = bytes.split_at(bytes.len() / 3);
        let (b, c) = rest.split_at(rest.len() / 2);

        let frames = [
            Frame::new(false, OpCode::Text, a.to_vec()),
            Frame::new(false, OpCode::Continuation, b.to_vec()),
            Frame::new(true, OpCode::Continuation, c.to_vec()),
        ];
        for frame in frames {
            stream.write_all(&frame.encode(Some(MASK))).await.unwrap();
        }
        tokio::time::sleep(SETTLE).await;

        // The fragments arrived as one message, in order.
        let surface = fixture.editor.latest_surface().unwrap();
        assert_eq!(fixture.editor.surface(surface).unwrap().text, "one two three");

        fixture.server.stop();
    }

    #[tokio::test]
    async fn unmasked_client_frame_closes_the_session() {
        let fixture = start_server().await;
        let session_port = handshake(fixture.server.port()).await;
        let mut stream = raw_ws_connect(session_port).await;

        // Mandatory spec check: a client frame without the mask bit is
        // a protocol error, not a tolerated variation.
        stream
            .write_all(&Frame::text(sync_message("sneaky")).encode(None))
            .await
            .unwrap();

        let frame = read_frame(&mut stream).await.expect("expected a close frame");
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(frame.close_code(), Some(CLOSE_PROTOCOL_ERROR));
        assert_eq!(fixture.editor.surface_count(), 0);

        fixture.server.stop();
    }

    #[tokio::test]
    async fn close_handshake_round_trips() {
        let fixture = start_server().await;
        let session_port = handshake(fixture.server.port()).await;
        let mut stream = raw_ws_connect(session_port).await;

        stream
            .write_all(&Frame::close(1000, "bye").encode(Some(MASK)))
            .await
            .unwrap();

        let frame = read_frame(&mut stream).await.expect("expected a close echo");
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(frame.close_code(), Some(1000));

        fixture.server.stop();
    }
}
