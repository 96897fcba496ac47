//! The HTTP handshake endpoint.
//!
//! The browser extension asks this fixed local port for a WebSocket
//! port; every request is answered by spinning up a fresh
//! [`WebSocketServer`] and replying with its port and the protocol
//! version.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use ghosttext_protocol::constants::READY_WAIT;
use ghosttext_protocol::messages::HandshakeReply;
use ghosttext_wire::http::Response;

use crate::ServerError;
use crate::session::{self, RequestHandler, SessionRole};
use crate::ws_server::WebSocketServer;

/// Editor-side hooks consulted while answering a handshake request.
pub trait ConnectHooks: Send + Sync + 'static {
    /// Called when a handshake request arrives, before the session
    /// server exists (window creation / focus command policy).
    fn on_handshake(&self);

    /// Called with each freshly spawned session server so message and
    /// close subscribers can be installed before the browser connects.
    fn on_session_server(&self, server: &Arc<WebSocketServer>);
}

/// The process-lifetime handshake endpoint.
pub struct HttpStatusServer {
    cancel: CancellationToken,
    port: u16,
}

impl HttpStatusServer {
    /// Binds the endpoint and starts serving.
    ///
    /// A bind failure is returned to the caller: there is no usable
    /// fallback port, so the process should treat it as fatal.
    pub async fn bind(port: u16, hooks: Arc<dyn ConnectHooks>) -> Result<Arc<Self>, ServerError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| ServerError::Bind { port, source })?;
        let port = listener.local_addr()?.port();
        let cancel = CancellationToken::new();
        tracing::info!(port, "handshake endpoint listening");

        tokio::spawn(accept_loop(listener, cancel.clone(), hooks));
        Ok(Arc::new(Self { cancel, port }))
    }

    /// The bound port (useful when configured as 0 in tests).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stops the accept loop and, transitively, every session server
    /// it spawned.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    cancel: CancellationToken,
    hooks: Arc<dyn ConnectHooks>,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("handshake endpoint shutting down");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "handshake request");
                        let on_request = request_handler(Arc::clone(&hooks), cancel.clone());
                        session::spawn(stream, SessionRole::Http { on_request }, &cancel);
                    }
                    Err(e) => tracing::error!("accept error: {e}"),
                }
            }
        }
    }
}

/// Builds the per-request handler: run the editor hooks, spin up a
/// session server, wait (bounded) for it to listen, reply with its
/// port. A server that never becomes ready fails only this handshake.
fn request_handler(hooks: Arc<dyn ConnectHooks>, cancel: CancellationToken) -> RequestHandler {
    Arc::new(move |_request| {
        let hooks = Arc::clone(&hooks);
        let cancel = cancel.clone();
        Box::pin(async move {
            hooks.on_handshake();

            let server = WebSocketServer::spawn(&cancel);
            hooks.on_session_server(&server);

            match server.ready(READY_WAIT).await {
                Ok(port) => match serde_json::to_string(&HandshakeReply::new(port)) {
                    Ok(body) => {
                        tracing::info!(port, "connection opened");
                        Response::new("200 OK").body("application/json", body)
                    }
                    Err(e) => {
                        tracing::error!("failed to encode handshake reply: {e}");
                        server.stop();
                        Response::new("500 Internal Server Error")
                            .body("text/plain", "failed to encode handshake reply")
                    }
                },
                Err(e) => {
                    tracing::error!("session server failed to start: {e}");
                    server.stop();
                    Response::new("500 Internal Server Error")
                        .body("text/plain", "session server failed to start")
                }
            }
        })
    })
}
