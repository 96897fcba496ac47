//! Per-browser-tab WebSocket server.
//!
//! Each handshake request gets its own server on an OS-assigned
//! ephemeral port. A server owns at most one live session and goes
//! down with it — the browser re-handshakes for a fresh session rather
//! than reconnecting.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::session::{self, CloseHandler, MessageHandler, SessionHandle, SessionRole, SessionState};
use crate::subscription::{Slot, Subscription};

pub struct WebSocketServer {
    cancel: CancellationToken,
    /// Publishes the bound port once the listener is up. Kept on the
    /// struct so a server that never starts still lets waiters time
    /// out instead of erroring immediately.
    ready_tx: watch::Sender<Option<u16>>,
    ready_rx: watch::Receiver<Option<u16>>,
    session: Mutex<Option<SessionHandle>>,
    on_message: Slot<MessageHandler>,
    on_close: Slot<CloseHandler>,
}

impl WebSocketServer {
    fn new(parent: &CancellationToken) -> Arc<Self> {
        let (ready_tx, ready_rx) = watch::channel(None);
        Arc::new(Self {
            cancel: parent.child_token(),
            ready_tx,
            ready_rx,
            session: Mutex::new(None),
            on_message: Slot::new(),
            on_close: Slot::new(),
        })
    }

    /// Spawns a server and its accept loop on an ephemeral port.
    pub fn spawn(parent: &CancellationToken) -> Arc<Self> {
        let server = Self::new(parent);
        tokio::spawn(Arc::clone(&server).run());
        server
    }

    async fn run(self: Arc<Self>) {
        let listener = match TcpListener::bind(("127.0.0.1", 0)).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("failed to bind a session port: {e}");
                self.cancel.cancel();
                return;
            }
        };
        let port = listener.local_addr().map(|addr| addr.port()).unwrap_or(0);
        let _ = self.ready_tx.send(Some(port));
        tracing::debug!(port, "session server listening");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    if let Some(session) = self.session.lock().take() {
                        session.close();
                    }
                    tracing::debug!(port, "session server shutting down");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "browser connected");
                            self.accept_session(stream);
                        }
                        Err(e) => tracing::error!("accept error: {e}"),
                    }
                }
            }
        }
    }

    fn accept_session(self: &Arc<Self>, stream: TcpStream) {
        let role = SessionRole::WebSocket {
            on_message: self.on_message.clone(),
            on_close: self.on_close.clone(),
        };
        let session = session::spawn(stream, role, &self.cancel);

        // One session per server: when it ends, the server goes with
        // it (no reconnect in this protocol).
        let server_cancel = self.cancel.clone();
        let done = session.done();
        tokio::spawn(async move {
            done.cancelled().await;
            server_cancel.cancel();
        });

        let mut slot = self.session.lock();
        if let Some(old) = slot.replace(session) {
            if old.state() != SessionState::Closed {
                tracing::info!("replacing active session");
                old.close();
            }
        }
    }

    /// Waits up to `cap` for the listener to come up and returns the
    /// bound port. Bounded: a server that never starts yields
    /// [`ServerError::NotReady`], not a hang.
    pub async fn ready(&self, cap: Duration) -> Result<u16, ServerError> {
        let mut rx = self.ready_rx.clone();
        let wait = async move {
            loop {
                if let Some(port) = *rx.borrow_and_update() {
                    return Some(port);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };
        tokio::select! {
            // Bind failure or an early stop cancels the token; fail
            // the wait immediately instead of burning the whole cap.
            _ = self.cancel.cancelled() => Err(ServerError::NotReady(cap)),
            result = tokio::time::timeout(cap, wait) => match result {
                Ok(Some(port)) => Ok(port),
                _ => Err(ServerError::NotReady(cap)),
            }
        }
    }

    /// `true` while the listener is bound and accepting.
    pub fn is_running(&self) -> bool {
        self.ready_rx.borrow().is_some() && !self.cancel.is_cancelled()
    }

    /// The bound port, once running.
    pub fn port(&self) -> Option<u16> {
        *self.ready_rx.borrow()
    }

    /// Installs the message subscriber. The previous subscription is
    /// superseded; messages arrive in frame receive order.
    pub fn on_message(&self, callback: MessageHandler) -> Subscription {
        self.on_message.install(callback)
    }

    /// Installs the close subscriber, fired exactly once per session.
    pub fn on_close(&self, callback: CloseHandler) -> Subscription {
        self.on_close.install(callback)
    }

    /// Handle to the current session, if one is live.
    pub fn session(&self) -> Option<SessionHandle> {
        self.session.lock().clone()
    }

    /// Closes the session (with a close frame when Open) and stops the
    /// accept loop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
