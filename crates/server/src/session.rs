//! One accepted socket: handshake, frame loop, write serialization.
//!
//! A session moves Connecting → Open → Closing → Closed. The read loop
//! and all outbound traffic (application sends, pong echoes, close
//! frames) go through a single write pump, so frames are never
//! interleaved mid-frame no matter which context calls
//! [`SessionHandle::send_text`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use ghosttext_protocol::constants::{
    CLOSE_WAIT, FLUSH_WAIT, HANDSHAKE_TIMEOUT, MAX_REQUEST_SIZE, WS_MAX_MESSAGE_SIZE,
};
use ghosttext_wire::frame::{
    CLOSE_GOING_AWAY, CLOSE_INVALID_DATA, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR,
};
use ghosttext_wire::http::{Request, Response};
use ghosttext_wire::{Frame, MessageAssembler, OpCode, Role, WireError, handshake};

use crate::subscription::Slot;
use crate::{SEND_BUFFER_SIZE, ServerError};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Open,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Callback invoked with each complete inbound text message, in frame
/// receive order.
pub type MessageHandler = Box<dyn FnMut(&SessionHandle, String) + Send>;

/// Callback invoked exactly once when the session reaches Closed.
pub type CloseHandler = Box<dyn FnMut() + Send>;

/// Handler for plain HTTP requests on the status endpoint.
pub(crate) type RequestHandler =
    Arc<dyn Fn(Request) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync>;

/// What an accepted socket is serving.
pub(crate) enum SessionRole {
    /// Status endpoint: answer one plain request, then close.
    Http { on_request: RequestHandler },
    /// WebSocket endpoint: upgrade, then run the frame loop.
    WebSocket {
        on_message: Slot<MessageHandler>,
        on_close: Slot<CloseHandler>,
    },
}

/// Cloneable handle to a running session.
///
/// State reads are a single atomic load, safe from any context.
#[derive(Clone)]
pub struct SessionHandle {
    out_tx: mpsc::Sender<Frame>,
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
    closing: Arc<Notify>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Queues a text frame for the peer.
    ///
    /// Valid only while Open; anywhere else the message is the
    /// caller's to drop.
    pub fn send_text(&self, text: &str) -> Result<(), ServerError> {
        if !self.is_open() {
            return Err(ServerError::SessionNotOpen);
        }
        self.out_tx.try_send(Frame::text(text)).map_err(|_| {
            tracing::warn!("send queue full or gone, dropping message");
            ServerError::SessionNotOpen
        })
    }

    /// Starts a close handshake from this side (no-op when already
    /// closing; aborts the connection when it never opened).
    pub fn close(&self) {
        if self
            .state
            .compare_exchange(
                SessionState::Open as u8,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            let _ = self.out_tx.try_send(Frame::close(CLOSE_NORMAL, ""));
            self.closing.notify_one();
        } else if self.state() == SessionState::Connecting {
            self.cancel.cancel();
        }
    }

    /// Token cancelled once the session has fully shut down.
    pub(crate) fn done(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Spawns the serving task for an accepted socket and returns its
/// handle.
pub(crate) fn spawn(
    stream: TcpStream,
    role: SessionRole,
    parent: &CancellationToken,
) -> SessionHandle {
    let (out_tx, out_rx) = mpsc::channel(SEND_BUFFER_SIZE);
    let handle = SessionHandle {
        out_tx,
        state: Arc::new(AtomicU8::new(SessionState::Connecting as u8)),
        cancel: parent.child_token(),
        closing: Arc::new(Notify::new()),
    };
    tokio::spawn(run(stream, out_rx, handle.clone(), role));
    handle
}

async fn run(
    stream: TcpStream,
    out_rx: mpsc::Receiver<Frame>,
    handle: SessionHandle,
    role: SessionRole,
) {
    match role {
        SessionRole::Http { on_request } => {
            run_http(stream, &handle, on_request).await;
            handle
                .state
                .store(SessionState::Closed as u8, Ordering::Release);
        }
        SessionRole::WebSocket {
            on_message,
            on_close,
        } => {
            run_websocket(stream, out_rx, &handle, &on_message).await;
            handle
                .state
                .store(SessionState::Closed as u8, Ordering::Release);
            tracing::info!("connection closed");
            if let Some((generation, mut callback)) = on_close.take() {
                callback();
                on_close.restore(generation, callback);
            }
        }
    }
    handle.cancel.cancel();
}

/// Buffers reads until a complete HTTP request is decoded.
///
/// Returns the request plus any bytes the client pipelined after it
/// (an eager WebSocket client may send frames right behind the
/// upgrade request). `None` means the connection went away or the
/// session was cancelled.
async fn read_request(
    stream: &mut TcpStream,
    cancel: &CancellationToken,
) -> Result<Option<(Request, Vec<u8>)>, ServerError> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    loop {
        if let Some((request, consumed)) = Request::parse(&buf)? {
            let leftover = buf.split_off(consumed);
            return Ok(Some((request, leftover)));
        }
        if buf.len() > MAX_REQUEST_SIZE {
            return Err(ServerError::Wire(WireError::Malformed(
                "request exceeds maximum size".into(),
            )));
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = tokio::time::sleep_until(deadline) => return Err(ServerError::HandshakeTimeout),
            read = stream.read_buf(&mut buf) => {
                match read {
                    Ok(0) => return Ok(None),
                    Ok(_) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}

async fn run_http(mut stream: TcpStream, handle: &SessionHandle, on_request: RequestHandler) {
    let request = match read_request(&mut stream, &handle.cancel).await {
        Ok(Some((request, _leftover))) => request,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("dropping connection: {e}");
            let reply = Response::new("400 Bad Request").encode();
            let _ = stream.write_all(&reply).await;
            return;
        }
    };

    let response = on_request(request).await;
    if let Err(e) = stream.write_all(&response.encode()).await {
        tracing::debug!("failed to write response: {e}");
    }
    let _ = stream.shutdown().await;
}

async fn run_websocket(
    mut stream: TcpStream,
    out_rx: mpsc::Receiver<Frame>,
    handle: &SessionHandle,
    on_message: &Slot<MessageHandler>,
) {
    let (request, leftover) = match read_request(&mut stream, &handle.cancel).await {
        Ok(Some(got)) => got,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("dropping connection: {e}");
            return;
        }
    };

    let response = match handshake::upgrade(&request) {
        Ok(response) => response,
        Err(WireError::NotAWebSocketRequest) => {
            tracing::warn!("plain HTTP request on a session port");
            let reply = Response::new("400 Bad Request").encode();
            let _ = stream.write_all(&reply).await;
            return;
        }
        Err(e) => {
            tracing::warn!("rejecting upgrade: {e}");
            return;
        }
    };
    if let Err(e) = stream.write_all(&response.encode()).await {
        tracing::debug!("failed to write upgrade response: {e}");
        return;
    }

    handle
        .state
        .store(SessionState::Open as u8, Ordering::Release);
    tracing::info!("connection opened");

    let (read_half, write_half) = stream.into_split();
    let mut write_task = tokio::spawn(write_pump(write_half, out_rx, handle.cancel.clone()));

    let close_queued = read_loop(read_half, handle, on_message, leftover).await;

    if close_queued {
        // Let the pump flush the close frame before tearing it down.
        if tokio::time::timeout(FLUSH_WAIT, &mut write_task).await.is_ok() {
            return;
        }
    }
    handle.cancel.cancel();
    let _ = write_task.await;
}

/// Drains the send queue into the socket. Writing a close frame is the
/// last thing the pump does; on cancellation it flushes what is
/// already queued and stops.
async fn write_pump(
    mut write: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                while let Ok(frame) = out_rx.try_recv() {
                    let is_close = frame.opcode == OpCode::Close;
                    if write.write_all(&frame.encode(None)).await.is_err() || is_close {
                        break;
                    }
                }
                break;
            }
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                let is_close = frame.opcode == OpCode::Close;
                if let Err(e) = write.write_all(&frame.encode(None)).await {
                    tracing::debug!("write error: {e}");
                    break;
                }
                if is_close {
                    break;
                }
            }
        }
    }
    let _ = write.shutdown().await;
}

enum FrameOutcome {
    Continue,
    /// Both sides have sent their close frame; the session is done.
    CloseHandshakeDone,
}

struct SessionFault {
    close_code: u16,
    error: WireError,
}

/// Runs the frame loop until the session ends. Returns `true` if a
/// close frame was queued for the peer (and so deserves a flush
/// window).
async fn read_loop(
    mut read: OwnedReadHalf,
    handle: &SessionHandle,
    on_message: &Slot<MessageHandler>,
    mut buf: Vec<u8>,
) -> bool {
    let mut assembler = MessageAssembler::new(WS_MAX_MESSAGE_SIZE);
    let mut close_deadline: Option<Instant> = None;

    loop {
        // Drain every complete frame already buffered.
        loop {
            match Frame::parse(&buf, Role::Client) {
                Ok((frame, consumed)) => {
                    buf.drain(..consumed);
                    match handle_frame(frame, handle, on_message, &mut assembler) {
                        Ok(FrameOutcome::Continue) => {}
                        Ok(FrameOutcome::CloseHandshakeDone) => return true,
                        Err(fault) => {
                            tracing::warn!("closing session: {}", fault.error);
                            let previous = handle
                                .state
                                .swap(SessionState::Closing as u8, Ordering::AcqRel);
                            if previous == SessionState::Open as u8 {
                                let _ = handle
                                    .out_tx
                                    .try_send(Frame::close(fault.close_code, ""));
                            }
                            return true;
                        }
                    }
                }
                Err(WireError::Incomplete { .. }) => break,
                Err(error) => {
                    tracing::warn!("closing session: {error}");
                    let previous = handle
                        .state
                        .swap(SessionState::Closing as u8, Ordering::AcqRel);
                    if previous == SessionState::Open as u8 {
                        let _ = handle
                            .out_tx
                            .try_send(Frame::close(CLOSE_PROTOCOL_ERROR, ""));
                    }
                    return true;
                }
            }
        }

        // A locally initiated close bounds the wait for the peer's
        // reply.
        if close_deadline.is_none() && handle.state() == SessionState::Closing {
            close_deadline = Some(Instant::now() + CLOSE_WAIT);
        }
        let close_timer = async {
            match close_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = handle.cancel.cancelled() => {
                let previous = handle
                    .state
                    .swap(SessionState::Closing as u8, Ordering::AcqRel);
                if previous == SessionState::Open as u8 {
                    let _ = handle.out_tx.try_send(Frame::close(CLOSE_GOING_AWAY, ""));
                    return true;
                }
                return false;
            }
            _ = close_timer => {
                tracing::debug!("close handshake timed out");
                return true;
            }
            _ = handle.closing.notified(), if close_deadline.is_none() => {}
            result = read.read_buf(&mut buf) => {
                match result {
                    Ok(0) => return false,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("read error: {e}");
                        return false;
                    }
                }
            }
        }
    }
}

fn handle_frame(
    frame: Frame,
    handle: &SessionHandle,
    on_message: &Slot<MessageHandler>,
    assembler: &mut MessageAssembler,
) -> Result<FrameOutcome, SessionFault> {
    match frame.opcode {
        OpCode::Ping => {
            // Automatic pong with the identical payload, through the
            // same pump as application sends.
            if handle.is_open()
                && handle.out_tx.try_send(Frame::pong(frame.payload)).is_err()
            {
                tracing::warn!("send queue full, dropping pong");
            }
            Ok(FrameOutcome::Continue)
        }
        OpCode::Pong => Ok(FrameOutcome::Continue),
        OpCode::Close => {
            let previous = handle
                .state
                .swap(SessionState::Closing as u8, Ordering::AcqRel);
            if previous == SessionState::Open as u8 {
                // Peer-initiated: echo the close before going down.
                let code = frame.close_code().unwrap_or(CLOSE_NORMAL);
                let _ = handle.out_tx.try_send(Frame::close(code, ""));
            }
            Ok(FrameOutcome::CloseHandshakeDone)
        }
        OpCode::Text | OpCode::Binary | OpCode::Continuation => {
            if !handle.is_open() {
                return Ok(FrameOutcome::Continue);
            }
            let complete = assembler.push(frame).map_err(|error| SessionFault {
                close_code: CLOSE_PROTOCOL_ERROR,
                error,
            })?;
            if let Some((opcode, payload)) = complete {
                match opcode {
                    OpCode::Text => {
                        let text = String::from_utf8(payload).map_err(|_| SessionFault {
                            close_code: CLOSE_INVALID_DATA,
                            error: WireError::Protocol("text message is not valid UTF-8".into()),
                        })?;
                        deliver(on_message, handle, text);
                    }
                    _ => tracing::debug!("ignoring binary message"),
                }
            }
            Ok(FrameOutcome::Continue)
        }
    }
}

/// Invokes the message subscriber with the slot lock released, so the
/// callback may install its own replacement.
fn deliver(on_message: &Slot<MessageHandler>, handle: &SessionHandle, text: String) {
    if let Some((generation, mut callback)) = on_message.take() {
        callback(handle, text);
        on_message.restore(generation, callback);
    } else {
        tracing::debug!("no message subscriber installed, dropping message");
    }
}
