//! The session layer: a bidirectional JSON-RPC-over-WebSocket channel with
//! correlation ids, fire-and-forget vs. request/reply messages, and
//! interleaved binary file transfers consumed in FIFO order.
//!
//! A `Session` owns one WebSocket connection. `spawn` splits it into a
//! writer task (draining an outbound queue into the socket, preserving send
//! order) and a reader task (dispatching inbound frames), matching the
//! split the agent runtime and controller both need. The returned
//! `SessionHandle` is the caller's view: `remote_command` for outbound
//! calls, `recv_binary` for the out-of-band blob stream.

mod routes;

pub use routes::{BackgroundHandler, ImmediateHandler, Routes};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_domain::Value;
use fleet_protocol::{CallId, Frame};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("remote command failed: {0}")]
    Command(String),
    #[error("timed out waiting for reply")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

enum Outbound {
    Text(String),
    Binary(Vec<u8>),
}

type PendingTable = Arc<Mutex<HashMap<CallId, oneshot::Sender<SessionResult<Vec<Value>>>>>>;

/// The caller-facing half of a session: enqueue outbound commands, pull
/// inbound binary blobs. Cheap to clone; all clones share the same
/// connection and pending table.
#[derive(Clone)]
pub struct SessionHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: PendingTable,
    next_cid: Arc<AtomicU64>,
}

impl SessionHandle {
    /// `remoteCommand(name, args, rsvp, timeout)` per the session layer
    /// spec. `rsvp = false` returns as soon as the frame is handed to the
    /// outbound queue; `rsvp = true` waits for the matching reply (or the
    /// given timeout, default 30s).
    pub async fn remote_command(
        &self,
        name: &str,
        args: Vec<Value>,
        rsvp: bool,
        timeout: Option<Duration>,
    ) -> SessionResult<Vec<Value>> {
        if !rsvp {
            let frame = Frame::Command {
                name: name.to_string(),
                cid: None,
                args,
            };
            self.outbound
                .send(Outbound::Text(frame.encode()))
                .map_err(|_| SessionError::Closed)?;
            return Ok(Vec::new());
        }

        let cid = self.next_cid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(cid, tx);

        let frame = Frame::Command {
            name: name.to_string(),
            cid: Some(cid),
            args,
        };
        if self.outbound.send(Outbound::Text(frame.encode())).is_err() {
            self.pending.lock().remove(&cid);
            return Err(SessionError::Closed);
        }

        let wait = timeout.unwrap_or(DEFAULT_TIMEOUT);
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => {
                self.pending.lock().remove(&cid);
                Err(SessionError::Timeout)
            }
        }
    }

    /// Send a raw binary frame, e.g. file contents following an
    /// `accept_files` command. Blobs are sent in call order since they
    /// share the same outbound queue as text frames.
    pub fn send_binary(&self, data: Vec<u8>) -> SessionResult<()> {
        self.outbound
            .send(Outbound::Binary(data))
            .map_err(|_| SessionError::Closed)
    }
}

/// Spawn the writer and reader tasks for a WebSocket connection. Returns a
/// handle for outbound traffic, a channel yielding inbound binary blobs in
/// FIFO order, and a join handle that resolves when the connection closes
/// (cleanly or otherwise) and all background route handlers have been
/// awaited.
pub fn spawn<S>(
    ws: S,
    routes: Routes,
) -> (
    SessionHandle,
    mpsc::UnboundedReceiver<Vec<u8>>,
    tokio::task::JoinHandle<SessionResult<()>>,
)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin
        + Send
        + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let (binary_tx, binary_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
    let next_cid = Arc::new(AtomicU64::new(0));

    let reply_tx = outbound_tx.clone();
    let handle = SessionHandle {
        outbound: outbound_tx,
        pending: pending.clone(),
        next_cid,
    };

    let join = tokio::spawn(run_loop(ws, routes, outbound_rx, reply_tx, binary_tx, pending));

    (handle, binary_rx, join)
}

async fn run_loop<S>(
    mut ws: S,
    routes: Routes,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    reply_tx: mpsc::UnboundedSender<Outbound>,
    binary_tx: mpsc::UnboundedSender<Vec<u8>>,
    pending: PendingTable,
) -> SessionResult<()>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin
        + Send
        + 'static,
{
    let mut background: tokio::task::JoinSet<()> = tokio::task::JoinSet::new();
    let routes = Arc::new(routes);

    let result = loop {
        tokio::select! {
            biased;
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(Outbound::Text(text)) => {
                        if ws.send(Message::Text(text)).await.is_err() {
                            break Err(SessionError::Transport("send failed".into()));
                        }
                    }
                    Some(Outbound::Binary(data)) => {
                        if ws.send(Message::Binary(data)).await.is_err() {
                            break Err(SessionError::Transport("send failed".into()));
                        }
                    }
                    None => {
                        // Handle side dropped; nothing more to send, but keep
                        // reading until the peer closes.
                    }
                }
            }
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_text(&text, &routes, &pending, &mut background, &reply_tx).await {
                            tracing::warn!(error = %e, "protocol error on inbound frame");
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let _ = binary_tx.send(data);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break Ok(());
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/Frame: ignore, transport handles these.
                    }
                    Some(Err(e)) => {
                        break Err(SessionError::Transport(e.to_string()));
                    }
                }
            }
        }
    };

    // Teardown: fail all pending requests, await outstanding background
    // handlers.
    let mut table = pending.lock();
    for (_, tx) in table.drain() {
        let _ = tx.send(Err(SessionError::Closed));
    }
    drop(table);

    while background.join_next().await.is_some() {}

    result
}

async fn handle_text(
    text: &str,
    routes: &Arc<Routes>,
    pending: &PendingTable,
    background: &mut tokio::task::JoinSet<()>,
    reply_tx: &mpsc::UnboundedSender<Outbound>,
) -> SessionResult<()> {
    let frame = Frame::parse(text).map_err(|e| SessionError::Protocol(e.to_string()))?;
    match frame {
        Frame::Success { cid, result } => {
            if let Some(tx) = pending.lock().remove(&cid) {
                let _ = tx.send(Ok(result));
            } else {
                tracing::warn!(cid, "reply for unknown cid");
            }
            Ok(())
        }
        Frame::Error { cid, message } => {
            if let Some(tx) = pending.lock().remove(&cid) {
                let _ = tx.send(Err(SessionError::Command(message)));
            } else {
                tracing::warn!(cid, "error reply for unknown cid");
            }
            Ok(())
        }
        Frame::Command { name, cid, args } => {
            if let Some(handler) = routes.immediate(&name) {
                // Immediate: awaited inline, serializing behind it.
                let result = handler.call(args).await;
                match (cid, result) {
                    (Some(cid), outcome) => send_reply(reply_tx, cid, outcome),
                    (None, Err(e)) => {
                        tracing::warn!(route = %name, error = %e, "immediate handler failed")
                    }
                    (None, Ok(_)) => {}
                }
                return Ok(());
            }
            if let Some(handler) = routes.background(&name) {
                // Background: spawned, receive loop keeps accepting frames.
                let handler = handler.clone();
                let reply_tx = reply_tx.clone();
                background.spawn(async move {
                    let result = handler.call(args).await;
                    match (cid, result) {
                        (Some(cid), outcome) => send_reply(&reply_tx, cid, outcome),
                        (None, Err(e)) => {
                            tracing::warn!(route = %name, error = %e, "background handler failed")
                        }
                        (None, Ok(_)) => {}
                    }
                });
                return Ok(());
            }
            if let Some(cid) = cid {
                send_reply(reply_tx, cid, Err(format!("unknown command {name:?}")));
            } else {
                tracing::warn!(route = %name, "unknown fire-and-forget command, dropped");
            }
            Ok(())
        }
    }
}

fn send_reply(reply_tx: &mpsc::UnboundedSender<Outbound>, cid: CallId, outcome: Result<Vec<Value>, String>) {
    let frame = match outcome {
        Ok(result) => Frame::Success { cid, result },
        Err(message) => Frame::Error { cid, message },
    };
    let _ = reply_tx.send(Outbound::Text(frame.encode()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_allocation_is_monotonic() {
        let counter = AtomicU64::new(0);
        let a = counter.fetch_add(1, Ordering::Relaxed);
        let b = counter.fetch_add(1, Ordering::Relaxed);
        assert!(b > a);
    }
}
