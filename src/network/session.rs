//! Transport sessions
//!
//! A session owns one websocket connection. Outbound frames go through an
//! unbounded queue drained by a writer task; inbound frames, pongs and the
//! final close are forwarded to the router as [`NodeEvent`]s. Sends against a
//! closed session are dropped and report `false`.

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// Process-local connection identifier.
pub type ConnId = u64;

/// Sending half of a peer connection as seen by the router and registry.
pub trait Transport: Send + Sync {
    /// Queues a text frame. Returns `false` if the session is closed.
    fn send_text(&self, text: String) -> bool;
    /// Queues a liveness ping. Returns `false` if the session is closed.
    fn ping(&self) -> bool;
    /// Closes the session; later sends are no-ops.
    fn close(&self);
    fn is_open(&self) -> bool;
    fn remote_addr(&self) -> &str;
}

/// Connection lifecycle events consumed by the router's event loop.
pub enum NodeEvent {
    Opened {
        conn_id: ConnId,
        transport: Arc<dyn Transport>,
    },
    Frame {
        conn_id: ConnId,
        text: String,
    },
    Pong {
        conn_id: ConnId,
    },
    Closed {
        conn_id: ConnId,
    },
}

enum Outbound {
    Text(String),
    Ping,
    Close,
}

pub struct WsSession {
    remote_addr: String,
    open: AtomicBool,
    queue: mpsc::UnboundedSender<Outbound>,
    shutdown: Notify,
}

impl WsSession {
    /// Splits `ws` into writer and reader tasks and announces the connection
    /// on `events`. Returns the session handle.
    pub fn spawn<S>(
        conn_id: ConnId,
        ws: WebSocketStream<S>,
        remote_addr: String,
        events: mpsc::Sender<NodeEvent>,
    ) -> Arc<WsSession>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Arc::new(WsSession {
            remote_addr,
            open: AtomicBool::new(true),
            queue: tx,
            shutdown: Notify::new(),
        });
        let (mut sink, mut stream) = ws.split();

        let writer_session = session.clone();
        tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                let result = match out {
                    Outbound::Text(text) => sink.send(Message::Text(text)).await,
                    Outbound::Ping => sink.send(Message::Ping(Vec::new())).await,
                    Outbound::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    debug!(conn_id, error = %e, "Websocket write failed");
                    break;
                }
            }
            writer_session.mark_closed();
            let _ = sink.close().await;
        });

        let reader_session = session.clone();
        tokio::spawn(async move {
            let opened = NodeEvent::Opened {
                conn_id,
                transport: reader_session.clone(),
            };
            if events.send(opened).await.is_err() {
                reader_session.close();
                return;
            }

            loop {
                let msg = tokio::select! {
                    _ = reader_session.shutdown.notified() => break,
                    msg = stream.next() => msg,
                };
                let event = match msg {
                    Some(Ok(Message::Text(text))) => NodeEvent::Frame { conn_id, text },
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => NodeEvent::Frame { conn_id, text },
                        Err(_) => {
                            warn!(conn_id, "Dropping non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Pong(_))) => NodeEvent::Pong { conn_id },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(conn_id, error = %e, "Websocket read failed");
                        break;
                    }
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }

            reader_session.close();
            let _ = events.send(NodeEvent::Closed { conn_id }).await;
        });

        session
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Transport for WsSession {
    fn send_text(&self, text: String) -> bool {
        if !self.is_open() {
            return false;
        }
        self.queue.send(Outbound::Text(text)).is_ok()
    }

    fn ping(&self) -> bool {
        if !self.is_open() {
            return false;
        }
        self.queue.send(Outbound::Ping).is_ok()
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.queue.send(Outbound::Close);
        }
        self.shutdown.notify_one();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn remote_addr(&self) -> &str {
        &self.remote_addr
    }
}
