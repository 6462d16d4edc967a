//! Websocket accept loop

use super::session::{ConnId, NodeEvent, WsSession};
use crate::error::{RelayError, Result};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Accepts connections forever, upgrading each to a websocket session whose
/// events flow into `events`.
pub async fn serve(listener: TcpListener, events: mpsc::Sender<NodeEvent>) {
    let mut next_conn_id: ConnId = 0;
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                next_conn_id += 1;
                let conn_id = next_conn_id;
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) = accept_connection(conn_id, stream, addr, events).await {
                        warn!(conn_id, remote = %addr, error = %e, "Websocket handshake failed");
                    }
                });
            }
            Err(e) => warn!(error = %e, "Failed to accept connection"),
        }
    }
}

pub async fn accept_connection(
    conn_id: ConnId,
    stream: TcpStream,
    addr: SocketAddr,
    events: mpsc::Sender<NodeEvent>,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| RelayError::NetworkError(e.to_string()))?;
    debug!(conn_id, remote = %addr, "Websocket session established");
    WsSession::spawn(conn_id, ws, addr.to_string(), events);
    Ok(())
}
