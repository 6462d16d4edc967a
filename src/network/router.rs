//! Message router
//!
//! The router is the single writer of the ledger and the peer registry. It
//! decodes each inbound envelope, registers the sender, runs the handler for
//! the message type and relays accepted broadcasts to every other registered
//! peer. Malformed input is logged and dropped without closing the
//! connection or answering the sender.

use super::liveness::LivenessMonitor;
use super::registry::PeerRegistry;
use super::session::{ConnId, NodeEvent, Transport};
use crate::ledger::{now_seconds, LedgerStore};
use crate::protocol::{
    new_message_id, Envelope, HandshakeReply, HeartbeatReply, InboundMessage, MessageType,
};
use crate::sync::SyncEngine;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What handling one frame produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatch {
    pub replied: bool,
    pub relayed: usize,
}

#[derive(Clone)]
pub struct MessageRouter {
    node_id: String,
    ledger: Arc<RwLock<LedgerStore>>,
    registry: Arc<RwLock<PeerRegistry>>,
    sync: SyncEngine,
    liveness: LivenessMonitor,
    default_block_limit: usize,
}

impl MessageRouter {
    pub fn new(
        node_id: impl Into<String>,
        ledger: Arc<RwLock<LedgerStore>>,
        registry: Arc<RwLock<PeerRegistry>>,
        default_block_limit: usize,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            sync: SyncEngine::new(ledger.clone()),
            liveness: LivenessMonitor::new(registry.clone()),
            ledger,
            registry,
            default_block_limit,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    pub fn handle_event(&self, event: NodeEvent) {
        match event {
            NodeEvent::Opened { conn_id, transport } => {
                debug!(conn_id, remote = transport.remote_addr(), "Connection opened");
                self.registry.write().open_connection(conn_id, transport);
            }
            NodeEvent::Frame { conn_id, text } => {
                self.handle_frame(conn_id, &text);
            }
            NodeEvent::Pong { conn_id } => self.liveness.pong(conn_id),
            NodeEvent::Closed { conn_id } => {
                if let Some(peer_id) = self.registry.write().close_connection(conn_id) {
                    info!(peer_id = %peer_id, conn_id, "Peer disconnected");
                } else {
                    debug!(conn_id, "Connection closed");
                }
            }
        }
    }

    pub fn handle_frame(&self, conn_id: ConnId, text: &str) -> Dispatch {
        let Some(transport) = self.registry.read().transport(conn_id) else {
            debug!(conn_id, "Frame on unknown connection dropped");
            return Dispatch::default();
        };

        let envelope = match Envelope::from_json(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(conn_id, error = %e, "Dropping malformed envelope");
                return Dispatch::default();
            }
        };

        self.registry
            .write()
            .record_message(conn_id, &envelope.sender_id);

        let message = match envelope.decode() {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    conn_id,
                    sender_id = %envelope.sender_id,
                    kind = %envelope.kind,
                    error = %e,
                    "Dropping message with undecodable payload"
                );
                return Dispatch::default();
            }
        };

        let mut dispatch = Dispatch::default();
        match message {
            InboundMessage::Handshake => {
                let reply = HandshakeReply {
                    node_id: self.node_id.clone(),
                    current_height: self.ledger.read().height(),
                    timestamp: now_seconds(),
                };
                dispatch.replied =
                    self.reply(&*transport, &envelope, MessageType::Handshake, &reply);
            }
            InboundMessage::SyncRequest(request) => {
                let limit = request
                    .requested_blocks
                    .unwrap_or(self.default_block_limit);
                let response = self.sync.build_sync_response(
                    request.last_known_block_height,
                    &request.user_address,
                    limit,
                );
                debug!(
                    sender_id = %envelope.sender_id,
                    blocks = response.blocks.len(),
                    "Answering sync request"
                );
                dispatch.replied =
                    self.reply(&*transport, &envelope, MessageType::SyncResponse, &response);
            }
            InboundMessage::BlockBroadcast(block) => {
                let hash = block.hash.clone();
                let height = block.height;
                if self.ledger.write().store_block(block) {
                    info!(hash = %hash, height, "Accepted block");
                    dispatch.relayed = self.relay(&envelope.sender_id, text);
                } else {
                    debug!(hash = %hash, "Duplicate block ignored");
                }
            }
            InboundMessage::TransactionBroadcast(tx) => {
                let id = tx.id.clone();
                if self.ledger.write().store_transaction(tx) {
                    debug!(tx_id = %id, "Stored transaction");
                }
                dispatch.relayed = self.relay(&envelope.sender_id, text);
            }
            InboundMessage::Heartbeat => {
                let reply = HeartbeatReply {
                    timestamp: now_seconds(),
                    height: self.ledger.read().height(),
                    peer_count: self.registry.read().peer_count(),
                };
                dispatch.replied =
                    self.reply(&*transport, &envelope, MessageType::Heartbeat, &reply);
            }
            InboundMessage::SyncResponse => {
                debug!(sender_id = %envelope.sender_id, "Ignoring inbound sync response");
            }
            InboundMessage::Unknown(kind) => {
                warn!(sender_id = %envelope.sender_id, kind = %kind, "Ignoring unknown message type");
            }
        }
        dispatch
    }

    /// Closes every connection; used on shutdown after the final snapshot.
    pub fn close_all(&self) {
        self.registry.write().close_all();
    }

    fn reply<T: Serialize>(
        &self,
        transport: &dyn Transport,
        request: &Envelope,
        kind: MessageType,
        payload: &T,
    ) -> bool {
        let id = if request.id.is_empty() {
            new_message_id()
        } else {
            request.id.clone()
        };
        let text = match Envelope::new(id, kind, self.node_id.as_str(), payload)
            .and_then(|envelope| envelope.to_json())
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode reply");
                return false;
            }
        };
        transport.send_text(text)
    }

    /// Forwards the original frame to every registered peer except `sender_id`.
    fn relay(&self, sender_id: &str, text: &str) -> usize {
        let targets = self.registry.read().peers_except(sender_id);
        let relayed = targets
            .iter()
            .filter(|t| t.send_text(text.to_string()))
            .count();
        debug!(sender_id, relayed, "Relayed broadcast");
        relayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Block, Transaction};
    use crate::network::registry::tests::RecordingTransport;
    use crate::protocol::encode_payload;
    use crate::sync::SyncResponse;

    struct Harness {
        router: MessageRouter,
        ledger: Arc<RwLock<LedgerStore>>,
        registry: Arc<RwLock<PeerRegistry>>,
    }

    impl Harness {
        fn new() -> Self {
            let ledger = Arc::new(RwLock::new(LedgerStore::new()));
            let registry = Arc::new(RwLock::new(PeerRegistry::new()));
            let router = MessageRouter::new("node-test", ledger.clone(), registry.clone(), 100);
            Self {
                router,
                ledger,
                registry,
            }
        }

        fn connect(&self, conn_id: ConnId, addr: &str) -> Arc<RecordingTransport> {
            let transport = RecordingTransport::new(addr);
            self.router.handle_event(NodeEvent::Opened {
                conn_id,
                transport: transport.clone(),
            });
            transport
        }
    }

    fn frame<T: Serialize>(id: &str, kind: &str, sender: &str, payload: &T) -> String {
        serde_json::to_string(&Envelope {
            id: id.into(),
            kind: kind.into(),
            sender_id: sender.into(),
            payload: encode_payload(payload).unwrap(),
            timestamp: 1.0,
        })
        .unwrap()
    }

    fn block(hash: &str, height: u64) -> Block {
        Block {
            hash: hash.into(),
            height,
            timestamp: 0.0,
            previous_hash: String::new(),
            merkle_root: String::new(),
            transactions: vec![Transaction::transfer(
                format!("cb-{}", hash),
                None,
                Some("miner"),
                1.0,
                0.0,
            )],
        }
    }

    #[test]
    fn test_handshake_echoes_node_info() {
        let h = Harness::new();
        let a = h.connect(1, "a");
        h.ledger.write().store_block(block("b3", 3));

        let d = h.router.handle_frame(1, &frame("req-1", "handshake", "alice", &()));
        assert!(d.replied);
        let sent = a.sent.lock();
        let reply = Envelope::from_json(&sent[0]).unwrap();
        assert_eq!(reply.id, "req-1");
        assert_eq!(reply.kind, "handshake");
        let body: HandshakeReply = reply.decode_payload().unwrap();
        assert_eq!(body.node_id, "node-test");
        assert_eq!(body.current_height, 3);
        assert!(h.registry.read().contains_peer("alice"));
    }

    #[test]
    fn test_sync_request_uses_correlation_id() {
        let h = Harness::new();
        let a = h.connect(1, "a");
        for (hash, height) in [("g", 0), ("b1", 1), ("b2", 2)] {
            h.ledger.write().store_block(block(hash, height));
        }

        let payload = serde_json::json!({
            "lastKnownBlockHeight": 0,
            "userAddress": "miner",
            "requestedBlocks": 1
        });
        h.router
            .handle_frame(1, &frame("sync-9", "syncRequest", "alice", &payload));

        let sent = a.sent.lock();
        let reply = Envelope::from_json(&sent[0]).unwrap();
        assert_eq!(reply.id, "sync-9");
        assert_eq!(reply.kind, "syncResponse");
        let body: SyncResponse = reply.decode_payload().unwrap();
        assert_eq!(body.blocks.len(), 1);
        assert_eq!(body.blocks[0].height, 1);
        assert_eq!(body.user_transactions.len(), 3);
        assert_eq!(body.current_balances["miner"], 3.0);
    }

    #[test]
    fn test_sync_request_without_id_gets_fresh_id() {
        let h = Harness::new();
        let a = h.connect(1, "a");
        let payload = serde_json::json!({"userAddress": "x"});
        h.router.handle_frame(1, &frame("", "syncRequest", "", &payload));

        let sent = a.sent.lock();
        let reply = Envelope::from_json(&sent[0]).unwrap();
        assert_eq!(reply.id.len(), 32);
    }

    #[test]
    fn test_duplicate_block_relayed_once() {
        let h = Harness::new();
        let a = h.connect(1, "a");
        let b = h.connect(2, "b");
        let c = h.connect(3, "c");
        h.router.handle_frame(2, &frame("hb", "heartbeat", "bob", &()));
        h.router.handle_frame(3, &frame("hb", "heartbeat", "carol", &()));
        b.sent.lock().clear();
        c.sent.lock().clear();

        let msg = frame("m1", "blockBroadcast", "alice", &block("dup", 4));
        assert_eq!(h.router.handle_frame(1, &msg).relayed, 2);
        assert_eq!(h.router.handle_frame(1, &msg).relayed, 0);

        assert_eq!(b.sent.lock().as_slice(), &[msg.clone()]);
        assert_eq!(c.sent.lock().as_slice(), &[msg]);
        assert!(a.sent.lock().is_empty());
        assert_eq!(h.ledger.read().block_count(), 1);
    }

    #[test]
    fn test_transactions_relay_every_time() {
        let h = Harness::new();
        let _a = h.connect(1, "a");
        let b = h.connect(2, "b");
        h.router.handle_frame(2, &frame("hb", "heartbeat", "bob", &()));
        b.sent.lock().clear();

        let tx = Transaction::transfer("t1", Some("alice"), Some("bob"), 2.0, 0.1);
        let msg = frame("m2", "transactionBroadcast", "alice", &tx);
        h.router.handle_frame(1, &msg);
        h.router.handle_frame(1, &msg);

        assert_eq!(b.sent.lock().len(), 2);
        assert_eq!(h.ledger.read().transaction_count(), 1);
        assert_eq!(h.ledger.read().balance_of("bob"), 2.0);
    }

    #[test]
    fn test_malformed_input_is_dropped_silently() {
        let h = Harness::new();
        let a = h.connect(1, "a");

        assert_eq!(h.router.handle_frame(1, "{not json"), Dispatch::default());
        let bad_payload = serde_json::to_string(&Envelope {
            id: "x".into(),
            kind: "syncRequest".into(),
            sender_id: "alice".into(),
            payload: "###".into(),
            timestamp: 0.0,
        })
        .unwrap();
        assert_eq!(h.router.handle_frame(1, &bad_payload), Dispatch::default());

        assert!(a.sent.lock().is_empty());
        assert!(a.is_open());
        // the envelope itself was readable, so the sender is still registered
        assert!(h.registry.read().contains_peer("alice"));
    }

    #[test]
    fn test_heartbeat_reports_peer_count() {
        let h = Harness::new();
        let a = h.connect(1, "a");
        h.router.handle_frame(1, &frame("hb1", "heartbeat", "alice", &()));

        let sent = a.sent.lock();
        let body: HeartbeatReply = Envelope::from_json(&sent[0])
            .unwrap()
            .decode_payload()
            .unwrap();
        assert_eq!(body.peer_count, 1);
        assert_eq!(body.height, 0);
    }

    #[test]
    fn test_unknown_type_ignored() {
        let h = Harness::new();
        let a = h.connect(1, "a");
        let d = h.router.handle_frame(1, &frame("u", "gossip", "alice", &()));
        assert_eq!(d, Dispatch::default());
        assert!(a.sent.lock().is_empty());
    }

    #[test]
    fn test_close_event_unregisters_peer() {
        let h = Harness::new();
        h.connect(1, "a");
        h.router.handle_frame(1, &frame("hb", "heartbeat", "alice", &()));
        h.router.handle_event(NodeEvent::Closed { conn_id: 1 });
        assert_eq!(h.registry.read().peer_count(), 0);
        assert_eq!(
            h.router.handle_frame(1, &frame("hb", "heartbeat", "alice", &())),
            Dispatch::default()
        );
    }
}
