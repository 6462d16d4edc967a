//! Wire protocol for peer connections
//!
//! Every frame is a JSON envelope `{id, type, senderId, payload, timestamp}`.
//! `payload` is base64 over UTF-8 JSON whose shape depends on `type`.
//! Decoding turns the string tag into a closed [`InboundMessage`] so the
//! router matches on variants instead of strings.

use crate::error::{RelayError, Result};
use crate::ledger::{now_seconds, Block, Transaction};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Handshake,
    SyncRequest,
    SyncResponse,
    BlockBroadcast,
    TransactionBroadcast,
    Heartbeat,
    Unknown(String),
}

impl MessageType {
    pub fn from_wire(tag: &str) -> Self {
        match tag {
            "handshake" => MessageType::Handshake,
            "syncRequest" => MessageType::SyncRequest,
            "syncResponse" => MessageType::SyncResponse,
            "blockBroadcast" => MessageType::BlockBroadcast,
            "transactionBroadcast" => MessageType::TransactionBroadcast,
            "heartbeat" => MessageType::Heartbeat,
            other => MessageType::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::Handshake => "handshake",
            MessageType::SyncRequest => "syncRequest",
            MessageType::SyncResponse => "syncResponse",
            MessageType::BlockBroadcast => "blockBroadcast",
            MessageType::TransactionBroadcast => "transactionBroadcast",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub timestamp: f64,
}

/// Typed content of an inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Handshake,
    SyncRequest(SyncRequest),
    SyncResponse,
    BlockBroadcast(Block),
    TransactionBroadcast(Transaction),
    Heartbeat,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// `-1` (the default) asks for the chain from genesis.
    #[serde(default = "default_last_known_height")]
    pub last_known_block_height: i64,
    pub user_address: String,
    #[serde(default)]
    pub requested_blocks: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeReply {
    pub node_id: String,
    pub current_height: u64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReply {
    pub timestamp: f64,
    pub height: u64,
    pub peer_count: usize,
}

fn default_last_known_height() -> i64 {
    -1
}

impl Envelope {
    /// Wraps `payload` in a fresh envelope stamped with the current time.
    pub fn new<T: Serialize>(
        id: impl Into<String>,
        kind: MessageType,
        sender_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            kind: kind.as_str().to_string(),
            sender_id: sender_id.into(),
            payload: encode_payload(payload)?,
            timestamp: now_seconds(),
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| RelayError::MalformedEnvelope(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_wire(&self.kind)
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T> {
        decode_payload(&self.payload)
    }

    /// Decodes the payload according to the envelope's type. Handshake and
    /// heartbeat carry no required payload and never fail here.
    pub fn decode(&self) -> Result<InboundMessage> {
        Ok(match self.message_type() {
            MessageType::Handshake => InboundMessage::Handshake,
            MessageType::Heartbeat => InboundMessage::Heartbeat,
            MessageType::SyncResponse => InboundMessage::SyncResponse,
            MessageType::SyncRequest => InboundMessage::SyncRequest(self.decode_payload()?),
            MessageType::BlockBroadcast => InboundMessage::BlockBroadcast(self.decode_payload()?),
            MessageType::TransactionBroadcast => {
                InboundMessage::TransactionBroadcast(self.decode_payload()?)
            }
            MessageType::Unknown(tag) => InboundMessage::Unknown(tag),
        })
    }
}

pub fn encode_payload<T: Serialize>(payload: &T) -> Result<String> {
    let json = serde_json::to_vec(payload)?;
    Ok(STANDARD.encode(json))
}

pub fn decode_payload<T: DeserializeOwned>(payload: &str) -> Result<T> {
    let bytes = STANDARD.decode(payload.trim())?;
    let text = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&text)?)
}

/// Random 128-bit correlation id, hex encoded.
pub fn new_message_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}
