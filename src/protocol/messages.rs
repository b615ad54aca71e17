use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::BTreeMap;

use super::{EventId, ReceiveId};
use crate::error::DecodeError;

/// Payload schema version this client speaks for every message type
pub const PROTOCOL_VERSION: u32 = 1;

/// HTTP headers as carried on the wire. Order is irrelevant; a sorted map
/// keeps re-encoding of the same payload byte-stable.
pub type Headers = BTreeMap<String, String>;

/// Envelope `type` tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Start,
    Event,
    #[serde(other)]
    Unknown,
}

/// The unit exchanged over the socket: `{type, version, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default = "default_version")]
    pub version: u32,
    pub data: T,
}

/// An envelope whose payload has not been interpreted yet
pub type RawEnvelope = Envelope<Box<RawValue>>;

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

fn default_method() -> String {
    "POST".to_string()
}

/// Client -> relay, sent once right after the socket opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPayload {
    pub token: String,
}

/// Relay -> client, the handshake answer carrying the receive identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAck {
    #[serde(alias = "connection_id")]
    pub token: ReceiveId,
}

/// Relay -> client, one inbound webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub id: EventId,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    /// Base64-encoded request body
    #[serde(default)]
    pub body: String,
}

/// Client -> relay, the local server's answer to one [`EventPayload`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub id: EventId,
    pub status: u16,
    pub headers: Headers,
    /// Base64-encoded response body
    pub body: String,
}

/// Inbound messages this client understands, keyed by `(type, version)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    Start(StartAck),
    Event(EventPayload),
}

impl<T: Serialize> Envelope<T> {
    pub fn new(kind: MessageType, data: T) -> Self {
        Envelope {
            kind,
            version: PROTOCOL_VERSION,
            data,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl EventPayload {
    pub fn decode_body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.body)
    }
}

impl ResponsePayload {
    pub fn new(id: EventId, status: u16, headers: Headers, body: &[u8]) -> Self {
        ResponsePayload {
            id,
            status,
            headers,
            body: base64::engine::general_purpose::STANDARD.encode(body),
        }
    }
}

impl IncomingMessage {
    /// Decode a raw frame and interpret its payload.
    ///
    /// Unknown types and unknown versions of known types are rejected
    /// rather than guessed at; the caller drops the frame.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let envelope = decode_envelope(frame)?;

        match (envelope.kind, envelope.version) {
            (MessageType::Start, PROTOCOL_VERSION) => {
                Ok(IncomingMessage::Start(serde_json::from_str(envelope.data.get())?))
            }
            (MessageType::Event, PROTOCOL_VERSION) => {
                Ok(IncomingMessage::Event(decode_event_payload(&envelope.data)?))
            }
            (MessageType::Unknown, _) => Err(DecodeError::UnknownType),
            (kind, version) => Err(DecodeError::UnsupportedVersion { kind, version }),
        }
    }
}

pub fn encode_start(token: &str) -> Result<String, serde_json::Error> {
    Envelope::new(
        MessageType::Start,
        StartPayload {
            token: token.to_string(),
        },
    )
    .to_json()
}

pub fn encode_response(response: &ResponsePayload) -> Result<String, serde_json::Error> {
    Envelope::new(MessageType::Event, response).to_json()
}

/// Split a frame into its envelope fields without touching the payload.
pub fn decode_envelope(frame: &[u8]) -> Result<RawEnvelope, DecodeError> {
    Ok(serde_json::from_slice(frame)?)
}

pub fn decode_event_payload(data: &RawValue) -> Result<EventPayload, DecodeError> {
    Ok(serde_json::from_str(data.get())?)
}
