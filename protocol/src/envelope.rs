/*!
Outer frame exchanged with the signaling server.

Outbound frames carry `action`, `messagePayload` and `recipientClientId`; the server
relays them to the recipient as `messageType`, `messagePayload` and `senderClientId`,
adding `statusResponse` to its own `STATUS_RESPONSE` frames.
*/

use std::fmt::{Display, Formatter};

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::blob::{from_blob, to_blob};
use crate::ClientId;

/// Kind of a signaling frame. Values this version does not know about are kept
/// as [`MessageKind::Unrecognized`] instead of failing the whole frame.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// `SDP` offer of the calling peer
    SdpOffer,
    /// `SDP` answer of the called peer
    SdpAnswer,
    /// Trickled ICE candidate
    IceCandidate,
    /// Diagnostic emitted by the signaling server itself
    StatusResponse,
    /// Anything newer peers or servers might send
    Unrecognized(String),
}

impl MessageKind {
    /// Name used on the wire
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::SdpOffer => "SDP_OFFER",
            Self::SdpAnswer => "SDP_ANSWER",
            Self::IceCandidate => "ICE_CANDIDATE",
            Self::StatusResponse => "STATUS_RESPONSE",
            Self::Unrecognized(other) => other,
        }
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "SDP_OFFER" => Self::SdpOffer,
            "SDP_ANSWER" => Self::SdpAnswer,
            "ICE_CANDIDATE" => Self::IceCandidate,
            "STATUS_RESPONSE" => Self::StatusResponse,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Unrecognized(other) => other,
            known => known.as_str().to_owned(),
        }
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a frame could not be decoded. Callers drop such frames.
#[derive(Debug, Error)]
pub enum ParseFailure {
    /// Outer frame is not a JSON envelope
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    /// `messagePayload` is not valid base64
    #[error("payload is not base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// Decoded payload bytes are not UTF-8
    #[error("payload is not UTF-8: {0}")]
    PayloadNotUtf8(#[from] std::string::FromUtf8Error),
    /// Decoded payload text is not JSON
    #[error("payload is not JSON: {0}")]
    PayloadNotJson(#[source] serde_json::Error),
    /// Payload is JSON but not of the shape its message kind requires
    #[error("unexpected payload for {kind}: {source}")]
    PayloadShape {
        /// kind of the frame the payload came with
        kind: MessageKind,
        /// underlying deserialization error
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(default)]
    message_type: Option<MessageKind>,
    #[serde(default)]
    action: Option<MessageKind>,
    #[serde(default)]
    message_payload: Option<String>,
    #[serde(default)]
    sender_client_id: Option<ClientId>,
    #[serde(default)]
    recipient_client_id: Option<ClientId>,
    #[serde(default)]
    status_response: Option<Value>,
}

/// Decoded frame with its payload already taken out of the blob.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// `messageType` of inbound frames, `action` of outbound ones
    pub kind: MessageKind,
    /// JSON document carried in `messagePayload`, `null` when absent
    pub message_payload: Value,
    /// Set on frames relayed from another client
    pub sender_client_id: Option<ClientId>,
    /// Set on frames addressed to another client
    pub recipient_client_id: Option<ClientId>,
    /// Set on `STATUS_RESPONSE` frames
    pub status_response: Option<Value>,
}

impl Envelope {
    /// Interpret the payload as a typed document.
    ///
    /// # Errors
    /// [`ParseFailure::PayloadShape`] when the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ParseFailure> {
        T::deserialize(&self.message_payload).map_err(|source| ParseFailure::PayloadShape {
            kind: self.kind.clone(),
            source,
        })
    }
}

/// Wrap `payload` for `recipient` into an outbound frame.
#[must_use]
pub fn encode(action: &MessageKind, payload: &Value, recipient: &ClientId) -> String {
    json!({
        "action": action.as_str(),
        "messagePayload": to_blob(payload),
        "recipientClientId": recipient.as_str(),
    })
    .to_string()
}

/// Typed variant of [`encode`].
///
/// # Errors
/// Fails only if `payload`'s `Serialize` implementation does.
pub fn encode_payload<T: Serialize + ?Sized>(
    action: &MessageKind,
    payload: &T,
    recipient: &ClientId,
) -> Result<String, serde_json::Error> {
    Ok(encode(action, &serde_json::to_value(payload)?, recipient))
}

/// Decode any frame, inbound or outbound. Total over arbitrary input.
///
/// # Errors
/// Returns a [`ParseFailure`] for anything that is not a well formed envelope.
pub fn decode(frame: impl AsRef<[u8]>) -> Result<Envelope, ParseFailure> {
    let wire: WireEnvelope =
        serde_json::from_slice(frame.as_ref()).map_err(ParseFailure::Envelope)?;
    let kind = wire
        .message_type
        .or(wire.action)
        .ok_or_else(|| ParseFailure::Envelope(de::Error::missing_field("messageType")))?;
    let message_payload = match wire.message_payload.as_deref() {
        Some(blob) => from_blob(blob)?,
        None => Value::Null,
    };
    Ok(Envelope {
        kind,
        message_payload,
        sender_client_id: wire.sender_client_id,
        recipient_client_id: wire.recipient_client_id,
        status_response: wire.status_response,
    })
}
