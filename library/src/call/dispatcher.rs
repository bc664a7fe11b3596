use log::{debug, info, warn};
use wasm_call_protocol::{decode, IceCandidate, MessageKind, ParseFailure, SessionDescription};

use crate::call::CallManager;
use crate::engine::{CaptureDevice, MediaEngine};

/// What became of one inbound signaling frame.
#[derive(Debug)]
pub enum Dispatched {
    /// Frame could not be decoded and was dropped
    Dropped(ParseFailure),
    /// Frame was handed to the negotiation state machine
    Routed(MessageKind),
    /// Server diagnostic, passed through without touching the call
    Status,
    /// Kind this version does not know about, ignored
    Unrecognized(String),
}

/// Decode a frame received from the signaling server and route it to `manager`.
///
/// Never fails: frames that cannot be parsed, possibly sent by a newer protocol version,
/// are logged and dropped, and failures of the triggered operation are handled by the
/// state machine itself.
pub async fn handle_signaling_frame<E, C>(
    manager: &CallManager<E, C>,
    frame: impl AsRef<[u8]>,
) -> Dispatched
where
    E: MediaEngine,
    C: CaptureDevice<Stream = E::Stream>,
{
    let envelope = match decode(frame) {
        Ok(envelope) => envelope,
        Err(failure) => {
            warn!("dropping unparseable signaling frame: {}", failure);
            return Dispatched::Dropped(failure);
        }
    };

    let outcome = match &envelope.kind {
        MessageKind::SdpOffer => {
            let offer = match envelope.payload_as::<SessionDescription>() {
                Ok(offer) => offer,
                Err(failure) => return dropped(failure),
            };
            let sender = envelope.sender_client_id.clone().unwrap_or_default();
            info!("got SDP offer from {:?}", sender.as_str());
            manager.on_remote_offer(sender, offer).await
        }
        MessageKind::SdpAnswer => {
            let answer = match envelope.payload_as::<SessionDescription>() {
                Ok(answer) => answer,
                Err(failure) => return dropped(failure),
            };
            info!("got SDP answer");
            manager.on_remote_answer(answer).await
        }
        MessageKind::IceCandidate => {
            let candidate = match envelope.payload_as::<IceCandidate>() {
                Ok(candidate) => candidate,
                Err(failure) => return dropped(failure),
            };
            manager.on_remote_candidate(candidate).await
        }
        MessageKind::StatusResponse => {
            let status = envelope.status_response.unwrap_or_default();
            info!("status response: {}", status);
            manager.ui().on_status_response(&status);
            return Dispatched::Status;
        }
        MessageKind::Unrecognized(kind) => {
            warn!("unknown message type {:?}, ignoring", kind);
            return Dispatched::Unrecognized(kind.clone());
        }
    };

    if let Err(err) = outcome {
        debug!("{} was not applied: {}", envelope.kind, err);
    }
    Dispatched::Routed(envelope.kind)
}

fn dropped(failure: ParseFailure) -> Dispatched {
    warn!("dropping signaling frame: {}", failure);
    Dispatched::Dropped(failure)
}
