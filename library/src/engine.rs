/*!
Collaborators the negotiation core drives but does not implement: the media engine and
its peer connections, the capture device, the signaling channel and the user interface.

The browser implementations live in [`crate::browser`]; tests provide recording doubles.
*/

use std::rc::Rc;

use async_trait::async_trait;
use thiserror::Error;
use wasm_call_protocol::{IceCandidate, SessionDescription};

use crate::call::CallState;
use crate::config::{IceServer, MediaConstraints};

/// Mirror of `RTCSignalingState`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

/// Mirror of `RTCIceConnectionState`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

/// Mirror of `RTCIceGatheringState`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

/// Notifications a peer connection raises on its own schedule.
#[derive(Debug, Clone)]
pub enum PeerEvent<S> {
    /// Local tracks changed in a way that requires a (re)negotiation
    NegotiationNeeded,
    /// Local ICE agent found a candidate; `None` marks the end of gathering
    IceCandidate(Option<IceCandidate>),
    IceConnectionStateChange(IceConnectionState),
    IceGatheringStateChange(IceGatheringState),
    SignalingStateChange(SignalingState),
    /// Remote media arrived (`track` or legacy `addstream`)
    RemoteStream(S),
    /// Remote side removed its stream (legacy `removestream`)
    RemoteStreamRemoved,
    /// Remote side opened a data channel
    DataChannel { label: String },
    DataChannelOpen { label: String },
    DataChannelClosed { label: String },
    DataChannelMessage { label: String, data: String },
}

/// Receiver of [`PeerEvent`]s installed with [`PeerConnection::set_event_handler`].
pub type PeerEventHandler<S> = Rc<dyn Fn(PeerEvent<S>)>;

/// Audio/video stream, local or remote.
pub trait MediaStream: Clone + 'static {
    fn id(&self) -> String;

    /// Stop every track of the stream, releasing the underlying device.
    fn stop_tracks(&self);
}

/// Handle to one `RTCPeerConnection`.
#[async_trait(?Send)]
pub trait PeerConnection: 'static {
    type Stream: MediaStream;

    async fn create_offer(&self) -> anyhow::Result<SessionDescription>;

    async fn create_answer(&self) -> anyhow::Result<SessionDescription>;

    async fn set_local_description(&self, description: &SessionDescription)
        -> anyhow::Result<()>;

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> anyhow::Result<()>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> anyhow::Result<()>;

    /// Description the engine settled on after `set_local_description`, if any.
    fn local_description(&self) -> Option<SessionDescription>;

    /// Whether `addTrack` is available; older engines only know `addStream`.
    fn supports_add_track(&self) -> bool;

    /// Attach each track of `stream` individually.
    ///
    /// # Errors
    /// Fails if the engine refuses one of the tracks.
    fn add_tracks(&self, stream: &Self::Stream) -> anyhow::Result<()>;

    /// Attach the whole stream through the legacy `addStream`.
    ///
    /// # Errors
    /// Fails if the engine refuses the stream.
    fn add_stream(&self, stream: &Self::Stream) -> anyhow::Result<()>;

    /// Install, or with `None` remove, the receiver of all engine notifications.
    fn set_event_handler(&self, handler: Option<PeerEventHandler<Self::Stream>>);

    fn close(&self);
}

/// Factory for peer connections.
pub trait MediaEngine: 'static {
    type Stream: MediaStream;
    type Peer: PeerConnection<Stream = Self::Stream>;

    /// # Errors
    /// Fails if the engine rejects the configuration.
    fn create_peer_connection(&self, ice_servers: &[IceServer]) -> anyhow::Result<Self::Peer>;
}

/// Why local media could not be acquired.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum CaptureError {
    /// No camera and/or microphone present
    #[error("no camera and/or microphone found")]
    NotFound,
    /// The user, or a policy, refused access; equivalent to declining the call
    #[error("access to camera and/or microphone was denied")]
    PermissionDenied,
    #[error("{0}")]
    Other(String),
}

impl CaptureError {
    /// Classify a `DOMException` by its `name`.
    #[must_use]
    pub fn from_dom_exception(name: &str, message: &str) -> Self {
        match name {
            "NotFoundError" | "DevicesNotFoundError" => Self::NotFound,
            "SecurityError" | "PermissionDeniedError" | "NotAllowedError" => {
                Self::PermissionDenied
            }
            _ => Self::Other(format!("{}: {}", name, message)),
        }
    }

    /// Declining is not a failure worth alarming the user about.
    #[must_use]
    pub const fn is_user_declined(&self) -> bool {
        matches!(self, Self::PermissionDenied)
    }
}

/// Source of local audio/video.
#[async_trait(?Send)]
pub trait CaptureDevice: 'static {
    type Stream: MediaStream;

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<Self::Stream, CaptureError>;
}

/// Outbound half of the signaling transport. Connecting and reconnecting is owned
/// by whoever created the channel.
pub trait SignalingChannel {
    /// # Errors
    /// Fails if the frame could not be handed to the transport.
    fn send(&self, frame: &str) -> anyhow::Result<()>;
}

/// Presentation layer. Every method has a no-op default so embedders only
/// implement what they render.
#[allow(unused_variables)]
pub trait CallUi<S> {
    fn on_state_change(&self, state: CallState) {}

    fn on_local_stream(&self, stream: &S) {}

    fn on_remote_stream(&self, stream: &S) {}

    /// Call is over; reset to the no-call view.
    fn on_call_reset(&self) {}

    /// Something the user has to be told about.
    fn notify(&self, notice: &str) {}

    /// Non-fatal failure of a negotiation step.
    fn report_error(&self, error: &crate::Error) {}

    fn on_status_response(&self, status: &serde_json::Value) {}

    fn on_data_message(&self, label: &str, data: &str) {}
}
