use std::collections::VecDeque;
use std::rc::Rc;

use log::debug;
use uuid::Uuid;
use wasm_call_protocol::{ClientId, IceCandidate};

use crate::engine::{MediaStream, PeerConnection};

/// The one negotiation context a [`CallManager`](super::CallManager) owns while a call exists.
pub(crate) struct Session<P: PeerConnection> {
    /// Only used to correlate log lines.
    pub call_id: Uuid,
    /// Continuations started for an older generation must not touch this session.
    pub generation: u64,
    pub target: ClientId,
    pub peer: Rc<P>,
    pub has_add_track: bool,
    pub remote_description_set: bool,
    /// Remote candidates received before the remote description, in receipt order.
    pub pending_remote_candidates: VecDeque<IceCandidate>,
    pub making_offer: bool,
    /// The outstanding offer renegotiates an already connected call.
    pub renegotiating: bool,
    pub local_stream: Option<P::Stream>,
    pub remote_stream: Option<P::Stream>,
}

impl<P: PeerConnection> Session<P> {
    pub fn new(generation: u64, target: ClientId, peer: P) -> Self {
        let has_add_track = peer.supports_add_track();
        Self {
            call_id: Uuid::new_v4(),
            generation,
            target,
            peer: Rc::new(peer),
            has_add_track,
            remote_description_set: false,
            pending_remote_candidates: VecDeque::new(),
            making_offer: false,
            renegotiating: false,
            local_stream: None,
            remote_stream: None,
        }
    }

    /// Detach from the engine first so no callback re-enters while media and the
    /// connection are being shut down.
    pub fn release(self) {
        debug!("--> closing the peer connection of call {}", self.call_id);
        self.peer.set_event_handler(None);

        if let Some(stream) = &self.remote_stream {
            stream.stop_tracks();
        }
        if let Some(stream) = &self.local_stream {
            stream.stop_tracks();
        }

        self.peer.close();
    }
}
