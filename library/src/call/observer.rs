//! Passive reactions to peer connection state changes. Nothing here holds state: it
//! logs, and tells the manager when a transition ends the call.

use std::rc::Rc;

use futures::task::LocalSpawnExt;
use log::{debug, error, info, warn};

use crate::call::{CallManager, TeardownReason};
use crate::engine::{
    CaptureDevice, IceConnectionState, IceGatheringState, MediaEngine, PeerConnection,
    PeerEvent, PeerEventHandler, SignalingState,
};

/// Route every notification of `peer` back into `manager`, tagged with the session
/// generation it was raised for.
pub(crate) fn subscribe<E, C>(manager: &CallManager<E, C>, peer: &E::Peer, generation: u64)
where
    E: MediaEngine,
    C: CaptureDevice<Stream = E::Stream>,
{
    let weak_manager = manager.downgrade();
    let handler: PeerEventHandler<E::Stream> = Rc::new(move |event: PeerEvent<E::Stream>| {
        let Some(manager) = weak_manager.upgrade() else {
            debug!("call manager dropped, ignoring {}", describe(&event));
            return;
        };
        let spawner = manager.spawner();
        let handled = spawner.spawn_local(async move {
            manager.handle_peer_event(generation, event).await;
        });
        if let Err(err) = handled {
            error!("failed to schedule peer event handling: {}", err);
        }
    });
    peer.set_event_handler(Some(handler));
}

pub(crate) fn ice_connection_changed(state: IceConnectionState) -> Option<TeardownReason> {
    info!("*** ICE connection state changed to {:?}", state);
    match state {
        IceConnectionState::Failed
        | IceConnectionState::Disconnected
        | IceConnectionState::Closed => Some(TeardownReason::IceConnection(state)),
        IceConnectionState::New
        | IceConnectionState::Checking
        | IceConnectionState::Connected
        | IceConnectionState::Completed => None,
    }
}

pub(crate) fn signaling_changed(state: SignalingState) -> Option<TeardownReason> {
    info!("*** WebRTC signaling state changed to {:?}", state);
    (state == SignalingState::Closed).then_some(TeardownReason::SignalingClosed)
}

pub(crate) fn ice_gathering_changed(state: IceGatheringState) {
    info!("*** ICE gathering state changed to {:?}", state);
}

pub(crate) fn data_channel_changed<S>(event: &PeerEvent<S>) {
    match event {
        PeerEvent::DataChannel { label } => info!("remote opened data channel {:?}", label),
        PeerEvent::DataChannelOpen { label } => info!("data channel {:?} is open", label),
        PeerEvent::DataChannelClosed { label } => warn!("data channel {:?} closed", label),
        _ => {}
    }
}

pub(crate) fn describe<S>(event: &PeerEvent<S>) -> &'static str {
    match event {
        PeerEvent::NegotiationNeeded => "negotiation-needed",
        PeerEvent::IceCandidate(_) => "local ICE candidate",
        PeerEvent::IceConnectionStateChange(_) => "ICE connection state change",
        PeerEvent::IceGatheringStateChange(_) => "ICE gathering state change",
        PeerEvent::SignalingStateChange(_) => "signaling state change",
        PeerEvent::RemoteStream(_) => "remote stream",
        PeerEvent::RemoteStreamRemoved => "remote stream removal",
        PeerEvent::DataChannel { .. } => "data channel",
        PeerEvent::DataChannelOpen { .. } => "data channel open",
        PeerEvent::DataChannelClosed { .. } => "data channel close",
        PeerEvent::DataChannelMessage { .. } => "data channel message",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_ice_states_end_the_call() {
        for state in [
            IceConnectionState::Failed,
            IceConnectionState::Disconnected,
            IceConnectionState::Closed,
        ] {
            assert_eq!(
                ice_connection_changed(state),
                Some(TeardownReason::IceConnection(state))
            );
        }
        for state in [
            IceConnectionState::New,
            IceConnectionState::Checking,
            IceConnectionState::Connected,
            IceConnectionState::Completed,
        ] {
            assert_eq!(ice_connection_changed(state), None);
        }
    }

    #[test]
    fn only_closed_signaling_ends_the_call() {
        assert_eq!(
            signaling_changed(SignalingState::Closed),
            Some(TeardownReason::SignalingClosed)
        );
        for state in [
            SignalingState::Stable,
            SignalingState::HaveLocalOffer,
            SignalingState::HaveRemoteOffer,
            SignalingState::HaveLocalPranswer,
            SignalingState::HaveRemotePranswer,
        ] {
            assert_eq!(signaling_changed(state), None);
        }
    }
}
