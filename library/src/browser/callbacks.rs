use std::cell::RefCell;
use std::rc::{Rc, Weak};

use js_sys::{Array, Reflect, Uint8Array};
use log::{debug, error, info, warn};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    MediaStream, MessageEvent, RtcDataChannel, RtcDataChannelEvent, RtcIceConnectionState,
    RtcIceGatheringState, RtcPeerConnection, RtcPeerConnectionIceEvent, RtcSignalingState,
    RtcTrackEvent, WebSocket,
};

use crate::browser::{BrowserCapture, BrowserEngine, BrowserStream};
use crate::call::{handle_signaling_frame, CallManager};
use crate::engine::{
    IceConnectionState, IceGatheringState, PeerEvent, PeerEventHandler, SignalingState,
};
use crate::IceCandidate;

pub(crate) type Callback = Closure<dyn FnMut(JsValue)>;

fn callback(on_event: impl FnMut(JsValue) + 'static) -> Callback {
    let on_event: Box<dyn FnMut(JsValue)> = Box::new(on_event);
    Closure::wrap(on_event)
}

/// Closures subscribed to a peer connection and to the data channels it announced.
/// They must stay alive until [`clear_peer_connection_callbacks`] detaches them.
#[derive(Default)]
pub(crate) struct Subscriptions {
    callbacks: Vec<Callback>,
    data_channels: Vec<(RtcDataChannel, Vec<Callback>)>,
}

impl Subscriptions {
    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
            + self
                .data_channels
                .iter()
                .map(|(_, callbacks)| callbacks.len())
                .sum::<usize>()
    }
}

/// Forward every peer connection notification to `handler`.
pub(crate) fn set_peer_connection_callbacks(
    peer_connection: &RtcPeerConnection,
    handler: &PeerEventHandler<BrowserStream>,
    subscriptions: &Rc<RefCell<Subscriptions>>,
) {
    let mut callbacks = Vec::with_capacity(9);

    let on_ice_candidate = {
        let handler = Rc::clone(handler);
        callback(move |ev: JsValue| {
            let Ok(ev) = ev.dyn_into::<RtcPeerConnectionIceEvent>() else {
                return;
            };
            let candidate = ev
                .candidate()
                .filter(|candidate| !candidate.candidate().is_empty())
                .map(|candidate| IceCandidate {
                    candidate: candidate.candidate(),
                    sdp_mid: candidate.sdp_mid(),
                    sdp_m_line_index: candidate.sdp_m_line_index(),
                    // not exposed by every web-sys release
                    username_fragment: Reflect::get(&candidate, &"usernameFragment".into())
                        .ok()
                        .and_then(|ufrag| ufrag.as_string()),
                });
            handler(PeerEvent::IceCandidate(candidate));
        })
    };
    peer_connection.set_onicecandidate(Some(on_ice_candidate.as_ref().unchecked_ref()));
    callbacks.push(on_ice_candidate);

    let on_ice_connection_state_change = {
        let handler = Rc::clone(handler);
        let peer_connection = peer_connection.clone();
        callback(move |_| {
            let state = peer_connection.ice_connection_state();
            match ice_connection_state(state) {
                Some(state) => handler(PeerEvent::IceConnectionStateChange(state)),
                None => warn!("unknown ICE connection state: {:?}", state),
            }
        })
    };
    peer_connection.set_oniceconnectionstatechange(Some(
        on_ice_connection_state_change.as_ref().unchecked_ref(),
    ));
    callbacks.push(on_ice_connection_state_change);

    let on_ice_gathering_state_change = {
        let handler = Rc::clone(handler);
        let peer_connection = peer_connection.clone();
        callback(move |_| {
            let state = peer_connection.ice_gathering_state();
            match ice_gathering_state(state) {
                Some(state) => handler(PeerEvent::IceGatheringStateChange(state)),
                None => warn!("unknown ICE gathering state: {:?}", state),
            }
        })
    };
    peer_connection.set_onicegatheringstatechange(Some(
        on_ice_gathering_state_change.as_ref().unchecked_ref(),
    ));
    callbacks.push(on_ice_gathering_state_change);

    let on_signaling_state_change = {
        let handler = Rc::clone(handler);
        let peer_connection = peer_connection.clone();
        callback(move |_| {
            let state = peer_connection.signaling_state();
            match signaling_state(state) {
                Some(state) => handler(PeerEvent::SignalingStateChange(state)),
                None => warn!("unknown signaling state: {:?}", state),
            }
        })
    };
    peer_connection
        .set_onsignalingstatechange(Some(on_signaling_state_change.as_ref().unchecked_ref()));
    callbacks.push(on_signaling_state_change);

    let on_negotiation_needed = {
        let handler = Rc::clone(handler);
        callback(move |_| handler(PeerEvent::NegotiationNeeded))
    };
    peer_connection.set_onnegotiationneeded(Some(on_negotiation_needed.as_ref().unchecked_ref()));
    callbacks.push(on_negotiation_needed);

    let on_track = {
        let handler = Rc::clone(handler);
        callback(move |ev: JsValue| {
            let Ok(ev) = ev.dyn_into::<RtcTrackEvent>() else {
                return;
            };
            match ev.streams().get(0).dyn_into::<MediaStream>() {
                Ok(stream) => handler(PeerEvent::RemoteStream(BrowserStream::new(stream))),
                Err(_) => debug!("track event without a stream, ignoring"),
            }
        })
    };
    peer_connection.set_ontrack(Some(on_track.as_ref().unchecked_ref()));
    callbacks.push(on_track);

    let on_data_channel = {
        let handler = Rc::clone(handler);
        let subscriptions: Weak<RefCell<Subscriptions>> = Rc::downgrade(subscriptions);
        callback(move |ev: JsValue| {
            let Ok(ev) = ev.dyn_into::<RtcDataChannelEvent>() else {
                return;
            };
            let Some(subscriptions) = subscriptions.upgrade() else {
                return;
            };
            let data_channel = ev.channel();
            handler(PeerEvent::DataChannel {
                label: data_channel.label(),
            });
            let callbacks = set_data_channel_callbacks(&data_channel, &handler);
            subscriptions
                .borrow_mut()
                .data_channels
                .push((data_channel, callbacks));
        })
    };
    peer_connection.set_ondatachannel(Some(on_data_channel.as_ref().unchecked_ref()));
    callbacks.push(on_data_channel);

    // legacy stream events are not part of web-sys
    let on_add_stream = {
        let handler = Rc::clone(handler);
        callback(move |ev: JsValue| {
            if let Some(stream) = Reflect::get(&ev, &"stream".into())
                .ok()
                .and_then(|stream| stream.dyn_into::<MediaStream>().ok())
            {
                handler(PeerEvent::RemoteStream(BrowserStream::new(stream)));
            }
        })
    };
    set_legacy_handler(peer_connection, "onaddstream", on_add_stream.as_ref());
    callbacks.push(on_add_stream);

    let on_remove_stream = {
        let handler = Rc::clone(handler);
        callback(move |_| handler(PeerEvent::RemoteStreamRemoved))
    };
    set_legacy_handler(peer_connection, "onremovestream", on_remove_stream.as_ref());
    callbacks.push(on_remove_stream);

    subscriptions.borrow_mut().callbacks = callbacks;
}

/// Unhook everything [`set_peer_connection_callbacks`] installed, then drop the closures.
pub(crate) fn clear_peer_connection_callbacks(
    peer_connection: &RtcPeerConnection,
    subscriptions: &RefCell<Subscriptions>,
) {
    peer_connection.set_onicecandidate(None);
    peer_connection.set_oniceconnectionstatechange(None);
    peer_connection.set_onicegatheringstatechange(None);
    peer_connection.set_onsignalingstatechange(None);
    peer_connection.set_onnegotiationneeded(None);
    peer_connection.set_ontrack(None);
    peer_connection.set_ondatachannel(None);
    set_legacy_handler(peer_connection, "onaddstream", &JsValue::NULL);
    set_legacy_handler(peer_connection, "onremovestream", &JsValue::NULL);

    let previous = std::mem::take(&mut *subscriptions.borrow_mut());
    for (data_channel, _) in &previous.data_channels {
        data_channel.set_onopen(None);
        data_channel.set_onclose(None);
        data_channel.set_onmessage(None);
    }
    drop(previous);
}

fn set_legacy_handler(peer_connection: &RtcPeerConnection, name: &str, value: &JsValue) {
    if let Err(err) = Reflect::set(peer_connection, &name.into(), value) {
        warn!("failed to set {}: {:?}", name, err);
    }
}

fn set_data_channel_callbacks(
    data_channel: &RtcDataChannel,
    handler: &PeerEventHandler<BrowserStream>,
) -> Vec<Callback> {
    let label = data_channel.label();

    let on_open = {
        let handler = Rc::clone(handler);
        let label = label.clone();
        callback(move |_| {
            handler(PeerEvent::DataChannelOpen {
                label: label.clone(),
            });
        })
    };
    data_channel.set_onopen(Some(on_open.as_ref().unchecked_ref()));

    let on_close = {
        let handler = Rc::clone(handler);
        let label = label.clone();
        callback(move |_| {
            handler(PeerEvent::DataChannelClosed {
                label: label.clone(),
            });
        })
    };
    data_channel.set_onclose(Some(on_close.as_ref().unchecked_ref()));

    let on_message = {
        let handler = Rc::clone(handler);
        callback(move |ev: JsValue| {
            let Some(data) = ev
                .dyn_into::<MessageEvent>()
                .ok()
                .and_then(|ev| ev.data().as_string())
            else {
                debug!("non-text data channel message on {:?}, ignoring", label);
                return;
            };
            handler(PeerEvent::DataChannelMessage {
                label: label.clone(),
                data,
            });
        })
    };
    data_channel.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

    vec![on_open, on_close, on_message]
}

/// handle frames relayed by the signaling server
pub(crate) fn set_websocket_on_message(
    websocket: &WebSocket,
    manager: CallManager<BrowserEngine, BrowserCapture>,
) {
    let on_message_callback = callback(move |ev: JsValue| {
        let Ok(ev) = ev.dyn_into::<MessageEvent>() else {
            return;
        };
        let data = ev.data();
        let frame = match data.as_string() {
            Some(text) => text.into_bytes(),
            None => match data.dyn_into::<js_sys::ArrayBuffer>() {
                Ok(buffer) => Uint8Array::new(&buffer).to_vec(),
                Err(_) => {
                    error!("signaling frame is neither text nor binary");
                    return;
                }
            },
        };
        let manager = manager.clone();
        wasm_bindgen_futures::spawn_local(async move {
            let dispatched = handle_signaling_frame(&manager, frame).await;
            debug!("signaling frame handled: {:?}", dispatched);
        });
    });
    websocket.set_onmessage(Some(on_message_callback.as_ref().unchecked_ref()));
    on_message_callback.forget();
}

pub(crate) fn set_websocket_on_open(websocket: &WebSocket) {
    let on_open_callback = callback(move |_| info!("opened signaling websocket"));
    websocket.set_onopen(Some(on_open_callback.as_ref().unchecked_ref()));
    on_open_callback.forget();

    let on_error_callback = callback(move |err| error!("signaling websocket error: {:?}", err));
    websocket.set_onerror(Some(on_error_callback.as_ref().unchecked_ref()));
    on_error_callback.forget();
}

fn ice_connection_state(state: RtcIceConnectionState) -> Option<IceConnectionState> {
    Some(match state {
        RtcIceConnectionState::New => IceConnectionState::New,
        RtcIceConnectionState::Checking => IceConnectionState::Checking,
        RtcIceConnectionState::Connected => IceConnectionState::Connected,
        RtcIceConnectionState::Completed => IceConnectionState::Completed,
        RtcIceConnectionState::Failed => IceConnectionState::Failed,
        RtcIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RtcIceConnectionState::Closed => IceConnectionState::Closed,
        _ => return None,
    })
}

fn ice_gathering_state(state: RtcIceGatheringState) -> Option<IceGatheringState> {
    Some(match state {
        RtcIceGatheringState::New => IceGatheringState::New,
        RtcIceGatheringState::Gathering => IceGatheringState::Gathering,
        RtcIceGatheringState::Complete => IceGatheringState::Complete,
        _ => return None,
    })
}

fn signaling_state(state: RtcSignalingState) -> Option<SignalingState> {
    Some(match state {
        RtcSignalingState::Stable => SignalingState::Stable,
        RtcSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RtcSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RtcSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RtcSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RtcSignalingState::Closed => SignalingState::Closed,
        _ => return None,
    })
}

/// Wrap ICE servers into the array `RTCConfiguration.iceServers` expects.
pub(crate) fn ice_servers_array(
    ice_servers: &[crate::IceServer],
) -> Result<Array, JsValue> {
    let array = Array::new();
    for server in ice_servers {
        let entry = js_sys::Object::new();
        let urls: Array = server.urls.iter().map(JsValue::from_str).collect();
        Reflect::set(&entry, &"urls".into(), &urls)?;
        if let Some(username) = &server.username {
            Reflect::set(&entry, &"username".into(), &username.into())?;
        }
        if let Some(credential) = &server.credential {
            Reflect::set(&entry, &"credential".into(), &credential.into())?;
        }
        array.push(&entry);
    }
    Ok(array)
}
