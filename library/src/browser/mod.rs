/*!
`web-sys` implementations of the collaborators in [`crate::engine`].

```no_run
use std::rc::Rc;

use wasm_call::browser::{self, BrowserStream};
use wasm_call::engine::CallUi;
use wasm_call::{CallConfig, ClientId};

struct Page;

impl CallUi<BrowserStream> for Page {
    fn notify(&self, notice: &str) {
        web_sys::console::warn_1(&notice.into());
    }
}

let config = CallConfig::from_json(r#"{"ClientId": "viewer", "signalingUrl": "wss://signal.example.com"}"#)
    .unwrap();
let manager = browser::connect(config, Rc::new(Page)).unwrap();
wasm_bindgen_futures::spawn_local(async move {
    manager.invite(ClientId::from("master")).await.ok();
});
```
*/

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::LocalFutureObj;
use futures::task::{LocalSpawn, SpawnError};
use js_sys::{Function, Reflect};
use log::debug;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    MediaStream as WebMediaStream, MediaStreamConstraints, MediaStreamTrack, RtcConfiguration,
    RtcIceCandidate, RtcIceCandidateInit, RtcPeerConnection, RtcSdpType,
    RtcSessionDescriptionInit, WebSocket,
};

use crate::browser::callbacks::{
    clear_peer_connection_callbacks, ice_servers_array, set_peer_connection_callbacks,
    set_websocket_on_message, set_websocket_on_open, Subscriptions,
};
use crate::engine::{
    CallUi, CaptureDevice, CaptureError, MediaEngine, MediaStream, PeerConnection,
    PeerEventHandler, SignalingChannel,
};
use crate::{
    CallConfig, CallManager, IceCandidate, IceServer, MediaConstraints, SdpType,
    SessionDescription,
};

mod callbacks;

pub(crate) fn set_panic_hook() {
    // When the `console_error_panic_hook` feature is enabled, we can call the
    // `set_panic_hook` function at least once during initialization, and then
    // we will get better error messages if our code ever panics.
    //
    // For more details see
    // https://github.com/rustwasm/console_error_panic_hook#readme
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Open the signaling `WebSocket` from `config` and build a [`CallManager`] on top of it.
/// Frames received on the socket are dispatched to the manager.
///
/// # Errors
/// This function errs if opening a `WebSocket` connection to `config.signaling_url` fails.
pub fn connect(
    config: CallConfig,
    ui: Rc<dyn CallUi<BrowserStream>>,
) -> crate::Result<CallManager<BrowserEngine, BrowserCapture>> {
    set_panic_hook();

    let websocket = WebSocket::new(&config.signaling_url).map_err(|err| {
        crate::Error::Signaling(anyhow!(
            "failed to create connection with signaling server on {}: {:?}",
            config.signaling_url,
            err
        ))
    })?;
    websocket.set_binary_type(web_sys::BinaryType::Arraybuffer);

    let manager = CallManager::new(
        config,
        BrowserEngine,
        BrowserCapture,
        Rc::new(WebSocketChannel::new(websocket.clone())),
        ui,
        Rc::new(WasmSpawner),
    );
    set_websocket_on_open(&websocket);
    set_websocket_on_message(&websocket, manager.clone());
    Ok(manager)
}

/// Runs futures with `wasm_bindgen_futures::spawn_local`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasmSpawner;

impl LocalSpawn for WasmSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        wasm_bindgen_futures::spawn_local(future);
        Ok(())
    }
}

/// Signaling channel over an already created `WebSocket`.
#[derive(Debug, Clone)]
pub struct WebSocketChannel {
    websocket: WebSocket,
}

impl WebSocketChannel {
    #[must_use]
    pub const fn new(websocket: WebSocket) -> Self {
        Self { websocket }
    }
}

impl SignalingChannel for WebSocketChannel {
    fn send(&self, frame: &str) -> anyhow::Result<()> {
        self.websocket
            .send_with_str(frame)
            .map_err(|err| anyhow!("failed to send message across the websocket: {:?}", err))
    }
}

#[derive(Debug, Clone)]
pub struct BrowserStream {
    stream: WebMediaStream,
}

impl BrowserStream {
    #[must_use]
    pub const fn new(stream: WebMediaStream) -> Self {
        Self { stream }
    }

    /// Underlying stream, e.g. to assign to a `<video>` element's `srcObject`.
    #[must_use]
    pub const fn media_stream(&self) -> &WebMediaStream {
        &self.stream
    }

    fn tracks(&self) -> Vec<MediaStreamTrack> {
        self.stream
            .get_tracks()
            .iter()
            .filter_map(|track| track.dyn_into::<MediaStreamTrack>().ok())
            .collect()
    }
}

impl MediaStream for BrowserStream {
    fn id(&self) -> String {
        self.stream.id()
    }

    fn stop_tracks(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserEngine;

impl MediaEngine for BrowserEngine {
    type Stream = BrowserStream;
    type Peer = BrowserPeer;

    fn create_peer_connection(&self, ice_servers: &[IceServer]) -> anyhow::Result<BrowserPeer> {
        let ice_servers = ice_servers_array(ice_servers)
            .map_err(|err| anyhow!("failed to build ICE server list: {:?}", err))?;
        let mut rtc_configuration = RtcConfiguration::new();
        rtc_configuration.ice_servers(&ice_servers);

        let peer_connection = RtcPeerConnection::new_with_configuration(&rtc_configuration)
            .map_err(|err| anyhow!("failed to create peer connection: {:?}", err))?;
        Ok(BrowserPeer {
            peer_connection,
            subscriptions: Rc::default(),
        })
    }
}

/// `RTCPeerConnection` together with the closures subscribed to it.
pub struct BrowserPeer {
    peer_connection: RtcPeerConnection,
    subscriptions: Rc<RefCell<Subscriptions>>,
}

impl BrowserPeer {
    #[must_use]
    pub const fn peer_connection(&self) -> &RtcPeerConnection {
        &self.peer_connection
    }

    /// Number of closures currently subscribed to the connection and its data channels.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.borrow().len()
    }
}

#[async_trait(?Send)]
impl PeerConnection for BrowserPeer {
    type Stream = BrowserStream;

    async fn create_offer(&self) -> anyhow::Result<SessionDescription> {
        let offer = JsFuture::from(self.peer_connection.create_offer())
            .await
            .map_err(|err| anyhow!("failed to create an SDP offer: {:?}", err))?;
        description_from_js(&offer)
    }

    async fn create_answer(&self) -> anyhow::Result<SessionDescription> {
        let answer = JsFuture::from(self.peer_connection.create_answer())
            .await
            .map_err(|err| anyhow!("failed to create an SDP answer: {:?}", err))?;
        description_from_js(&answer)
    }

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> anyhow::Result<()> {
        let local_session_description = description_init(description);
        JsFuture::from(
            self.peer_connection
                .set_local_description(&local_session_description),
        )
        .await
        .map_err(|err| anyhow!("failed to set local description: {:?}", err))?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> anyhow::Result<()> {
        let remote_session_description = description_init(description);
        JsFuture::from(
            self.peer_connection
                .set_remote_description(&remote_session_description),
        )
        .await
        .map_err(|err| anyhow!("failed to set remote description: {:?}", err))?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> anyhow::Result<()> {
        let mut rtc_candidate = RtcIceCandidateInit::new(&candidate.candidate);
        rtc_candidate.sdp_mid(candidate.sdp_mid.as_deref());
        rtc_candidate.sdp_m_line_index(candidate.sdp_m_line_index);
        if let Some(ufrag) = &candidate.username_fragment {
            Reflect::set(&rtc_candidate, &"usernameFragment".into(), &ufrag.into())
                .map_err(|err| anyhow!("failed to set usernameFragment: {:?}", err))?;
        }

        let rtc_candidate = RtcIceCandidate::new(&rtc_candidate)
            .map_err(|err| anyhow!("failed to create new RtcIceCandidate: {:?}", err))?;
        JsFuture::from(
            self.peer_connection
                .add_ice_candidate_with_opt_rtc_ice_candidate(Some(&rtc_candidate)),
        )
        .await
        .map_err(|err| anyhow!("failed to add ICE candidate: {:?}", err))?;
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        let description = self.peer_connection.local_description()?;
        Some(SessionDescription {
            sdp_type: sdp_type_from_js(description.type_())?,
            sdp: description.sdp(),
        })
    }

    fn supports_add_track(&self) -> bool {
        Reflect::has(&self.peer_connection, &"addTrack".into()).unwrap_or(false)
    }

    fn add_tracks(&self, stream: &BrowserStream) -> anyhow::Result<()> {
        for track in stream.tracks() {
            debug!("adding {} track {}", track.kind(), track.id());
            self.peer_connection
                .add_track_0(&track, stream.media_stream());
        }
        Ok(())
    }

    fn add_stream(&self, stream: &BrowserStream) -> anyhow::Result<()> {
        let add_stream = Reflect::get(&self.peer_connection, &"addStream".into())
            .ok()
            .and_then(|add_stream| add_stream.dyn_into::<Function>().ok())
            .ok_or_else(|| anyhow!("peer connection supports neither addTrack nor addStream"))?;
        add_stream
            .call1(&self.peer_connection, stream.media_stream())
            .map_err(|err| anyhow!("failed to add stream: {:?}", err))?;
        Ok(())
    }

    fn set_event_handler(&self, handler: Option<PeerEventHandler<BrowserStream>>) {
        clear_peer_connection_callbacks(&self.peer_connection, &self.subscriptions);
        if let Some(handler) = handler {
            set_peer_connection_callbacks(&self.peer_connection, &handler, &self.subscriptions);
        }
    }

    fn close(&self) {
        self.peer_connection.close();
    }
}

/// `getUserMedia` of the current window.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserCapture;

#[async_trait(?Send)]
impl CaptureDevice for BrowserCapture {
    type Stream = BrowserStream;

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<BrowserStream, CaptureError> {
        let media_devices = web_sys::window()
            .ok_or_else(|| CaptureError::Other("no window available".to_owned()))?
            .navigator()
            .media_devices()
            .map_err(capture_error)?;

        let mut media_constraints = MediaStreamConstraints::new();
        media_constraints.audio(&JsValue::from_bool(constraints.audio));
        media_constraints.video(&JsValue::from_bool(constraints.video));

        let promise = media_devices
            .get_user_media_with_constraints(&media_constraints)
            .map_err(capture_error)?;
        let stream = JsFuture::from(promise).await.map_err(capture_error)?;
        stream
            .dyn_into::<WebMediaStream>()
            .map(BrowserStream::new)
            .map_err(|_| CaptureError::Other("getUserMedia did not return a stream".to_owned()))
    }
}

fn capture_error(err: JsValue) -> CaptureError {
    let property = |name: &str| {
        Reflect::get(&err, &name.into())
            .ok()
            .and_then(|value| value.as_string())
            .unwrap_or_default()
    };
    CaptureError::from_dom_exception(&property("name"), &property("message"))
}

const fn sdp_type_to_js(sdp_type: SdpType) -> RtcSdpType {
    match sdp_type {
        SdpType::Offer => RtcSdpType::Offer,
        SdpType::Pranswer => RtcSdpType::Pranswer,
        SdpType::Answer => RtcSdpType::Answer,
        SdpType::Rollback => RtcSdpType::Rollback,
    }
}

fn sdp_type_from_js(sdp_type: RtcSdpType) -> Option<SdpType> {
    match sdp_type {
        RtcSdpType::Offer => Some(SdpType::Offer),
        RtcSdpType::Pranswer => Some(SdpType::Pranswer),
        RtcSdpType::Answer => Some(SdpType::Answer),
        RtcSdpType::Rollback => Some(SdpType::Rollback),
        _ => None,
    }
}

fn description_init(description: &SessionDescription) -> RtcSessionDescriptionInit {
    let mut init = RtcSessionDescriptionInit::new(sdp_type_to_js(description.sdp_type));
    init.sdp(&description.sdp);
    init
}

/// Read `{type, sdp}` off the object `createOffer`/`createAnswer` resolve with.
fn description_from_js(description: &JsValue) -> anyhow::Result<SessionDescription> {
    let field = |name: &str| {
        Reflect::get(description, &name.into())
            .ok()
            .and_then(|value| value.as_string())
            .ok_or_else(|| anyhow!("session description has no {}", name))
    };
    let sdp_type = serde_json::from_value(serde_json::Value::String(field("type")?))?;
    Ok(SessionDescription {
        sdp_type,
        sdp: field("sdp")?,
    })
}
