//! Recording doubles for the collaborators of `CallManager`, driven by a `LocalPool`.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;

use anyhow::bail;
use async_trait::async_trait;
use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use serde_json::{json, Value};
use wasm_call::engine::{
    CallUi, CaptureDevice, CaptureError, MediaEngine, MediaStream, PeerConnection, PeerEvent,
    PeerEventHandler, SignalingChannel,
};
use wasm_call::{
    CallConfig, CallManager, CallState, ClientId, Error, IceCandidate, IceServer,
    MediaConstraints, MessageKind, SdpType, SessionDescription,
};
use wasm_call_protocol::{decode, encode_payload, Envelope};

pub const LOCAL_ID: &str = "viewer";
pub const REMOTE_ID: &str = "master";

#[derive(Debug, Clone)]
pub struct MockStream {
    id: String,
    stopped: Rc<Cell<usize>>,
}

impl MockStream {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            stopped: Rc::new(Cell::new(0)),
        }
    }

    pub fn stop_count(&self) -> usize {
        self.stopped.get()
    }
}

impl MediaStream for MockStream {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn stop_tracks(&self) {
        self.stopped.set(self.stopped.get() + 1);
    }
}

#[derive(Default)]
struct PeerState {
    ops: RefCell<Vec<String>>,
    handler: RefCell<Option<PeerEventHandler<MockStream>>>,
    local: RefCell<Option<SessionDescription>>,
    remote_gate: RefCell<Option<oneshot::Receiver<()>>>,
    have_remote_offer: Cell<bool>,
    fail_offer: Cell<bool>,
    fail_remote: Cell<bool>,
    legacy_only: Cell<bool>,
    closed: Cell<usize>,
}

/// Peer connection that records every call and behaves like a browser would for
/// negotiation-needed: it is only raised when adding media in the stable state.
#[derive(Clone, Default)]
pub struct MockPeer {
    state: Rc<PeerState>,
}

impl MockPeer {
    pub fn ops(&self) -> Vec<String> {
        self.state.ops.borrow().clone()
    }

    pub fn added_candidates(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| op.strip_prefix("add_candidate:").map(str::to_owned))
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.state.closed.get()
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.handler.borrow().is_some()
    }

    pub fn fail_offers(&self, fail: bool) {
        self.state.fail_offer.set(fail);
    }

    pub fn fail_remote_descriptions(&self, fail: bool) {
        self.state.fail_remote.set(fail);
    }

    /// Hold the next `set_remote_description` until the returned sender fires.
    pub fn gate_remote_description(&self) -> oneshot::Sender<()> {
        let (sender, receiver) = oneshot::channel();
        *self.state.remote_gate.borrow_mut() = Some(receiver);
        sender
    }

    /// Raise `event` the way the engine would.
    pub fn emit(&self, event: PeerEvent<MockStream>) {
        let handler = self.state.handler.borrow().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    fn record(&self, op: impl Into<String>) {
        self.state.ops.borrow_mut().push(op.into());
    }

    fn media_added(&self) {
        if !self.state.have_remote_offer.get() {
            self.emit(PeerEvent::NegotiationNeeded);
        }
    }
}

#[async_trait(?Send)]
impl PeerConnection for MockPeer {
    type Stream = MockStream;

    async fn create_offer(&self) -> anyhow::Result<SessionDescription> {
        self.record("create_offer");
        if self.state.fail_offer.get() {
            bail!("offer rejected by engine");
        }
        Ok(SessionDescription::offer("v=0 local offer"))
    }

    async fn create_answer(&self) -> anyhow::Result<SessionDescription> {
        self.record("create_answer");
        Ok(SessionDescription::answer("v=0 local answer"))
    }

    async fn set_local_description(
        &self,
        description: &SessionDescription,
    ) -> anyhow::Result<()> {
        self.record(format!("set_local:{:?}", description.sdp_type));
        if description.sdp_type == SdpType::Answer {
            self.state.have_remote_offer.set(false);
        }
        *self.state.local.borrow_mut() = Some(description.clone());
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: &SessionDescription,
    ) -> anyhow::Result<()> {
        self.record(format!("set_remote:{:?}", description.sdp_type));
        let gate = self.state.remote_gate.borrow_mut().take();
        if let Some(gate) = gate {
            gate.await.ok();
        }
        if self.state.fail_remote.get() {
            bail!("remote description rejected");
        }
        if description.sdp_type == SdpType::Offer {
            self.state.have_remote_offer.set(true);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> anyhow::Result<()> {
        self.record(format!("add_candidate:{}", candidate.candidate));
        Ok(())
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.state.local.borrow().clone()
    }

    fn supports_add_track(&self) -> bool {
        !self.state.legacy_only.get()
    }

    fn add_tracks(&self, stream: &MockStream) -> anyhow::Result<()> {
        self.record(format!("add_tracks:{}", stream.id()));
        self.media_added();
        Ok(())
    }

    fn add_stream(&self, stream: &MockStream) -> anyhow::Result<()> {
        self.record(format!("add_stream:{}", stream.id()));
        self.media_added();
        Ok(())
    }

    fn set_event_handler(&self, handler: Option<PeerEventHandler<MockStream>>) {
        *self.state.handler.borrow_mut() = handler;
    }

    fn close(&self) {
        self.record("close");
        self.state.closed.set(self.state.closed.get() + 1);
    }
}

#[derive(Default)]
struct EngineState {
    peers: RefCell<Vec<MockPeer>>,
    ice_servers: RefCell<Vec<Vec<IceServer>>>,
    next_gate: RefCell<Option<oneshot::Receiver<()>>>,
    legacy_only: Cell<bool>,
}

#[derive(Clone, Default)]
pub struct MockEngine {
    state: Rc<EngineState>,
}

impl MockEngine {
    pub fn peers(&self) -> Vec<MockPeer> {
        self.state.peers.borrow().clone()
    }

    pub fn last_peer(&self) -> MockPeer {
        self.state
            .peers
            .borrow()
            .last()
            .cloned()
            .expect("no peer connection was created")
    }

    pub fn ice_servers(&self) -> Vec<Vec<IceServer>> {
        self.state.ice_servers.borrow().clone()
    }

    /// Peers created from now on only support the legacy `addStream`.
    pub fn legacy_only(&self) {
        self.state.legacy_only.set(true);
    }

    /// Hold the first `set_remote_description` of the next peer connection.
    pub fn gate_next_remote_description(&self) -> oneshot::Sender<()> {
        let (sender, receiver) = oneshot::channel();
        *self.state.next_gate.borrow_mut() = Some(receiver);
        sender
    }
}

impl MediaEngine for MockEngine {
    type Stream = MockStream;
    type Peer = MockPeer;

    fn create_peer_connection(&self, ice_servers: &[IceServer]) -> anyhow::Result<MockPeer> {
        let peer = MockPeer::default();
        peer.state.legacy_only.set(self.state.legacy_only.get());
        *peer.state.remote_gate.borrow_mut() = self.state.next_gate.borrow_mut().take();
        self.state.ice_servers.borrow_mut().push(ice_servers.to_vec());
        self.state.peers.borrow_mut().push(peer.clone());
        Ok(peer)
    }
}

#[derive(Default)]
struct CaptureState {
    failure: RefCell<Option<CaptureError>>,
    streams: RefCell<Vec<MockStream>>,
    constraints: RefCell<Vec<MediaConstraints>>,
    gate: RefCell<Option<oneshot::Receiver<()>>>,
}

#[derive(Clone, Default)]
pub struct MockCapture {
    state: Rc<CaptureState>,
}

impl MockCapture {
    pub fn fail_with(&self, failure: CaptureError) {
        *self.state.failure.borrow_mut() = Some(failure);
    }

    pub fn streams(&self) -> Vec<MockStream> {
        self.state.streams.borrow().clone()
    }

    pub fn constraints(&self) -> Vec<MediaConstraints> {
        self.state.constraints.borrow().clone()
    }

    /// Hold the next `get_user_media` until the returned sender fires.
    pub fn gate_next_capture(&self) -> oneshot::Sender<()> {
        let (sender, receiver) = oneshot::channel();
        *self.state.gate.borrow_mut() = Some(receiver);
        sender
    }
}

#[async_trait(?Send)]
impl CaptureDevice for MockCapture {
    type Stream = MockStream;

    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MockStream, CaptureError> {
        self.state.constraints.borrow_mut().push(*constraints);
        let gate = self.state.gate.borrow_mut().take();
        if let Some(gate) = gate {
            gate.await.ok();
        }
        if let Some(failure) = self.state.failure.borrow().clone() {
            return Err(failure);
        }
        let stream = MockStream::new(&format!("local-{}", self.state.streams.borrow().len()));
        self.state.streams.borrow_mut().push(stream.clone());
        Ok(stream)
    }
}

#[derive(Default)]
pub struct RecordingChannel {
    frames: RefCell<Vec<String>>,
}

impl RecordingChannel {
    pub fn frames(&self) -> Vec<String> {
        self.frames.borrow().clone()
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.frames
            .borrow()
            .iter()
            .map(|frame| decode(frame).expect("sent frame must decode"))
            .collect()
    }

    pub fn sent_kinds(&self) -> Vec<MessageKind> {
        self.sent().into_iter().map(|envelope| envelope.kind).collect()
    }
}

impl SignalingChannel for RecordingChannel {
    fn send(&self, frame: &str) -> anyhow::Result<()> {
        self.frames.borrow_mut().push(frame.to_owned());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingUi {
    pub states: RefCell<Vec<CallState>>,
    pub notices: RefCell<Vec<String>>,
    pub errors: RefCell<Vec<String>>,
    pub resets: Cell<usize>,
    pub local_streams: RefCell<Vec<String>>,
    pub remote_streams: RefCell<Vec<String>>,
    pub statuses: RefCell<Vec<Value>>,
    pub data_messages: RefCell<Vec<(String, String)>>,
}

impl CallUi<MockStream> for RecordingUi {
    fn on_state_change(&self, state: CallState) {
        self.states.borrow_mut().push(state);
    }

    fn on_local_stream(&self, stream: &MockStream) {
        self.local_streams.borrow_mut().push(stream.id());
    }

    fn on_remote_stream(&self, stream: &MockStream) {
        self.remote_streams.borrow_mut().push(stream.id());
    }

    fn on_call_reset(&self) {
        self.resets.set(self.resets.get() + 1);
    }

    fn notify(&self, notice: &str) {
        self.notices.borrow_mut().push(notice.to_owned());
    }

    fn report_error(&self, error: &Error) {
        self.errors.borrow_mut().push(error.to_string());
    }

    fn on_status_response(&self, status: &Value) {
        self.statuses.borrow_mut().push(status.clone());
    }

    fn on_data_message(&self, label: &str, data: &str) {
        self.data_messages
            .borrow_mut()
            .push((label.to_owned(), data.to_owned()));
    }
}

pub type TestManager = CallManager<MockEngine, MockCapture>;

pub struct Harness {
    pub pool: LocalPool,
    pub manager: TestManager,
    pub engine: MockEngine,
    pub capture: MockCapture,
    pub channel: Rc<RecordingChannel>,
    pub ui: Rc<RecordingUi>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CallConfig::new(
            ClientId::from(LOCAL_ID),
            "ws://127.0.0.1:9001/signal",
        ))
    }

    pub fn with_config(config: CallConfig) -> Self {
        let pool = LocalPool::new();
        let engine = MockEngine::default();
        let capture = MockCapture::default();
        let channel = Rc::new(RecordingChannel::default());
        let ui = Rc::new(RecordingUi::default());
        let manager = CallManager::new(
            config,
            engine.clone(),
            capture.clone(),
            Rc::clone(&channel) as Rc<dyn SignalingChannel>,
            Rc::clone(&ui) as Rc<dyn CallUi<MockStream>>,
            Rc::new(pool.spawner()),
        );
        Self {
            pool,
            manager,
            engine,
            capture,
            channel,
            ui,
        }
    }

    /// Drive `future` together with everything the engine scheduled, then drain.
    pub fn run<F: Future>(&mut self, future: F) -> F::Output {
        let output = self.pool.run_until(future);
        self.pool.run_until_stalled();
        output
    }

    /// Run `future` in the background, as far as it gets without outside help.
    pub fn spawn(&mut self, future: impl Future<Output = ()> + 'static) {
        self.pool
            .spawner()
            .spawn_local(future)
            .expect("pool accepts tasks");
        self.pool.run_until_stalled();
    }

    /// Like [`Harness::deliver`] for frames whose handling waits on a gated engine step.
    pub fn deliver_in_background(&mut self, frame: &str) {
        let manager = self.manager.clone();
        let frame = frame.to_owned();
        self.spawn(async move {
            manager.dispatch(frame).await;
        });
    }

    /// Let scheduled engine notifications run.
    pub fn settle(&mut self) {
        self.pool.run_until_stalled();
    }

    pub fn deliver(&mut self, frame: &str) -> wasm_call::Dispatched {
        let manager = self.manager.clone();
        let frame = frame.to_owned();
        self.run(async move { manager.dispatch(frame).await })
    }

    pub fn invite(&mut self, target: &str) -> wasm_call::Result<()> {
        let manager = self.manager.clone();
        let target = ClientId::from(target);
        self.run(async move { manager.invite(target).await })
    }

    pub fn hang_up(&mut self) -> bool {
        let closed = self.manager.hang_up();
        self.settle();
        closed
    }

    pub fn peer(&self) -> MockPeer {
        self.engine.last_peer()
    }

    pub fn state(&self) -> CallState {
        self.manager.state()
    }

    /// Caller side up to `Connected`.
    pub fn connect_as_caller(&mut self) -> MockPeer {
        self.invite(REMOTE_ID).expect("invite");
        assert_eq!(self.state(), CallState::OfferSent);
        self.deliver(&answer_frame(REMOTE_ID));
        assert_eq!(self.state(), CallState::Connected);
        self.peer()
    }

    /// Callee side up to `Connected`.
    pub fn connect_as_callee(&mut self) -> MockPeer {
        self.deliver(&offer_frame(REMOTE_ID));
        assert_eq!(self.state(), CallState::Connected);
        self.peer()
    }
}

/// Frame as relayed by the signaling server: addressed to us, stamped with `sender`.
pub fn inbound_frame(kind: &MessageKind, payload: &impl serde::Serialize, sender: &str) -> String {
    let frame = encode_payload(kind, payload, &ClientId::from(LOCAL_ID)).expect("encode");
    let mut frame: Value = serde_json::from_str(&frame).expect("outbound frame is JSON");
    frame["senderClientId"] = json!(sender);
    frame.to_string()
}

pub fn offer_frame(sender: &str) -> String {
    inbound_frame(
        &MessageKind::SdpOffer,
        &SessionDescription::offer("v=0 remote offer"),
        sender,
    )
}

pub fn answer_frame(sender: &str) -> String {
    inbound_frame(
        &MessageKind::SdpAnswer,
        &SessionDescription::answer("v=0 remote answer"),
        sender,
    )
}

pub fn candidate(line: &str) -> IceCandidate {
    IceCandidate {
        candidate: line.to_owned(),
        sdp_mid: Some("0".to_owned()),
        sdp_m_line_index: Some(0),
        username_fragment: None,
    }
}

pub fn candidate_frame(line: &str) -> String {
    inbound_frame(&MessageKind::IceCandidate, &candidate(line), REMOTE_ID)
}
