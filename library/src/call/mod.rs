/*!
Negotiation state machine for a single one-to-one call.

```text
 caller:  Idle -> Inviting -> OfferSent -> Negotiating -> Connected -> Closing -> Idle
 callee:  Idle -> OfferReceived -> AnswerSent -> Connected -> Closing -> Idle
```

A call is started either with [`CallManager::invite`], which acquires local media and
lets the engine's negotiation-needed notification produce the offer, or by an inbound
`SDP_OFFER` routed through [`handle_signaling_frame`]. Local hang-up, remote hang-up and
connectivity failure all end in the same idempotent teardown.
*/

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::task::LocalSpawn;
use log::{debug, error, info, warn};
use serde::Serialize;
use uuid::Uuid;
use wasm_call_protocol::{encode_payload, ClientId, IceCandidate, MessageKind, SessionDescription};

use crate::config::CallConfig;
use crate::constants::{ALREADY_IN_CALL_NOTICE, CAPTURE_FAILED_NOTICE, DEVICE_NOT_FOUND_NOTICE};
use crate::engine::{
    CallUi, CaptureDevice, CaptureError, IceConnectionState, MediaEngine, MediaStream,
    PeerConnection, PeerEvent, SignalingChannel,
};
use crate::{Error, Result};

pub use dispatcher::{handle_signaling_frame, Dispatched};
use session::Session;

mod dispatcher;
mod observer;
mod session;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CallState {
    Idle,
    /// Local media is being acquired; the offer follows once the engine asks for negotiation
    Inviting,
    OfferSent,
    /// Remote answer is being applied
    Negotiating,
    OfferReceived,
    AnswerSent,
    Connected,
    Closing,
}

impl CallState {
    #[must_use]
    pub const fn is_in_call(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Origin of a teardown, for diagnostics only: every origin runs the same teardown.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TeardownReason {
    LocalHangUp,
    RemoteHangUp,
    RemoteStreamRemoved,
    CaptureFailed,
    IceConnection(IceConnectionState),
    SignalingClosed,
}

struct CallManagerInner<E: MediaEngine> {
    state: CallState,
    session: Option<Session<E::Peer>>,
    next_generation: u64,
}

impl<E: MediaEngine> CallManagerInner<E> {
    fn session(&self, generation: u64) -> Option<&Session<E::Peer>> {
        self.session
            .as_ref()
            .filter(|session| session.generation == generation)
    }

    fn session_mut(&mut self, generation: u64) -> Option<&mut Session<E::Peer>> {
        self.session
            .as_mut()
            .filter(|session| session.generation == generation)
    }
}

struct Collaborators<E: MediaEngine, C> {
    config: CallConfig,
    engine: E,
    capture: C,
    channel: Rc<dyn SignalingChannel>,
    ui: Rc<dyn CallUi<E::Stream>>,
    spawner: Rc<dyn LocalSpawn>,
}

/// Owner of the single call session.
///
/// This is a pointer to the underlying state and can be cloned freely; all clones drive
/// the same call. Must be used from a single thread.
pub struct CallManager<E, C>
where
    E: MediaEngine,
    C: CaptureDevice<Stream = E::Stream>,
{
    inner: Rc<RefCell<CallManagerInner<E>>>,
    collaborators: Rc<Collaborators<E, C>>,
}

impl<E, C> Clone for CallManager<E, C>
where
    E: MediaEngine,
    C: CaptureDevice<Stream = E::Stream>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            collaborators: Rc::clone(&self.collaborators),
        }
    }
}

pub(crate) struct WeakCallManager<E, C>
where
    E: MediaEngine,
    C: CaptureDevice<Stream = E::Stream>,
{
    inner: Weak<RefCell<CallManagerInner<E>>>,
    collaborators: Weak<Collaborators<E, C>>,
}

impl<E, C> WeakCallManager<E, C>
where
    E: MediaEngine,
    C: CaptureDevice<Stream = E::Stream>,
{
    pub(crate) fn upgrade(&self) -> Option<CallManager<E, C>> {
        Some(CallManager {
            inner: self.inner.upgrade()?,
            collaborators: self.collaborators.upgrade()?,
        })
    }
}

impl<E, C> CallManager<E, C>
where
    E: MediaEngine,
    C: CaptureDevice<Stream = E::Stream>,
{
    /// `spawner` runs the handling of engine notifications; it must drive futures on the
    /// same thread as every other call into the manager.
    pub fn new(
        config: CallConfig,
        engine: E,
        capture: C,
        channel: Rc<dyn SignalingChannel>,
        ui: Rc<dyn CallUi<E::Stream>>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CallManagerInner {
                state: CallState::Idle,
                session: None,
                next_generation: 0,
            })),
            collaborators: Rc::new(Collaborators {
                config,
                engine,
                capture,
                channel,
                ui,
                spawner,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> CallState {
        self.inner.borrow().state
    }

    #[must_use]
    pub fn is_in_call(&self) -> bool {
        self.state().is_in_call()
    }

    /// Peer the current call is with.
    #[must_use]
    pub fn target(&self) -> Option<ClientId> {
        self.inner
            .borrow()
            .session
            .as_ref()
            .map(|session| session.target.clone())
    }

    #[must_use]
    pub fn call_id(&self) -> Option<Uuid> {
        self.inner
            .borrow()
            .session
            .as_ref()
            .map(|session| session.call_id)
    }

    #[must_use]
    pub fn local_stream(&self) -> Option<E::Stream> {
        self.inner
            .borrow()
            .session
            .as_ref()
            .and_then(|session| session.local_stream.clone())
    }

    #[must_use]
    pub fn remote_stream(&self) -> Option<E::Stream> {
        self.inner
            .borrow()
            .session
            .as_ref()
            .and_then(|session| session.remote_stream.clone())
    }

    #[must_use]
    pub fn config(&self) -> &CallConfig {
        &self.collaborators.config
    }

    /// Shorthand for [`handle_signaling_frame`].
    pub async fn dispatch(&self, frame: impl AsRef<[u8]>) -> Dispatched {
        handle_signaling_frame(self, frame).await
    }

    /// Start a call with `target`.
    ///
    /// Only acquires and attaches local media: attaching the first track makes the engine
    /// ask for negotiation, which is what creates and sends the offer.
    ///
    /// # Errors
    /// - [`Error::AlreadyInCall`] if a call exists, nothing is changed then,
    /// - [`Error::Capture`] if local media could not be acquired, the call is torn down,
    /// - [`Error::Negotiation`] if the engine refused to create a connection or the media.
    pub async fn invite(&self, target: ClientId) -> Result<()> {
        info!("starting to prepare an invitation for {}", target);
        if self.inner.borrow().session.is_some() {
            warn!("refusing to invite {} while a call is open", target);
            self.collaborators.ui.notify(ALREADY_IN_CALL_NOTICE);
            return Err(Error::AlreadyInCall);
        }

        let generation = self.open_session(target, CallState::Inviting)?;

        debug!("requesting webcam access...");
        let stream = self
            .collaborators
            .capture
            .get_user_media(&self.collaborators.config.media_constraints)
            .await;
        let attached = match stream {
            Ok(stream) => self.attach_local_stream(generation, stream),
            Err(err) => Err(err.into()),
        };
        attached.map_err(|err| self.abort_call(generation, err))
    }

    /// Handle an `SDP_OFFER` from `sender`.
    ///
    /// Accepted when no call exists, or as a renegotiation of the connected call with the
    /// same peer. An offer that arrives while our own offer is outstanding is rejected.
    ///
    /// # Errors
    /// [`Error::OfferRejected`] when the offer conflicts with the current call, otherwise
    /// whatever step of answering failed.
    pub async fn on_remote_offer(&self, sender: ClientId, offer: SessionDescription) -> Result<()> {
        let active = {
            let inner = self.inner.borrow();
            inner.session.as_ref().map(|session| {
                let renegotiation = session.target == sender && !session.making_offer;
                (inner.state, renegotiation)
            })
        };
        match active {
            None => self.accept_call(sender, offer).await,
            Some((CallState::Connected, true)) => self.renegotiate(sender, offer).await,
            Some((state, _)) => {
                warn!("rejecting offer from {} while {:?}", sender, state);
                Err(Error::OfferRejected {
                    sender: sender.into_inner(),
                    state,
                })
            }
        }
    }

    /// Handle an `SDP_ANSWER` to the offer we sent.
    ///
    /// # Errors
    /// [`Error::UnexpectedAnswer`] unless an offer is outstanding. If the engine refuses
    /// the answer the failure is reported and the call keeps waiting for an answer, or
    /// stays connected when the offer was a renegotiation.
    pub async fn on_remote_answer(&self, answer: SessionDescription) -> Result<()> {
        let (generation, peer, renegotiating) = {
            let inner = self.inner.borrow();
            match inner.session.as_ref() {
                Some(session) if inner.state == CallState::OfferSent => (
                    session.generation,
                    Rc::clone(&session.peer),
                    session.renegotiating,
                ),
                _ => {
                    warn!("ignoring answer while {:?}", inner.state);
                    return Err(Error::UnexpectedAnswer { state: inner.state });
                }
            }
        };

        info!("call recipient has accepted our call");
        self.set_state(CallState::Negotiating);
        let applied = peer.set_remote_description(&answer).await;
        if let Err(err) = self.settle(generation, applied, "set remote description") {
            if !matches!(err, Error::SessionClosed) {
                self.report(&err);
                if renegotiating {
                    // The media path negotiated earlier is still up.
                    if let Some(session) = self.inner.borrow_mut().session_mut(generation) {
                        session.renegotiating = false;
                    }
                    self.set_state(CallState::Connected);
                } else {
                    self.set_state(CallState::OfferSent);
                }
            }
            return Err(err);
        }

        if let Some(session) = self.inner.borrow_mut().session_mut(generation) {
            session.renegotiating = false;
        }
        self.flush_pending_candidates(generation).await?;
        self.set_state(CallState::Connected);
        Ok(())
    }

    /// Handle an `ICE_CANDIDATE` from the other peer. Candidates that arrive before the
    /// remote description are kept, in order, until it is applied.
    ///
    /// # Errors
    /// [`Error::NoActiveCall`] if there is no call to add it to, or the engine's refusal.
    pub async fn on_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let (generation, peer) = {
            let mut inner = self.inner.borrow_mut();
            let Some(session) = inner.session.as_mut() else {
                warn!("no call in progress, dropping remote ICE candidate");
                return Err(Error::NoActiveCall);
            };
            if !session.remote_description_set {
                debug!("remote description not set yet, buffering ICE candidate");
                session.pending_remote_candidates.push_back(candidate);
                return Ok(());
            }
            (session.generation, Rc::clone(&session.peer))
        };
        self.apply_remote_candidate(generation, &peer, &candidate)
            .await
    }

    /// Hang up the current call. Returns whether there was one to close.
    pub fn hang_up(&self) -> bool {
        self.close_call(TeardownReason::LocalHangUp)
    }

    /// The other peer hung up, as learned by the embedding application.
    pub fn handle_remote_hang_up(&self) -> bool {
        info!("*** received hang up notification from other peer");
        self.close_call(TeardownReason::RemoteHangUp)
    }

    pub(crate) fn downgrade(&self) -> WeakCallManager<E, C> {
        WeakCallManager {
            inner: Rc::downgrade(&self.inner),
            collaborators: Rc::downgrade(&self.collaborators),
        }
    }

    pub(crate) fn spawner(&self) -> Rc<dyn LocalSpawn> {
        Rc::clone(&self.collaborators.spawner)
    }

    pub(crate) fn ui(&self) -> &dyn CallUi<E::Stream> {
        self.collaborators.ui.as_ref()
    }

    pub(crate) async fn handle_peer_event(&self, generation: u64, event: PeerEvent<E::Stream>) {
        if self.inner.borrow().session(generation).is_none() {
            debug!(
                "ignoring {} raised for a closed call",
                observer::describe(&event)
            );
            return;
        }

        let outcome = match event {
            PeerEvent::NegotiationNeeded => self.on_negotiation_needed(generation).await,
            PeerEvent::IceCandidate(candidate) => self.on_local_candidate(generation, candidate),
            PeerEvent::IceConnectionStateChange(state) => {
                if let Some(reason) = observer::ice_connection_changed(state) {
                    self.close_call(reason);
                }
                Ok(())
            }
            PeerEvent::SignalingStateChange(state) => {
                if let Some(reason) = observer::signaling_changed(state) {
                    self.close_call(reason);
                }
                Ok(())
            }
            PeerEvent::IceGatheringStateChange(state) => {
                observer::ice_gathering_changed(state);
                Ok(())
            }
            PeerEvent::RemoteStream(stream) => self.on_remote_stream(generation, stream),
            PeerEvent::RemoteStreamRemoved => {
                info!("*** remote stream removed");
                self.close_call(TeardownReason::RemoteStreamRemoved);
                Ok(())
            }
            PeerEvent::DataChannelMessage { label, data } => {
                debug!("data message on {:?}: {}", label, data);
                self.collaborators.ui.on_data_message(&label, &data);
                Ok(())
            }
            channel_event => {
                observer::data_channel_changed(&channel_event);
                Ok(())
            }
        };

        if let Err(err) = outcome {
            debug!("peer event not applied: {}", err);
        }
    }

    /// Runs on the engine's negotiation-needed notification: for the first offer of an
    /// invitation, and for renegotiation of a connected call.
    async fn on_negotiation_needed(&self, generation: u64) -> Result<()> {
        let (peer, target) = {
            let mut inner = self.inner.borrow_mut();
            let state = inner.state;
            let Some(session) = inner.session_mut(generation) else {
                return Err(Error::SessionClosed);
            };
            if !matches!(state, CallState::Inviting | CallState::Connected) || session.making_offer
            {
                debug!("ignoring negotiation-needed while {:?}", state);
                return Ok(());
            }
            session.making_offer = true;
            session.renegotiating = state == CallState::Connected;
            (Rc::clone(&session.peer), session.target.clone())
        };

        info!("*** negotiation needed, offering to {}", target);
        let sent = self.send_offer(generation, &peer, &target).await;
        if let Some(session) = self.inner.borrow_mut().session_mut(generation) {
            session.making_offer = false;
        }

        match sent {
            Ok(()) => {
                self.set_state(CallState::OfferSent);
                Ok(())
            }
            Err(Error::SessionClosed) => Err(Error::SessionClosed),
            Err(err) => {
                error!("offer to {} failed: {}", target, err);
                self.report(&err);
                Err(err)
            }
        }
    }

    fn on_local_candidate(&self, generation: u64, candidate: Option<IceCandidate>) -> Result<()> {
        let Some(candidate) = candidate else {
            info!("ICE gathering finished, no more local candidates");
            return Ok(());
        };
        let target = self
            .inner
            .borrow()
            .session(generation)
            .map(|session| session.target.clone())
            .ok_or(Error::SessionClosed)?;

        self.send(&MessageKind::IceCandidate, &candidate, &target)
            .map_err(|err| {
                self.report(&err);
                err
            })
    }

    fn on_remote_stream(&self, generation: u64, stream: E::Stream) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            let session = inner.session_mut(generation).ok_or(Error::SessionClosed)?;
            session.remote_stream = Some(stream.clone());
        }
        info!("*** remote stream {} arrived", stream.id());
        self.collaborators.ui.on_remote_stream(&stream);
        Ok(())
    }

    fn open_session(&self, target: ClientId, state: CallState) -> Result<u64> {
        debug!("setting up a connection...");
        let peer = self
            .collaborators
            .engine
            .create_peer_connection(&self.collaborators.config.effective_ice_servers())
            .map_err(Error::negotiation("create peer connection"))
            .map_err(|err| {
                error!("{}", err);
                self.report(&err);
                err
            })?;

        let generation = {
            let mut inner = self.inner.borrow_mut();
            inner.next_generation = inner.next_generation.wrapping_add(1);
            inner.next_generation
        };
        let session = Session::new(generation, target, peer);
        observer::subscribe(self, &session.peer, generation);
        debug!(
            "created call {} (addTrack supported: {})",
            session.call_id, session.has_add_track
        );
        self.inner.borrow_mut().session = Some(session);
        self.set_state(state);
        Ok(generation)
    }

    async fn accept_call(&self, sender: ClientId, offer: SessionDescription) -> Result<()> {
        info!("starting to accept invitation from {}", sender);
        let generation = self.open_session(sender.clone(), CallState::OfferReceived)?;
        self.answer_call(generation, &sender, &offer)
            .await
            .map_err(|err| self.abort_call(generation, err))
    }

    async fn answer_call(
        &self,
        generation: u64,
        sender: &ClientId,
        offer: &SessionDescription,
    ) -> Result<()> {
        let peer = self.peer(generation)?;
        let applied = peer.set_remote_description(offer).await;
        self.settle(generation, applied, "set remote description")?;
        self.flush_pending_candidates(generation).await?;

        debug!("setting up the local media stream...");
        let stream = self
            .collaborators
            .capture
            .get_user_media(&self.collaborators.config.media_constraints)
            .await?;
        self.attach_local_stream(generation, stream)?;

        self.send_answer(generation, &peer, sender).await?;
        self.set_state(CallState::Connected);
        Ok(())
    }

    async fn renegotiate(&self, sender: ClientId, offer: SessionDescription) -> Result<()> {
        let Some((generation, peer)) = self
            .inner
            .borrow()
            .session
            .as_ref()
            .map(|session| (session.generation, Rc::clone(&session.peer)))
        else {
            return Err(Error::SessionClosed);
        };

        info!("renegotiation offer from {}", sender);
        self.set_state(CallState::OfferReceived);
        let applied = peer.set_remote_description(&offer).await;
        let answered = match self.settle(generation, applied, "set remote description") {
            Ok(()) => self.send_answer(generation, &peer, &sender).await,
            Err(err) => Err(err),
        };

        match answered {
            Err(Error::SessionClosed) => Err(Error::SessionClosed),
            outcome => {
                if let Err(err) = &outcome {
                    self.report(err);
                }
                self.set_state(CallState::Connected);
                outcome
            }
        }
    }

    async fn send_offer(&self, generation: u64, peer: &E::Peer, target: &ClientId) -> Result<()> {
        debug!("---> creating offer");
        let offer = peer.create_offer().await;
        let offer = self.settle(generation, offer, "create offer")?;

        debug!("---> setting local description");
        let applied = peer.set_local_description(&offer).await;
        self.settle(generation, applied, "set local description")?;

        debug!("---> sending offer to remote peer");
        let offer = peer.local_description().unwrap_or(offer);
        self.send(&MessageKind::SdpOffer, &offer, target)
    }

    async fn send_answer(&self, generation: u64, peer: &E::Peer, sender: &ClientId) -> Result<()> {
        debug!("------> creating answer");
        let answer = peer.create_answer().await;
        let answer = self.settle(generation, answer, "create answer")?;

        debug!("------> setting local description after creating answer");
        let applied = peer.set_local_description(&answer).await;
        self.settle(generation, applied, "set local description")?;

        self.set_state(CallState::AnswerSent);
        debug!("sending answer back to {}", sender);
        let answer = peer.local_description().unwrap_or(answer);
        self.send(&MessageKind::SdpAnswer, &answer, sender)
    }

    fn attach_local_stream(&self, generation: u64, stream: E::Stream) -> Result<()> {
        let attach_to = {
            let mut inner = self.inner.borrow_mut();
            inner.session_mut(generation).map(|session| {
                session.local_stream = Some(stream.clone());
                (Rc::clone(&session.peer), session.has_add_track)
            })
        };
        let Some((peer, has_add_track)) = attach_to else {
            debug!("call closed while acquiring media, stopping local stream");
            stream.stop_tracks();
            return Err(Error::SessionClosed);
        };

        info!("-- local video stream {} obtained", stream.id());
        self.collaborators.ui.on_local_stream(&stream);

        let attached = if has_add_track {
            debug!("-- adding tracks to the peer connection");
            peer.add_tracks(&stream)
        } else {
            debug!("-- adding stream to the peer connection");
            peer.add_stream(&stream)
        };
        attached.map_err(Error::negotiation("attach local media"))
    }

    /// Apply candidates buffered before the remote description, oldest first. Candidates
    /// arriving meanwhile are queued behind them until the buffer is empty.
    async fn flush_pending_candidates(&self, generation: u64) -> Result<()> {
        loop {
            let (peer, candidate) = {
                let mut inner = self.inner.borrow_mut();
                let session = inner.session_mut(generation).ok_or(Error::SessionClosed)?;
                let Some(candidate) = session.pending_remote_candidates.pop_front() else {
                    session.remote_description_set = true;
                    return Ok(());
                };
                (Rc::clone(&session.peer), candidate)
            };
            match self.apply_remote_candidate(generation, &peer, &candidate).await {
                Err(Error::SessionClosed) => return Err(Error::SessionClosed),
                Ok(()) | Err(_) => {}
            }
        }
    }

    async fn apply_remote_candidate(
        &self,
        generation: u64,
        peer: &E::Peer,
        candidate: &IceCandidate,
    ) -> Result<()> {
        debug!("adding received ICE candidate: {}", candidate.candidate);
        let added = peer.add_ice_candidate(candidate).await;
        self.settle(generation, added, "add remote ICE candidate")
            .map_err(|err| {
                if !matches!(err, Error::SessionClosed) {
                    self.report(&err);
                }
                err
            })
    }

    /// Capture-error handler: tell the user what went wrong, unless they declined, and
    /// tear the call down so another one can be made.
    fn abort_call(&self, generation: u64, error: Error) -> Error {
        if self.inner.borrow().session(generation).is_none() {
            debug!("call already closed: {}", error);
            return error;
        }
        match &error {
            Error::Capture(CaptureError::PermissionDenied) => {
                info!("user declined to share camera and/or microphone");
            }
            Error::Capture(CaptureError::NotFound) => {
                warn!("{}", error);
                self.collaborators.ui.notify(DEVICE_NOT_FOUND_NOTICE);
            }
            Error::Capture(CaptureError::Other(message)) => {
                error!("{}", error);
                self.collaborators
                    .ui
                    .notify(&format!("{}: {}", CAPTURE_FAILED_NOTICE, message));
            }
            other => {
                error!("{}", other);
                self.collaborators
                    .ui
                    .notify(&format!("{}: {}", CAPTURE_FAILED_NOTICE, other));
            }
        }
        self.close_call(TeardownReason::CaptureFailed);
        error
    }

    /// The single teardown path. Idempotent: only the first call for a session releases
    /// anything, later ones find no session and return `false`.
    fn close_call(&self, reason: TeardownReason) -> bool {
        let session = self.inner.borrow_mut().session.take();
        let Some(session) = session else {
            debug!("nothing to close ({:?})", reason);
            return false;
        };

        info!(
            "closing call {} with {} ({:?})",
            session.call_id, session.target, reason
        );
        self.set_state(CallState::Closing);
        session.release();
        self.set_state(CallState::Idle);
        self.collaborators.ui.on_call_reset();
        true
    }

    fn set_state(&self, state: CallState) {
        let previous = std::mem::replace(&mut self.inner.borrow_mut().state, state);
        if previous != state {
            debug!("call state {:?} -> {:?}", previous, state);
            self.collaborators.ui.on_state_change(state);
        }
    }

    fn peer(&self, generation: u64) -> Result<Rc<E::Peer>> {
        self.inner
            .borrow()
            .session(generation)
            .map(|session| Rc::clone(&session.peer))
            .ok_or(Error::SessionClosed)
    }

    /// Outcome of an engine step, checked against teardowns that happened while it ran.
    fn settle<T>(&self, generation: u64, result: anyhow::Result<T>, step: &'static str) -> Result<T> {
        if self.inner.borrow().session(generation).is_none() {
            return Err(Error::SessionClosed);
        }
        result.map_err(Error::negotiation(step))
    }

    fn send<T: Serialize>(&self, kind: &MessageKind, payload: &T, recipient: &ClientId) -> Result<()> {
        info!("sending {} to {}", kind, recipient);
        let frame = encode_payload(kind, payload, recipient).map_err(Error::Encode)?;
        self.collaborators
            .channel
            .send(&frame)
            .map_err(Error::Signaling)
    }

    fn report(&self, error: &Error) {
        error!("{}", error);
        self.collaborators.ui.report_error(error);
    }
}
