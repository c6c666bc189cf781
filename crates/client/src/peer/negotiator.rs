//! Session negotiator
//!
//! Drives one peer session at a time through the offer/answer/ICE exchange.
//! The local side always offers. Two guards make the exchange tolerant of
//! relay reordering and redelivery:
//!
//! - an answer arriving while the session is already `stable` is ignored
//! - a remote candidate arriving before the remote description is queued and
//!   applied, in arrival order, right after the answer lands

use super::session::{
    IceConnectionState, PeerConnectionState, PeerSession, PeerSessionFactory, SessionId,
    SignalingState,
};
use crate::channels::ControlChannel;
use crate::config::QuizLinkConfig;
use crate::media::{LocalVideo, MediaSource};
use crate::session::events::EventSender;
use crate::signaling::connection::SignalingSink;
use crate::signaling::protocol::{
    IceCandidateDescriptor, SdpKind, SessionDescription, SignalingEnvelope,
};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Negotiation phase of the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// No session
    Idle,
    /// Session created, channel and media being set up
    Configuring,
    /// Offer sent, waiting for the answer
    OfferSent,
    /// Answer applied
    Stable,
    /// Peer connection established
    Connected,
    /// Last session torn down
    Closed,
}

/// What happened to one remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Handed to the ICE agent
    Applied,
    /// Held until the remote description is set
    Queued,
    /// End-of-candidates marker, or no session to apply it to
    Ignored,
}

/// Per-session negotiation bookkeeping
#[derive(Debug)]
pub struct SessionState {
    local_description_set: bool,
    remote_description_set: bool,
    phase: NegotiationPhase,
    pending_candidates: VecDeque<RTCIceCandidateInit>,
    ice_state: IceConnectionState,
    peer_state: PeerConnectionState,
}

impl SessionState {
    fn new() -> Self {
        Self {
            local_description_set: false,
            remote_description_set: false,
            phase: NegotiationPhase::Configuring,
            pending_candidates: VecDeque::new(),
            ice_state: IceConnectionState::New,
            peer_state: PeerConnectionState::New,
        }
    }

    /// Whether the local offer has been applied
    pub fn local_description_set(&self) -> bool {
        self.local_description_set
    }

    /// Whether the remote answer has been applied
    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    /// Current phase
    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    /// Number of candidates waiting for the remote description
    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Last reported ICE connection state
    pub fn ice_state(&self) -> IceConnectionState {
        self.ice_state
    }

    /// Last reported peer connection state
    pub fn peer_state(&self) -> PeerConnectionState {
        self.peer_state
    }
}

struct ActiveSession {
    id: SessionId,
    peer: Arc<dyn PeerSession>,
    control: Arc<dyn ControlChannel>,
    video: Option<LocalVideo>,
    state: SessionState,
}

impl ActiveSession {
    /// Release media, channel and connection; the session is not reused
    async fn release(mut self) {
        if let Some(mut video) = self.video.take() {
            video.stop();
        }
        if let Err(e) = self.control.close().await {
            debug!(session = %self.id, "Control channel close failed: {}", e);
        }
        if let Err(e) = self.peer.close().await {
            warn!(session = %self.id, "Peer close failed: {}", e);
        }
    }
}

/// Offer/answer state machine owning the current peer session
pub struct SessionNegotiator {
    factory: Arc<dyn PeerSessionFactory>,
    media: Arc<dyn MediaSource>,
    ice_servers: Vec<RTCIceServer>,
    control_label: String,
    events: EventSender,
    current: Option<ActiveSession>,
    last_phase: NegotiationPhase,
    next_id: u64,
}

impl SessionNegotiator {
    /// Create an idle negotiator
    pub fn new(
        config: &QuizLinkConfig,
        factory: Arc<dyn PeerSessionFactory>,
        media: Arc<dyn MediaSource>,
        events: EventSender,
    ) -> Self {
        Self {
            factory,
            media,
            ice_servers: config.ice_servers(),
            control_label: config.control_channel_label.clone(),
            events,
            current: None,
            last_phase: NegotiationPhase::Idle,
            next_id: 0,
        }
    }

    /// Phase of the current session, or of the last one if none is active
    pub fn phase(&self) -> NegotiationPhase {
        self.current
            .as_ref()
            .map(|active| active.state.phase)
            .unwrap_or(self.last_phase)
    }

    /// Id of the current session
    pub fn session_id(&self) -> Option<SessionId> {
        self.current.as_ref().map(|active| active.id)
    }

    /// Whether `id` names the current session
    pub fn is_current(&self, id: SessionId) -> bool {
        self.session_id() == Some(id)
    }

    /// Bookkeeping of the current session
    pub fn state(&self) -> Option<&SessionState> {
        self.current.as_ref().map(|active| &active.state)
    }

    /// Locally created control channel of the current session
    pub fn control_channel(&self) -> Option<Arc<dyn ControlChannel>> {
        self.current
            .as_ref()
            .map(|active| Arc::clone(&active.control))
    }

    /// Start a new session and send its offer
    ///
    /// The control channel is created before media is acquired so it is
    /// part of the offer. Rejected while another session is still
    /// negotiating; an established session is torn down and superseded.
    ///
    /// # Errors
    ///
    /// `Error::MediaAcquisition` when capture fails, `Error::TransportNotOpen`
    /// when the offer cannot be sent, or the peer error that aborted setup.
    /// Every failure leaves the negotiator idle.
    pub async fn start(&mut self, signaling: &dyn SignalingSink) -> Result<SessionId> {
        if let Some(active) = &self.current {
            match active.state.phase {
                NegotiationPhase::Configuring | NegotiationPhase::OfferSent => {
                    warn!(
                        session = %active.id,
                        phase = ?active.state.phase,
                        "Negotiation already in progress, ignoring start"
                    );
                    return Err(Error::SessionError(format!(
                        "{} is still negotiating",
                        active.id
                    )));
                }
                _ => {
                    info!(session = %active.id, "Superseding established session");
                    self.teardown().await;
                }
            }
        }

        self.next_id += 1;
        let id = SessionId(self.next_id);
        info!(session = %id, "Starting session negotiation");

        let peer = self
            .factory
            .create_session(id, &self.ice_servers, self.events.clone())
            .await?;

        let control = match peer
            .create_control_channel(&self.control_label)
            .await
        {
            Ok(control) => control,
            Err(e) => {
                if let Err(close_err) = peer.close().await {
                    debug!(session = %id, "Peer close failed: {}", close_err);
                }
                return Err(e);
            }
        };

        self.current = Some(ActiveSession {
            id,
            peer: Arc::clone(&peer),
            control,
            video: None,
            state: SessionState::new(),
        });

        let video = match self.media.acquire_video().await {
            Ok(video) => video,
            Err(e) => {
                let e = match e {
                    Error::MediaAcquisition(_) => e,
                    other => Error::MediaAcquisition(other.to_string()),
                };
                warn!(session = %id, "Local media unavailable: {}", e);
                return Err(self.abort_setup(e).await);
            }
        };

        if let Err(e) = peer.add_local_video(&video).await {
            return Err(self.abort_setup(e).await);
        }
        if let Some(active) = self.current.as_mut() {
            active.video = Some(video);
        }

        let offer = match peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.abort_setup(e).await),
        };
        if let Some(active) = self.current.as_mut() {
            active.state.local_description_set = true;
        }

        if let Err(e) = signaling.send(&SignalingEnvelope::Offer(offer)) {
            warn!(session = %id, "Failed to send offer: {}", e);
            return Err(self.abort_setup(e).await);
        }
        if let Some(active) = self.current.as_mut() {
            active.state.phase = NegotiationPhase::OfferSent;
        }

        info!(session = %id, "Offer sent");
        Ok(id)
    }

    async fn abort_setup(&mut self, error: Error) -> Error {
        if let Some(active) = self.current.take() {
            debug!(session = %active.id, "Aborting session setup");
            active.release().await;
        }
        self.last_phase = NegotiationPhase::Idle;
        error
    }

    /// Apply the remote answer
    ///
    /// Returns `Ok(false)` when there is no session or the session is
    /// already stable; the description is left untouched in that case.
    /// Queued candidates are applied, in arrival order, once the answer lands.
    ///
    /// # Errors
    ///
    /// `Error::SdpError` for a description that is not an answer (the
    /// session is kept), or the error that made the answer fail to apply
    /// (the session is torn down).
    pub async fn handle_answer(&mut self, answer: SessionDescription) -> Result<bool> {
        let Some(active) = self.current.as_mut() else {
            warn!("Answer received with no active session, ignoring");
            return Ok(false);
        };

        if answer.kind != SdpKind::Answer {
            return Err(Error::SdpError(format!(
                "Expected an answer description, got {:?}",
                answer.kind
            )));
        }

        let id = active.id;
        let peer = Arc::clone(&active.peer);
        if peer.signaling_state() == SignalingState::Stable {
            warn!(session = %id, "Session already stable, ignoring answer");
            return Ok(false);
        }

        if let Err(e) = peer.set_remote_description(answer).await {
            error!(session = %id, "Failed to apply answer: {}", e);
            self.teardown().await;
            return Err(e);
        }

        let Some(active) = self.current.as_mut() else {
            return Ok(true);
        };
        active.state.remote_description_set = true;
        if active.state.phase != NegotiationPhase::Connected {
            active.state.phase = NegotiationPhase::Stable;
        }

        let pending: Vec<RTCIceCandidateInit> = active.state.pending_candidates.drain(..).collect();
        info!(session = %id, queued = pending.len(), "Answer applied");

        for candidate in pending {
            if let Err(e) = peer.add_ice_candidate(candidate).await {
                warn!(session = %id, "Queued candidate rejected: {}", e);
            }
        }

        Ok(true)
    }

    /// Apply, or queue, one remote candidate
    ///
    /// # Errors
    ///
    /// `Error::IceCandidateError` for a candidate without usable geometry or
    /// one the ICE agent rejects. The session is kept either way.
    pub async fn handle_remote_candidate(
        &mut self,
        descriptor: IceCandidateDescriptor,
    ) -> Result<CandidateOutcome> {
        if descriptor.is_end_of_candidates() {
            debug!("Remote end-of-candidates received");
            return Ok(CandidateOutcome::Ignored);
        }

        let Some(active) = self.current.as_mut() else {
            debug!("Candidate received with no active session, ignoring");
            return Ok(CandidateOutcome::Ignored);
        };

        let candidate = descriptor.to_candidate_init().map_err(|e| {
            warn!(session = %active.id, "Rejecting remote candidate: {}", e);
            e
        })?;

        if !active.state.remote_description_set {
            active.state.pending_candidates.push_back(candidate);
            debug!(
                session = %active.id,
                queued = active.state.pending_candidates.len(),
                "Queued remote candidate until the answer arrives"
            );
            return Ok(CandidateOutcome::Queued);
        }

        active.peer.add_ice_candidate(candidate).await?;
        debug!(session = %active.id, "Applied remote candidate");
        Ok(CandidateOutcome::Applied)
    }

    /// Forward a locally gathered candidate to the relay
    ///
    /// Returns `Ok(false)` for candidates from a superseded session.
    pub fn handle_local_candidate(
        &self,
        session: SessionId,
        candidate: IceCandidateDescriptor,
        signaling: &dyn SignalingSink,
    ) -> Result<bool> {
        if !self.is_current(session) {
            debug!(session = %session, "Dropping candidate from stale session");
            return Ok(false);
        }

        signaling.send(&SignalingEnvelope::IceCandidate(candidate))?;
        Ok(true)
    }

    /// Record an ICE connection state change
    pub fn handle_ice_state(&mut self, session: SessionId, state: IceConnectionState) {
        match self.current.as_mut() {
            Some(active) if active.id == session => {
                info!(session = %session, ice_state = ?state, "ICE connection state changed");
                active.state.ice_state = state;
            }
            _ => debug!(session = %session, "Ignoring ICE state of stale session"),
        }
    }

    /// Record a peer connection state change
    ///
    /// `Connected` moves the session to its connected phase; `Closed` tears
    /// it down.
    pub async fn handle_peer_state(&mut self, session: SessionId, state: PeerConnectionState) {
        let Some(active) = self.current.as_mut().filter(|active| active.id == session) else {
            debug!(session = %session, "Ignoring peer state of stale session");
            return;
        };

        info!(session = %session, peer_state = ?state, "Peer connection state changed");
        active.state.peer_state = state;

        match state {
            PeerConnectionState::Connected => {
                active.state.phase = NegotiationPhase::Connected;
            }
            PeerConnectionState::Failed => {
                error!(session = %session, "Peer connection failed");
            }
            PeerConnectionState::Closed => {
                self.teardown().await;
            }
            _ => {}
        }
    }

    /// Tear down the current session and release its resources
    ///
    /// Returns the id of the session that was closed, if any.
    pub async fn teardown(&mut self) -> Option<SessionId> {
        let active = self.current.take()?;
        let id = active.id;
        info!(
            session = %id,
            dropped_candidates = active.state.pending_candidates.len(),
            "Tearing down session"
        );
        active.release().await;
        self.last_phase = NegotiationPhase::Closed;
        Some(id)
    }
}
