//! Quiz client dispatch loop
//!
//! [`QuizClient`] owns the relay connection, the negotiator and the control
//! protocol, and mutates them only from [`QuizClient::handle_event`], one
//! event at a time. [`ClientHandle`] is the cloneable command surface.

use super::events::{
    ClientCommand, ConsumerEvent, ConsumerSender, EventReceiver, EventSender, QuizStage,
    SessionEvent,
};
use crate::channels::{ControlMessage, ControlProtocol};
use crate::config::{QuizLinkConfig, SignalingClosePolicy};
use crate::media::MediaSource;
use crate::peer::{
    NegotiationPhase, PeerSessionFactory, RtcSessionFactory, SessionId, SessionNegotiator,
};
use crate::signaling::{
    ConnectionManager, LoginRequest, SignalingConnector, SignalingEnvelope, SignalingSink,
    WebSocketConnector,
};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Cloneable command surface of a running [`QuizClient`]
#[derive(Clone)]
pub struct ClientHandle {
    tx: EventSender,
}

impl ClientHandle {
    fn command(&self, command: ClientCommand) -> Result<()> {
        self.tx
            .send(SessionEvent::Command(command))
            .map_err(|_| Error::SessionError("Client loop has stopped".to_string()))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ClientCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.command(build(reply))?;
        rx.await
            .map_err(|_| Error::SessionError("Client loop dropped the request".to_string()))
    }

    /// Open the relay connection; `Ok(false)` when already open or pending
    pub async fn connect(&self) -> Result<bool> {
        self.request(|reply| ClientCommand::Connect { reply }).await?
    }

    /// Send login credentials
    pub async fn login(&self, username: &str, passcode: &str) -> Result<()> {
        let username = username.to_string();
        let passcode = passcode.to_string();
        self.request(|reply| ClientCommand::Login {
            username,
            passcode,
            reply,
        })
        .await?
    }

    /// Send the quiz start command; `false` when the control channel is not open
    pub async fn start_quiz(&self) -> Result<bool> {
        self.request(|reply| ClientCommand::StartQuiz { reply })
            .await
    }

    /// Tear down the current session
    pub async fn teardown(&self) -> Result<()> {
        self.request(|reply| ClientCommand::Teardown { reply }).await
    }

    /// Stop the client loop
    pub fn shutdown(&self) -> Result<()> {
        self.command(ClientCommand::Shutdown)
    }
}

/// Quiz session client
pub struct QuizClient {
    close_policy: SignalingClosePolicy,
    control_label: String,
    connection: ConnectionManager,
    negotiator: SessionNegotiator,
    control: ControlProtocol,
    control_ready: bool,
    login_pending: bool,
    stage: QuizStage,
    events_tx: EventSender,
    events_rx: EventReceiver,
    consumer: ConsumerSender,
}

impl QuizClient {
    /// Create a client from its collaborators
    ///
    /// Returns the client, a handle to command it, and the consumer event stream.
    pub fn new(
        config: QuizLinkConfig,
        connector: Arc<dyn SignalingConnector>,
        factory: Arc<dyn PeerSessionFactory>,
        media: Arc<dyn MediaSource>,
    ) -> Result<(Self, ClientHandle, mpsc::UnboundedReceiver<ConsumerEvent>)> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (consumer, consumer_rx) = mpsc::unbounded_channel();

        let connection = ConnectionManager::new(&config.signaling_url, connector, events_tx.clone());
        let negotiator = SessionNegotiator::new(&config, factory, media, events_tx.clone());

        let client = Self {
            close_policy: config.signaling_close_policy,
            control_label: config.control_channel_label.clone(),
            connection,
            negotiator,
            control: ControlProtocol::new(),
            control_ready: false,
            login_pending: false,
            stage: QuizStage::AwaitingLogin,
            events_tx: events_tx.clone(),
            events_rx,
            consumer,
        };

        Ok((client, ClientHandle { tx: events_tx }, consumer_rx))
    }

    /// Create a client using WebSocket signaling and webrtc-rs peers
    pub fn with_webrtc(
        config: QuizLinkConfig,
        media: Arc<dyn MediaSource>,
    ) -> Result<(Self, ClientHandle, mpsc::UnboundedReceiver<ConsumerEvent>)> {
        Self::new(
            config,
            Arc::new(WebSocketConnector),
            Arc::new(RtcSessionFactory),
            media,
        )
    }

    /// Handle events until shutdown
    pub async fn run(mut self) {
        info!("Quiz client started");
        while let Some(event) = self.events_rx.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }
        self.shutdown().await;
        info!("Quiz client stopped");
    }

    /// Wait for the next event and handle it
    ///
    /// Returns `false` once the client has been told to shut down.
    pub async fn step(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => self.handle_event(event).await,
            None => false,
        }
    }

    /// Handle every event already queued, without waiting
    ///
    /// Returns how many events were handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            handled += 1;
            if !self.handle_event(event).await {
                break;
            }
        }
        handled
    }

    /// Handle one event; returns `false` on shutdown
    pub async fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Command(command) => return self.handle_command(command).await,
            SessionEvent::SignalingText { connection, text } => {
                if connection != self.connection.generation() {
                    debug!(connection, "Dropping text from stale signaling connection");
                } else {
                    self.handle_signaling(&text).await;
                }
            }
            SessionEvent::SignalingClosed { connection } => {
                if self.connection.is_open() && connection != self.connection.generation() {
                    debug!(connection, "Ignoring close of stale signaling connection");
                } else {
                    self.handle_signaling_closed().await;
                }
            }
            SessionEvent::LocalCandidate { session, candidate } => {
                match self
                    .negotiator
                    .handle_local_candidate(session, candidate, &self.connection)
                {
                    Ok(_) => {}
                    Err(e) if e.is_transport_error() => {
                        debug!(session = %session, "Local candidate not sent: {}", e);
                    }
                    Err(e) => warn!(session = %session, "Failed to send local candidate: {}", e),
                }
            }
            SessionEvent::IceStateChanged { session, state } => {
                self.negotiator.handle_ice_state(session, state);
            }
            SessionEvent::PeerStateChanged { session, state } => {
                let was_current = self.negotiator.is_current(session);
                self.negotiator.handle_peer_state(session, state).await;
                if was_current && self.negotiator.session_id().is_none() {
                    self.session_closed();
                }
            }
            SessionEvent::ControlChannelOpen { session, label } => {
                if !self.negotiator.is_current(session) {
                    debug!(session = %session, "Ignoring channel open from stale session");
                } else if label == self.control_label {
                    info!(session = %session, "Control channel '{}' ready", label);
                    self.control_ready = true;
                    self.emit(ConsumerEvent::ControlChannelReady);
                } else {
                    debug!(session = %session, "Remote data channel '{}' open", label);
                }
            }
            SessionEvent::ControlChannelClosed { session, label } => {
                if self.negotiator.is_current(session) && label == self.control_label {
                    info!(session = %session, "Control channel '{}' closed", label);
                    self.control_closed();
                }
            }
            SessionEvent::ControlText {
                session,
                label,
                text,
            } => {
                if !self.negotiator.is_current(session) {
                    debug!(session = %session, "Dropping control text from stale session");
                } else if let Some(message) = self.control.handle_incoming(&text) {
                    debug!(session = %session, channel = %label, "Control message received");
                    self.handle_control(message);
                }
            }
            SessionEvent::RemoteTrack { session, track } => {
                if self.negotiator.is_current(session) {
                    self.emit(ConsumerEvent::RemoteTrack(track));
                } else {
                    debug!(session = %session, "Ignoring track from stale session");
                }
            }
        }

        true
    }

    async fn handle_command(&mut self, command: ClientCommand) -> bool {
        match command {
            ClientCommand::Connect { reply } => {
                let _ = reply.send(self.connect().await);
            }
            ClientCommand::Login {
                username,
                passcode,
                reply,
            } => {
                let _ = reply.send(self.login(&username, &passcode));
            }
            ClientCommand::StartQuiz { reply } => {
                let _ = reply.send(self.start_quiz().await);
            }
            ClientCommand::Teardown { reply } => {
                self.teardown_session().await;
                let _ = reply.send(());
            }
            ClientCommand::Shutdown => {
                info!("Shutdown requested");
                return false;
            }
        }
        true
    }

    /// Open the relay connection; `Ok(false)` when already open or pending
    pub async fn connect(&mut self) -> Result<bool> {
        let opened = self.connection.connect().await?;
        if opened {
            self.emit(ConsumerEvent::SignalingConnected);
        }
        Ok(opened)
    }

    /// Send login credentials over the relay
    ///
    /// # Errors
    ///
    /// `Error::TransportNotOpen` when the relay connection is not open.
    pub fn login(&mut self, username: &str, passcode: &str) -> Result<()> {
        let envelope = SignalingEnvelope::Login(LoginRequest {
            username: username.to_string(),
            passcode: passcode.to_string(),
        });
        self.connection.send(&envelope).map_err(|e| {
            warn!("Failed to send login: {}", e);
            e
        })?;

        info!(username, "Login sent");
        self.login_pending = true;
        Ok(())
    }

    /// Send the quiz start command
    ///
    /// Returns `false`, without sending, when the control channel is not open.
    pub async fn start_quiz(&mut self) -> bool {
        let delivered = self.control.send(&ControlMessage::QuizStart).await;
        if delivered {
            self.set_stage(QuizStage::InProgress);
        }
        delivered
    }

    /// Tear down the current session, keeping the relay connection
    pub async fn teardown_session(&mut self) -> Option<SessionId> {
        let closed = self.negotiator.teardown().await;
        if closed.is_some() {
            self.session_closed();
        }
        closed
    }

    async fn shutdown(&mut self) {
        self.teardown_session().await;
        self.connection.close();
    }

    async fn handle_signaling(&mut self, text: &str) {
        let envelope = match SignalingEnvelope::from_json(text) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return,
            Err(e) => {
                warn!("Ignoring malformed signaling message: {}", e);
                return;
            }
        };
        debug!(kind = envelope.kind(), "Signaling envelope received");

        match envelope {
            SignalingEnvelope::LoginResult(result) => self.handle_login_result(result.valid).await,
            SignalingEnvelope::Answer(answer) => {
                if let Err(e) = self.negotiator.handle_answer(answer).await {
                    warn!("Answer not applied: {}", e);
                    if self.negotiator.session_id().is_none() {
                        self.session_closed();
                        self.emit(ConsumerEvent::NegotiationFailed(e.to_string()));
                    }
                }
            }
            SignalingEnvelope::IceCandidate(candidate) => {
                if let Err(e) = self.negotiator.handle_remote_candidate(candidate).await {
                    warn!("Remote candidate not applied: {}", e);
                }
            }
            SignalingEnvelope::Offer(_) => {
                warn!("Ignoring remote offer; this client always makes the offer");
            }
            SignalingEnvelope::Login(_) => {
                warn!("Ignoring login request received from the relay");
            }
        }
    }

    async fn handle_login_result(&mut self, valid: bool) {
        if !std::mem::take(&mut self.login_pending) {
            warn!(valid, "Ignoring login result with no login outstanding");
            return;
        }

        if !valid {
            info!("Login rejected");
            self.emit(ConsumerEvent::LoginRejected);
            return;
        }

        if matches!(
            self.negotiator.phase(),
            NegotiationPhase::Configuring | NegotiationPhase::OfferSent
        ) {
            info!("Login accepted again while negotiating, keeping the current negotiation");
            return;
        }

        info!("Login accepted");
        self.emit(ConsumerEvent::LoginAccepted);
        self.set_stage(QuizStage::Instructions);

        let previous = self.negotiator.session_id();
        let started = self.negotiator.start(&self.connection).await;
        if previous.is_some() && self.negotiator.session_id() != previous {
            // Superseded by start()
            self.session_closed();
        }

        match started {
            Ok(session) => {
                if let Some(channel) = self.negotiator.control_channel() {
                    self.control.attach(channel);
                }
                debug!(session = %session, "Negotiation started");
            }
            Err(e) if e.is_user_facing() => {
                self.emit(ConsumerEvent::MediaUnavailable(e.to_string()));
            }
            Err(e) => {
                warn!("Session negotiation failed to start: {}", e);
                self.emit(ConsumerEvent::NegotiationFailed(e.to_string()));
            }
        }
    }

    async fn handle_signaling_closed(&mut self) {
        self.login_pending = false;
        self.emit(ConsumerEvent::SignalingClosed);

        match (self.close_policy, self.negotiator.session_id()) {
            (SignalingClosePolicy::TeardownSession, Some(_)) => {
                info!("Signaling closed, tearing down session");
                self.teardown_session().await;
            }
            (SignalingClosePolicy::KeepSession, Some(session)) => {
                info!(session = %session, "Signaling closed, keeping session");
            }
            (_, None) => {}
        }
    }

    fn handle_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::HandStatus(status) => self.emit(ConsumerEvent::InfoBar(status)),
            ControlMessage::NewQuestion(question) => self.emit(ConsumerEvent::Question(question)),
            ControlMessage::QuizFinished(result) => {
                info!(
                    score = result.score,
                    hands_down = %result.hands_down,
                    "Quiz finished"
                );
                self.emit(ConsumerEvent::Finished(result));
                self.set_stage(QuizStage::Complete);
            }
            ControlMessage::QuizStart => {
                warn!("Ignoring quiz_start from the remote peer");
            }
        }
    }

    fn session_closed(&mut self) {
        self.control.detach();
        self.control_closed();
    }

    fn control_closed(&mut self) {
        if std::mem::take(&mut self.control_ready) {
            self.emit(ConsumerEvent::ControlChannelClosed);
        }
    }

    fn set_stage(&mut self, stage: QuizStage) {
        if self.stage != stage {
            info!(from = ?self.stage, to = ?stage, "Quiz stage changed");
            self.stage = stage;
            self.emit(ConsumerEvent::StageChanged(stage));
        }
    }

    fn emit(&self, event: ConsumerEvent) {
        if self.consumer.send(event).is_err() {
            debug!("Consumer event dropped, no receiver");
        }
    }

    /// Current quiz stage
    pub fn stage(&self) -> QuizStage {
        self.stage
    }

    /// Session negotiator
    pub fn negotiator(&self) -> &SessionNegotiator {
        &self.negotiator
    }

    /// Relay connection
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Control protocol
    pub fn control(&self) -> &ControlProtocol {
        &self.control
    }

    /// Sender for injecting events into this client
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// New handle to this client
    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            tx: self.events_tx.clone(),
        }
    }
}
