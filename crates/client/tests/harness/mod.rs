//! Quiz client integration test harness
//!
//! Provides in-process stand-ins for every collaborator of the client:
//! - `MockConnector`: relay links backed by channels, one `RelayEnd` per open
//! - `MockPeerFactory` / `MockPeerSession`: scripted peer sessions that
//!   record descriptions and candidates in the order they are applied
//! - `MockControlChannel`: records sent text, open state is set by the test
//! - `MockMediaSource`: succeeds with a VP8 track or fails like a denied camera
//!
//! Basic usage pattern:
//!
//! 1. Build a `Fixture` with `Fixture::new()` or `Fixture::with_media(...)`
//! 2. Drive the client directly (`fixture.client.connect()`, `login`, ...)
//! 3. Script the relay with `fixture.relay().push(...)`
//! 4. Call `fixture.settle()` and assert on recorded traffic and events

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use quizlink_client::channels::ControlChannel;
use quizlink_client::peer::{PeerSession, PeerSessionFactory, SignalingState};
use quizlink_client::session::{EventSender, SessionEvent};
use quizlink_client::signaling::{
    IceCandidateDescriptor, IceComponent, SessionDescription, SignalingConnector, SignalingLink,
};
use quizlink_client::{
    ConsumerEvent, Error, LocalVideo, MediaSource, QuizClient, QuizLinkConfig, Result, SessionId,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Test end of one relay link
#[derive(Clone)]
pub struct RelayEnd {
    sent: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    push: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl RelayEnd {
    /// Deliver a raw frame to the client
    pub fn push_text(&self, text: &str) {
        if let Some(tx) = self.push.lock().as_ref() {
            let _ = tx.send(text.to_string());
        }
    }

    /// Deliver a JSON frame to the client
    pub fn push(&self, value: Value) {
        self.push_text(&value.to_string());
    }

    /// Frames the client has sent so far, parsed
    pub fn sent(&self) -> Vec<Value> {
        let mut rx = self.sent.lock();
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(serde_json::from_str(&text).expect("client sent invalid JSON"));
        }
        frames
    }

    /// Close the link from the relay side
    pub fn close(&self) {
        self.push.lock().take();
    }
}

/// Connector handing out channel-backed relay links
#[derive(Default)]
pub struct MockConnector {
    opens: AtomicUsize,
    links: Mutex<Vec<RelayEnd>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// How many links were opened
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Most recently opened link
    pub fn relay(&self) -> RelayEnd {
        self.links
            .lock()
            .last()
            .cloned()
            .expect("no relay link has been opened")
    }
}

#[async_trait]
impl SignalingConnector for MockConnector {
    async fn open(&self, _url: &str) -> Result<SignalingLink> {
        // Let a competing connect run before this one completes
        tokio::task::yield_now().await;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.links.lock().push(RelayEnd {
            sent: Arc::new(Mutex::new(outbound_rx)),
            push: Arc::new(Mutex::new(Some(inbound_tx))),
        });

        Ok(SignalingLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Control channel that records what it sends
pub struct MockControlChannel {
    label: String,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl MockControlChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Text delivered to the remote peer, in order
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ControlChannel for MockControlChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::DataChannelError(format!(
                "Channel '{}' is not open",
                self.label
            )));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.set_open(false);
        Ok(())
    }
}

/// Candidate applied to a mock session
#[derive(Debug, Clone)]
pub struct AppliedCandidate {
    pub candidate: String,
    pub after_remote_description: bool,
}

/// Scripted peer session
pub struct MockPeerSession {
    id: SessionId,
    events: EventSender,
    control: Mutex<Option<Arc<MockControlChannel>>>,
    state: Mutex<SignalingState>,
    offers: AtomicUsize,
    video_attached: AtomicBool,
    remote_descriptions: Mutex<Vec<SessionDescription>>,
    candidates: Mutex<Vec<AppliedCandidate>>,
    closed: AtomicBool,
}

impl MockPeerSession {
    fn new(id: SessionId, events: EventSender) -> Self {
        Self {
            id,
            events,
            control: Mutex::new(None),
            state: Mutex::new(SignalingState::Stable),
            offers: AtomicUsize::new(0),
            video_attached: AtomicBool::new(false),
            remote_descriptions: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn offers(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn video_attached(&self) -> bool {
        self.video_attached.load(Ordering::SeqCst)
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote_descriptions.lock().clone()
    }

    pub fn candidates(&self) -> Vec<AppliedCandidate> {
        self.candidates.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn control(&self) -> Arc<MockControlChannel> {
        self.control
            .lock()
            .clone()
            .expect("control channel was never created")
    }

    /// Open the control channel and report it, as the transport would
    pub fn open_control(&self) {
        let control = self.control();
        control.set_open(true);
        let _ = self.events.send(SessionEvent::ControlChannelOpen {
            session: self.id,
            label: control.label().to_string(),
        });
    }

    /// Deliver text from the remote peer on the control channel
    pub fn receive_control(&self, text: &str) {
        let _ = self.events.send(SessionEvent::ControlText {
            session: self.id,
            label: self.control().label().to_string(),
            text: text.to_string(),
        });
    }

    /// Report a locally gathered candidate
    pub fn gather(&self, candidate: IceCandidateDescriptor) {
        let _ = self.events.send(SessionEvent::LocalCandidate {
            session: self.id,
            candidate,
        });
    }
}

#[async_trait]
impl PeerSession for MockPeerSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn create_control_channel(&self, label: &str) -> Result<Arc<dyn ControlChannel>> {
        let channel = MockControlChannel::new(label);
        *self.control.lock() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn add_local_video(&self, _video: &LocalVideo) -> Result<()> {
        self.video_attached.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        *self.state.lock() = SignalingState::HaveLocalOffer;
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=- {} {} IN IP4 127.0.0.1\r\n",
            self.id.0, n
        )))
    }

    fn signaling_state(&self) -> SignalingState {
        *self.state.lock()
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if description.sdp.is_empty() {
            return Err(Error::SdpError("Empty remote description".to_string()));
        }
        self.remote_descriptions.lock().push(description);
        *self.state.lock() = SignalingState::Stable;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        let after_remote_description = !self.remote_descriptions.lock().is_empty();
        self.candidates.lock().push(AppliedCandidate {
            candidate: candidate.candidate,
            after_remote_description,
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(control) = self.control.lock().as_ref() {
            control.set_open(false);
        }
        Ok(())
    }
}

/// Factory producing `MockPeerSession`s
#[derive(Default)]
pub struct MockPeerFactory {
    sessions: Mutex<Vec<Arc<MockPeerSession>>>,
}

impl MockPeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn last(&self) -> Arc<MockPeerSession> {
        self.sessions
            .lock()
            .last()
            .cloned()
            .expect("no peer session has been created")
    }
}

#[async_trait]
impl PeerSessionFactory for MockPeerFactory {
    async fn create_session(
        &self,
        id: SessionId,
        _ice_servers: &[RTCIceServer],
        events: EventSender,
    ) -> Result<Arc<dyn PeerSession>> {
        let session = Arc::new(MockPeerSession::new(id, events));
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

/// Media source that always succeeds or always fails
pub struct MockMediaSource {
    available: bool,
    acquisitions: AtomicUsize,
}

impl MockMediaSource {
    pub fn available() -> Arc<Self> {
        Arc::new(Self {
            available: true,
            acquisitions: AtomicUsize::new(0),
        })
    }

    pub fn denied() -> Arc<Self> {
        Arc::new(Self {
            available: false,
            acquisitions: AtomicUsize::new(0),
        })
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for MockMediaSource {
    async fn acquire_video(&self) -> Result<LocalVideo> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        if self.available {
            Ok(LocalVideo::vp8("video", "quizlink-test"))
        } else {
            Err(Error::MediaAcquisition(
                "Permission denied by user".to_string(),
            ))
        }
    }
}

/// A client wired to mocks
pub struct Fixture {
    pub client: QuizClient,
    pub events: mpsc::UnboundedReceiver<ConsumerEvent>,
    pub connector: Arc<MockConnector>,
    pub factory: Arc<MockPeerFactory>,
    pub media: Arc<MockMediaSource>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(QuizLinkConfig::default(), MockMediaSource::available())
    }

    pub fn with_media(media: Arc<MockMediaSource>) -> Self {
        Self::with(QuizLinkConfig::default(), media)
    }

    pub fn with(config: QuizLinkConfig, media: Arc<MockMediaSource>) -> Self {
        let connector = MockConnector::new();
        let factory = MockPeerFactory::new();
        let (client, _handle, events) = QuizClient::new(
            config,
            connector.clone(),
            factory.clone(),
            media.clone(),
        )
        .expect("default config is valid");

        Self {
            client,
            events,
            connector,
            factory,
            media,
        }
    }

    pub fn relay(&self) -> RelayEnd {
        self.connector.relay()
    }

    /// Let spawned readers run and handle everything they produced
    pub async fn settle(&mut self) {
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.client.pump().await;
        }
    }

    /// Consumer events emitted so far
    pub fn drain_events(&mut self) -> Vec<ConsumerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Connect and complete a valid login, leaving an offer outstanding
    pub async fn logged_in(&mut self) -> Arc<MockPeerSession> {
        assert!(self.client.connect().await.expect("connect"));
        self.client.login("u1", "1234").expect("login sent");
        self.relay().push(json!({"type": "login", "valid": "1"}));
        self.settle().await;
        self.factory.last()
    }
}

/// Answer frame as the relay delivers it
pub fn answer_frame(sdp: &str) -> Value {
    json!({"type": "answer", "answer": {"sdp": sdp, "type": "answer"}})
}

/// Host candidate frame in the relay peer's field-wise form
pub fn candidate_frame(foundation: &str, port: u16) -> Value {
    json!({
        "type": "ice_candidate",
        "candidate": {
            "component": 1,
            "foundation": foundation,
            "ip": "192.168.1.20",
            "port": port,
            "priority": 2130706431u32,
            "protocol": "udp",
            "type": "host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        }
    })
}

/// Locally gathered host candidate
pub fn local_candidate(component: Option<IceComponent>, port: u16) -> IceCandidateDescriptor {
    IceCandidateDescriptor {
        component,
        foundation: Some("1".to_string()),
        address: Some("10.0.0.2".to_string()),
        port: Some(port),
        priority: Some(2130706431),
        protocol: Some("udp".to_string()),
        candidate_type: Some("host".to_string()),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
        ..Default::default()
    }
}
