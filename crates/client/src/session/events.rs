//! Events consumed and produced by the client dispatch loop
//!
//! Every input to the client (user commands, relay traffic, peer callbacks)
//! arrives as a [`SessionEvent`] on one channel and is handled in order.
//! Everything the presentation layer needs to know leaves as a
//! [`ConsumerEvent`].

use crate::channels::messages::{HandStatus, Question, QuizResult};
use crate::media::RemoteTrack;
use crate::peer::{IceConnectionState, PeerConnectionState, SessionId};
use crate::signaling::protocol::IceCandidateDescriptor;
use crate::Result;
use tokio::sync::{mpsc, oneshot};

/// Sender half of the client input channel
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiver half of the client input channel
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Sender half of the consumer output channel
pub type ConsumerSender = mpsc::UnboundedSender<ConsumerEvent>;

/// Input to the client dispatch loop
#[derive(Debug)]
pub enum SessionEvent {
    /// User action
    Command(ClientCommand),

    /// Raw text frame from the relay, tagged with the connection generation
    SignalingText { connection: u64, text: String },

    /// Relay connection ended
    SignalingClosed { connection: u64 },

    /// Locally gathered ICE candidate, already normalized
    LocalCandidate {
        session: SessionId,
        candidate: IceCandidateDescriptor,
    },

    /// ICE connection state change
    IceStateChanged {
        session: SessionId,
        state: IceConnectionState,
    },

    /// Peer connection state change
    PeerStateChanged {
        session: SessionId,
        state: PeerConnectionState,
    },

    /// A data channel reached the open state
    ControlChannelOpen { session: SessionId, label: String },

    /// A data channel closed
    ControlChannelClosed { session: SessionId, label: String },

    /// Text message received on a data channel
    ControlText {
        session: SessionId,
        label: String,
        text: String,
    },

    /// Remote media track arrived
    RemoteTrack {
        session: SessionId,
        track: RemoteTrack,
    },
}

/// User commands, each answered on its own reply channel
#[derive(Debug)]
pub enum ClientCommand {
    /// Open the relay connection; `Ok(false)` when already open or pending
    Connect { reply: oneshot::Sender<Result<bool>> },

    /// Send login credentials
    Login {
        username: String,
        passcode: String,
        reply: oneshot::Sender<Result<()>>,
    },

    /// Send the quiz start command; `false` when the control channel is not open
    StartQuiz { reply: oneshot::Sender<bool> },

    /// Tear down the current session, keeping the relay connection
    Teardown { reply: oneshot::Sender<()> },

    /// Stop the dispatch loop
    Shutdown,
}

/// Consumer-visible quiz progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizStage {
    /// Waiting for valid credentials
    AwaitingLogin,
    /// Logged in, quiz not started yet
    Instructions,
    /// Quiz start command delivered
    InProgress,
    /// Final result received
    Complete,
}

/// Output to the presentation layer
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    /// Relay connection opened
    SignalingConnected,
    /// Relay connection closed
    SignalingClosed,
    /// Credentials accepted; negotiation starts
    LoginAccepted,
    /// Credentials rejected; nothing else changes
    LoginRejected,
    /// Local capture failed for this attempt
    MediaUnavailable(String),
    /// Session setup or answer application failed
    NegotiationFailed(String),
    /// Quiz progress changed
    StageChanged(QuizStage),
    /// Control channel is open; the quiz can be started
    ControlChannelReady,
    /// Control channel closed
    ControlChannelClosed,
    /// Hand visibility status bar update
    InfoBar(HandStatus),
    /// Next question to display
    Question(Question),
    /// Final result
    Finished(QuizResult),
    /// Playable remote media
    RemoteTrack(RemoteTrack),
}
