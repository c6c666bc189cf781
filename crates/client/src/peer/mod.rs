//! Peer connection and session negotiation

pub mod connection;
pub mod negotiator;
pub mod session;

pub use connection::{RtcPeerSession, RtcSessionFactory};
pub use negotiator::{CandidateOutcome, NegotiationPhase, SessionNegotiator, SessionState};
pub use session::{
    IceConnectionState, PeerConnectionState, PeerSession, PeerSessionFactory, SessionId,
    SignalingState,
};
