//! Peer session seam
//!
//! The negotiator drives a [`PeerSession`] and never touches webrtc-rs
//! directly, so the offer/answer/candidate state machine can run against
//! in-memory doubles.

use crate::channels::ControlChannel;
use crate::media::LocalVideo;
use crate::session::events::EventSender;
use crate::signaling::protocol::SessionDescription;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

/// Identifier of one negotiation attempt
///
/// Increases monotonically; callbacks tagged with an older id are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Offer/answer signaling state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// No offer/answer exchange in progress
    Stable,
    /// Local offer applied, waiting for the answer
    HaveLocalOffer,
    /// Remote offer applied
    HaveRemoteOffer,
    /// Local provisional answer applied
    HaveLocalPranswer,
    /// Remote provisional answer applied
    HaveRemotePranswer,
    /// Session closed
    Closed,
}

impl From<RTCSignalingState> for SignalingState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::Stable | RTCSignalingState::Unspecified => SignalingState::Stable,
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
        }
    }
}

/// ICE connection state, tracked for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    /// Gathering has not produced a pair yet
    New,
    /// Checking candidate pairs
    Checking,
    /// A usable pair was found
    Connected,
    /// Checking finished
    Completed,
    /// No usable pair
    Failed,
    /// Connectivity lost
    Disconnected,
    /// Agent shut down
    Closed,
}

impl From<RTCIceConnectionState> for IceConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::New | RTCIceConnectionState::Unspecified => {
                IceConnectionState::New
            }
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
        }
    }
}

/// Overall peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    /// Created, no transport yet
    New,
    /// Transports connecting
    Connecting,
    /// Media and data can flow
    Connected,
    /// Transport interrupted
    Disconnected,
    /// Transport failed
    Failed,
    /// Connection closed
    Closed,
}

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => {
                PeerConnectionState::New
            }
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        }
    }
}

/// One peer connection, driven by the negotiator
///
/// Implementations report local candidates, state changes, channel
/// lifecycle, channel text and remote tracks through the event sender they
/// were created with, tagged with their [`SessionId`].
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Session id this peer reports events under
    fn id(&self) -> SessionId;

    /// Create the outbound control data channel (reliable, ordered)
    async fn create_control_channel(&self, label: &str) -> Result<Arc<dyn ControlChannel>>;

    /// Attach a local video track
    async fn add_local_video(&self, video: &LocalVideo) -> Result<()>;

    /// Generate an offer and apply it as the local description
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Current offer/answer signaling state
    fn signaling_state(&self) -> SignalingState;

    /// Apply the remote description
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply one remote ICE candidate
    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()>;

    /// Close the connection and release its transports
    async fn close(&self) -> Result<()>;
}

/// Creates peer sessions
#[async_trait]
pub trait PeerSessionFactory: Send + Sync {
    /// Create a session with a fixed reachability-server list
    async fn create_session(
        &self,
        id: SessionId,
        ice_servers: &[RTCIceServer],
        events: EventSender,
    ) -> Result<Arc<dyn PeerSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display_and_order() {
        assert_eq!(SessionId(3).to_string(), "session-3");
        assert!(SessionId(1) < SessionId(2));
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            SignalingState::from(RTCSignalingState::HaveLocalOffer),
            SignalingState::HaveLocalOffer
        );
        assert_eq!(
            SignalingState::from(RTCSignalingState::Stable),
            SignalingState::Stable
        );
        assert_eq!(
            IceConnectionState::from(RTCIceConnectionState::Checking),
            IceConnectionState::Checking
        );
        assert_eq!(
            PeerConnectionState::from(RTCPeerConnectionState::Failed),
            PeerConnectionState::Failed
        );
    }
}
