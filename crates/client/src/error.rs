//! Error types for the quiz session client

/// Result type alias using the client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while signaling, negotiating or exchanging control messages
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Send attempted while the signaling connection is not open
    #[error("Signaling transport not open: {0}")]
    TransportNotOpen(String),

    /// Signaling connection error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Local capture device denied or unavailable
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Session management error
    #[error("Session error: {0}")]
    SessionError(String),

    /// Malformed control or signaling message
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a signaling transport fault
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Error::TransportNotOpen(_) | Error::SignalingError(_) | Error::WebSocketError(_)
        )
    }

    /// Check if this error interrupts the user flow
    ///
    /// Everything else is recovered locally (ignored, queued or logged).
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Error::MediaAcquisition(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
