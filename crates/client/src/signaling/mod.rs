//! Signaling relay transport and wire format

pub mod connection;
pub mod protocol;
pub mod websocket;

pub use connection::{
    ConnectionManager, ConnectionState, SignalingConnector, SignalingLink, SignalingSink,
};
pub use protocol::{
    IceCandidateDescriptor, IceComponent, LoginRequest, LoginResult, SdpKind, SessionDescription,
    SignalingEnvelope,
};
pub use websocket::WebSocketConnector;
