//! WebRTC quiz session client
//!
//! Connects to a signaling relay over WebSocket, logs in, negotiates a
//! peer session with a remote quiz peer (this side always offers) and
//! exchanges quiz control messages over a data channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  ClientHandle (connect / login / start_quiz / teardown)  │
//! │  ↓ SessionEvent                                          │
//! │  QuizClient dispatch loop                                │
//! │  ├─ ConnectionManager (relay link + initiation latch)    │
//! │  ├─ SessionNegotiator (offer/answer/ICE state machine)   │
//! │  │   └─ PeerSession (webrtc-rs RTCPeerConnection)        │
//! │  └─ ControlProtocol (quiz messages on the data channel)  │
//! │  ↓ ConsumerEvent                                         │
//! │  Presentation layer                                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use quizlink_client::QuizLinkConfig;
//!
//! let config = QuizLinkConfig::new("ws://localhost:8000/ws/rtc/");
//! assert!(config.validate().is_ok());
//! assert_eq!(config.control_channel_label, "signal");
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use quizlink_client::{IvfFileSource, QuizClient, QuizLinkConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> quizlink_client::Result<()> {
//! let media = Arc::new(IvfFileSource::new("camera.ivf"));
//! let (client, handle, mut events) = QuizClient::with_webrtc(QuizLinkConfig::default(), media)?;
//! tokio::spawn(client.run());
//!
//! handle.connect().await?;
//! handle.login("u1", "1234").await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod channels;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use channels::{ControlMessage, HandStatus, HandsDownTime, Question, QuizResult};
pub use config::{QuizLinkConfig, SignalingClosePolicy, TurnServerConfig};
pub use error::{Error, Result};
pub use media::{IvfFileSource, LocalVideo, MediaSource, RemoteTrack};
pub use peer::{NegotiationPhase, SessionId};
pub use session::{ClientHandle, ConsumerEvent, QuizClient, QuizStage};
pub use signaling::{ConnectionState, SignalingEnvelope};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
