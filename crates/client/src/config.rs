//! Configuration types for the quiz session client

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Default label of the locally created control data channel
pub const DEFAULT_CONTROL_CHANNEL_LABEL: &str = "signal";

/// Main configuration for QuizClient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizLinkConfig {
    /// WebSocket signaling relay URL (ws:// or wss://)
    pub signaling_url: String,

    /// STUN server URLs, in priority order (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Label of the control data channel created before the offer
    pub control_channel_label: String,

    /// What happens to a live session when the signaling connection closes
    pub signaling_close_policy: SignalingClosePolicy,
}

/// TURN server configuration
///
/// Credentials are forwarded to the ICE agent as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Behaviour of an in-progress or established session when the signaling
/// connection closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalingClosePolicy {
    /// Leave the session alone; media and control traffic keep flowing
    #[default]
    KeepSession,
    /// Tear the session down together with the signaling connection
    TeardownSession,
}

impl Default for QuizLinkConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8000/ws/rtc/".to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            control_channel_label: DEFAULT_CONTROL_CHANNEL_LABEL.to_string(),
            signaling_close_policy: SignalingClosePolicy::KeepSession,
        }
    }
}

impl QuizLinkConfig {
    /// Create a default configuration pointing at the given relay
    pub fn new(signaling_url: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            ..Default::default()
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` does not parse or is not a ws:// / wss:// URL
    /// - `stun_servers` is empty or holds a non-STUN URL
    /// - a TURN server has a non-TURN URL or an empty username
    /// - `control_channel_label` is empty
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        let url = url::Url::parse(&self.signaling_url).map_err(|e| {
            Error::InvalidConfig(format!(
                "signaling_url '{}' is not a valid URL: {}",
                self.signaling_url, e
            ))
        })?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }
        if let Some(bad) = self
            .stun_servers
            .iter()
            .find(|s| !s.starts_with("stun:") && !s.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "STUN server must start with stun: or stuns:, got {}",
                bad
            )));
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
            if turn.username.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "TURN server {} has an empty username",
                    turn.url
                )));
            }
        }

        if self.control_channel_label.is_empty() {
            return Err(Error::InvalidConfig(
                "control_channel_label must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Ordered reachability-server list handed to the ICE agent
    ///
    /// Discovery servers come first, relay servers (with credentials) last.
    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(self.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect()
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Set what happens to the session when signaling closes
    pub fn with_signaling_close_policy(mut self, policy: SignalingClosePolicy) -> Self {
        self.signaling_close_policy = policy;
        self
    }
}
