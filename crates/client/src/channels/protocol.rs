//! Control channel protocol
//!
//! Sends go out only while the channel reports open; anything sent earlier
//! is dropped with a diagnostic so the caller can gate on the
//! channel-ready event instead.

use super::messages::ControlMessage;
use super::ControlChannel;
use std::sync::Arc;
use tracing::{debug, warn};

/// Control message exchange over the session's control channel
#[derive(Default)]
pub struct ControlProtocol {
    channel: Option<Arc<dyn ControlChannel>>,
    sent: u64,
    dropped: u64,
}

impl ControlProtocol {
    /// Create a protocol with no channel attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `channel` for outbound messages
    pub fn attach(&mut self, channel: Arc<dyn ControlChannel>) {
        debug!("Control protocol attached to channel '{}'", channel.label());
        self.channel = Some(channel);
    }

    /// Forget the current channel
    pub fn detach(&mut self) {
        self.channel = None;
    }

    /// Whether outbound messages would currently be delivered
    pub fn is_open(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    /// Send `message`; returns whether it was handed to an open channel
    pub async fn send(&mut self, message: &ControlMessage) -> bool {
        let channel = match &self.channel {
            Some(channel) if channel.is_open() => channel,
            _ => {
                warn!(
                    "Control channel not open, dropping {} message",
                    message.kind()
                );
                self.dropped += 1;
                return false;
            }
        };

        let text = match message.to_wire() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {} message: {}", message.kind(), e);
                self.dropped += 1;
                return false;
            }
        };

        match channel.send_text(&text).await {
            Ok(()) => {
                debug!("Sent {} on channel '{}'", message.kind(), channel.label());
                self.sent += 1;
                true
            }
            Err(e) => {
                warn!("Failed to send {} message: {}", message.kind(), e);
                self.dropped += 1;
                false
            }
        }
    }

    /// Decode an inbound text message
    ///
    /// Unrecognised or malformed messages are logged and yield `None`.
    pub fn handle_incoming(&self, text: &str) -> Option<ControlMessage> {
        match ControlMessage::parse(text) {
            Ok(Some(message)) => {
                debug!("Received {} message", message.kind());
                Some(message)
            }
            Ok(None) => {
                debug!("Ignoring unrecognised control message: {}", text);
                None
            }
            Err(e) => {
                warn!("Ignoring malformed control message: {}", e);
                None
            }
        }
    }

    /// Messages delivered to an open channel
    pub fn messages_sent(&self) -> u64 {
        self.sent
    }

    /// Messages dropped because the channel was not open or rejected them
    pub fn messages_dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingChannel {
        open: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ControlChannel for RecordingChannel {
        fn label(&self) -> &str {
            "signal"
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn send_text(&self, text: &str) -> Result<()> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_without_channel_is_dropped() {
        let mut protocol = ControlProtocol::new();
        assert!(!protocol.send(&ControlMessage::QuizStart).await);
        assert_eq!(protocol.messages_dropped(), 1);
    }

    #[tokio::test]
    async fn test_send_waits_for_open() {
        let channel = Arc::new(RecordingChannel::default());
        let mut protocol = ControlProtocol::new();
        protocol.attach(channel.clone());

        assert!(!protocol.send(&ControlMessage::QuizStart).await);
        assert!(channel.sent.lock().is_empty());

        channel.open.store(true, Ordering::SeqCst);
        assert!(protocol.is_open());
        assert!(protocol.send(&ControlMessage::QuizStart).await);
        assert_eq!(*channel.sent.lock(), vec!["quiz_start".to_string()]);
        assert_eq!(protocol.messages_sent(), 1);
    }

    #[tokio::test]
    async fn test_detach_stops_delivery() {
        let channel = Arc::new(RecordingChannel::default());
        channel.open.store(true, Ordering::SeqCst);
        let mut protocol = ControlProtocol::new();
        protocol.attach(channel.clone());
        protocol.detach();

        assert!(!protocol.send(&ControlMessage::QuizStart).await);
        assert!(channel.sent.lock().is_empty());
    }

    #[test]
    fn test_incoming_unknown_and_malformed() {
        let protocol = ControlProtocol::new();
        assert!(protocol
            .handle_incoming(r#"{"message":"unknown_tag"}"#)
            .is_none());
        assert!(protocol.handle_incoming("{not json").is_none());
        assert!(matches!(
            protocol.handle_incoming(r#"{"message":"hand_seen","text":"ok","color":"green"}"#),
            Some(ControlMessage::HandStatus(_))
        ));
    }
}
