//! webrtc-rs data channel wrapper
//!
//! Tracks open/closed state and forwards channel
//! lifecycle and text messages to the client dispatch loop as session events.

use super::ControlChannel;
use crate::peer::SessionId;
use crate::session::events::{EventSender, SessionEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, warn};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

/// Data channel state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelState {
    /// Channel is being negotiated
    Connecting,
    /// Channel is open and ready for messages
    Open,
    /// Channel is closing
    Closing,
    /// Channel is closed
    Closed,
}

/// Text data channel bound to one session
pub struct DataChannel {
    label: String,
    session: SessionId,
    rtc_channel: Arc<RTCDataChannel>,
    state: Arc<RwLock<DataChannelState>>,
}

impl DataChannel {
    /// Create a channel on `peer_connection`
    ///
    /// Must be called before the offer is generated so the channel is part
    /// of the same negotiation. The channel is reliable and ordered.
    pub async fn create(
        peer_connection: &RTCPeerConnection,
        session: SessionId,
        label: &str,
        events: EventSender,
    ) -> Result<Self> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            max_retransmits: None,
            ..Default::default()
        };

        let rtc_channel = peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|e| {
                Error::DataChannelError(format!("Failed to create data channel: {}", e))
            })?;

        Ok(Self::attach(rtc_channel, session, events))
    }

    /// Wrap a channel opened by the remote peer
    pub fn from_remote(
        rtc_channel: Arc<RTCDataChannel>,
        session: SessionId,
        events: EventSender,
    ) -> Self {
        Self::attach(rtc_channel, session, events)
    }

    fn attach(rtc_channel: Arc<RTCDataChannel>, session: SessionId, events: EventSender) -> Self {
        let channel = Self {
            label: rtc_channel.label().to_string(),
            session,
            rtc_channel,
            state: Arc::new(RwLock::new(DataChannelState::Connecting)),
        };
        channel.setup_handlers(events);
        channel
    }

    fn setup_handlers(&self, events: EventSender) {
        let state = Arc::clone(&self.state);
        let label = self.label.clone();
        let session = self.session;
        let tx = events.clone();
        self.rtc_channel.on_open(Box::new(move || {
            debug!(session = %session, "Data channel '{}' opened", label);
            *state.write() = DataChannelState::Open;
            let _ = tx.send(SessionEvent::ControlChannelOpen { session, label });
            Box::pin(async {})
        }));

        let state = Arc::clone(&self.state);
        let label = self.label.clone();
        let tx = events.clone();
        self.rtc_channel.on_close(Box::new(move || {
            let state = Arc::clone(&state);
            let label = label.clone();
            let tx = tx.clone();
            Box::pin(async move {
                debug!(session = %session, "Data channel '{}' closed", label);
                *state.write() = DataChannelState::Closed;
                let _ = tx.send(SessionEvent::ControlChannelClosed { session, label });
            })
        }));

        let label = self.label.clone();
        self.rtc_channel.on_error(Box::new(move |err| {
            let label = label.clone();
            Box::pin(async move {
                error!(session = %session, "Data channel '{}' error: {}", label, err);
            })
        }));

        let label = self.label.clone();
        self.rtc_channel.on_message(Box::new(move |msg| {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = events.send(SessionEvent::ControlText {
                        session,
                        label: label.clone(),
                        text,
                    });
                }
                Err(_) => warn!(
                    session = %session,
                    "Ignoring non-text message on data channel '{}'", label
                ),
            }
            Box::pin(async {})
        }));
    }

    /// Current state
    pub fn state(&self) -> DataChannelState {
        *self.state.read()
    }
}

#[async_trait]
impl ControlChannel for DataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.state() == DataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        let state = self.state();
        if state != DataChannelState::Open {
            return Err(Error::DataChannelError(format!(
                "Data channel is not open (state: {:?})",
                state
            )));
        }

        let sent = self
            .rtc_channel
            .send_text(text.to_string())
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to send message: {}", e)))?;

        debug!("Sent {} bytes on data channel '{}'", sent, self.label);

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.state.write() = DataChannelState::Closing;

        self.rtc_channel
            .close()
            .await
            .map_err(|e| Error::DataChannelError(format!("Failed to close channel: {}", e)))?;

        *self.state.write() = DataChannelState::Closed;
        debug!("Data channel '{}' closed", self.label);
        Ok(())
    }
}
