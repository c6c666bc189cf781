//! webrtc-rs peer session

use super::session::{PeerSession, PeerSessionFactory, SessionId, SignalingState};
use crate::channels::{ControlChannel, DataChannel};
use crate::media::{LocalVideo, RemoteTrack};
use crate::session::events::{EventSender, SessionEvent};
use crate::signaling::protocol::{IceCandidateDescriptor, SdpKind, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

/// Peer session backed by a webrtc-rs `RTCPeerConnection`
pub struct RtcPeerSession {
    id: SessionId,
    peer_connection: Arc<RTCPeerConnection>,
    events: EventSender,
    channels: Arc<Mutex<Vec<Arc<DataChannel>>>>,
}

impl RtcPeerSession {
    /// Create the peer connection and register its event handlers
    #[instrument(skip(ice_servers, events), fields(session = %id))]
    pub async fn new(id: SessionId, ice_servers: &[RTCIceServer], events: EventSender) -> Result<Self> {
        info!("Creating peer connection");

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers.to_vec(),
            ..Default::default()
        };

        let peer_connection =
            Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
                Error::WebRtcError(format!("Failed to create peer connection: {}", e))
            })?);

        let session = Self {
            id,
            peer_connection,
            events,
            channels: Arc::new(Mutex::new(Vec::new())),
        };
        session.setup_handlers();

        Ok(session)
    }

    fn setup_handlers(&self) {
        let id = self.id;

        let tx = self.events.clone();
        self.peer_connection.on_ice_candidate(Box::new(move |candidate| {
            if let Some(candidate) = candidate {
                match IceCandidateDescriptor::from_local(&candidate) {
                    Ok(descriptor) => {
                        let _ = tx.send(SessionEvent::LocalCandidate {
                            session: id,
                            candidate: descriptor,
                        });
                    }
                    Err(e) => warn!(session = %id, "Dropping local candidate: {}", e),
                }
            } else {
                debug!(session = %id, "Local candidate gathering complete");
            }
            Box::pin(async {})
        }));

        let tx = self.events.clone();
        self.peer_connection
            .on_ice_connection_state_change(Box::new(move |state| {
                let _ = tx.send(SessionEvent::IceStateChanged {
                    session: id,
                    state: state.into(),
                });
                Box::pin(async {})
            }));

        let tx = self.events.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |state| {
                let _ = tx.send(SessionEvent::PeerStateChanged {
                    session: id,
                    state: state.into(),
                });
                Box::pin(async {})
            }));

        let tx = self.events.clone();
        let channels = Arc::clone(&self.channels);
        self.peer_connection.on_data_channel(Box::new(move |rtc_channel| {
            info!(session = %id, "Remote peer opened data channel '{}'", rtc_channel.label());
            let channel = DataChannel::from_remote(rtc_channel, id, tx.clone());
            channels.lock().push(Arc::new(channel));
            Box::pin(async {})
        }));

        let tx = self.events.clone();
        self.peer_connection
            .on_track(Box::new(move |track, _receiver, _transceiver| {
                info!(
                    session = %id,
                    codec = %track.codec().capability.mime_type,
                    "Remote track received"
                );
                let _ = tx.send(SessionEvent::RemoteTrack {
                    session: id,
                    track: RemoteTrack::new(track),
                });
                Box::pin(async {})
            }));
    }

    /// Drain RTCP for a sender so interceptors (NACK, reports) keep working
    fn spawn_rtcp_reader(&self, sender: Arc<RTCRtpSender>) {
        let id = self.id;
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
            debug!(session = %id, "RTCP reader finished");
        });
    }

    /// Get the underlying peer connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

#[async_trait]
impl PeerSession for RtcPeerSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn ControlChannel>> {
        let channel = Arc::new(
            DataChannel::create(&self.peer_connection, self.id, label, self.events.clone())
                .await?,
        );
        self.channels.lock().push(Arc::clone(&channel));
        debug!(session = %self.id, "Created control channel '{}'", label);
        Ok(channel)
    }

    async fn add_local_video(&self, video: &LocalVideo) -> Result<()> {
        let sender = self
            .peer_connection
            .add_track(video.track() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to add video track: {}", e)))?;
        self.spawn_rtcp_reader(sender);
        debug!(session = %self.id, "Local video track added");
        Ok(())
    }

    #[instrument(skip(self), fields(session = %self.id))]
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| {
                Error::SdpError("No local description after setting offer".to_string())
            })?;

        debug!("Created SDP offer");
        Ok(SessionDescription::offer(local_desc.sdp))
    }

    fn signaling_state(&self) -> SignalingState {
        self.peer_connection.signaling_state().into()
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let remote = match description.kind {
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
            SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
            other => {
                return Err(Error::SdpError(format!(
                    "Cannot apply remote {:?} as the offering side",
                    other
                )))
            }
        }
        .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;

        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!(session = %self.id, "Closing peer connection");
        self.channels.lock().clear();
        self.peer_connection.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })
    }
}

/// Creates [`RtcPeerSession`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcSessionFactory;

#[async_trait]
impl PeerSessionFactory for RtcSessionFactory {
    async fn create_session(
        &self,
        id: SessionId,
        ice_servers: &[RTCIceServer],
        events: EventSender,
    ) -> Result<Arc<dyn PeerSession>> {
        Ok(Arc::new(RtcPeerSession::new(id, ice_servers, events).await?))
    }
}
