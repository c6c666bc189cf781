//! Local and remote media
//!
//! Capture itself lives outside this crate; a [`MediaSource`] hands the
//! negotiator a ready-to-attach [`LocalVideo`] or fails with
//! `Error::MediaAcquisition`.

pub mod video;

pub use video::IvfFileSource;

use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Local video capture
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire a video source
    ///
    /// # Errors
    ///
    /// Returns `Error::MediaAcquisition` when the device is denied or unavailable.
    async fn acquire_video(&self) -> Result<LocalVideo>;
}

/// Captured local video, ready to attach to a peer session
pub struct LocalVideo {
    track: Arc<TrackLocalStaticSample>,
    feeder: Option<JoinHandle<()>>,
}

impl LocalVideo {
    /// Wrap a track that something else writes samples into
    pub fn new(track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            track,
            feeder: None,
        }
    }

    /// Wrap a track fed by a background task; the task is aborted on stop
    pub fn with_feeder(track: Arc<TrackLocalStaticSample>, feeder: JoinHandle<()>) -> Self {
        Self {
            track,
            feeder: Some(feeder),
        }
    }

    /// Empty VP8 track, written to by the caller
    pub fn vp8(track_id: &str, stream_id: &str) -> Self {
        Self::new(Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            track_id.to_owned(),
            stream_id.to_owned(),
        )))
    }

    /// Track to attach to the peer connection
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// Whether a feeder task is still producing samples
    pub fn is_running(&self) -> bool {
        self.feeder.as_ref().is_some_and(|f| !f.is_finished())
    }

    /// Stop producing samples
    pub fn stop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

impl Drop for LocalVideo {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for LocalVideo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalVideo")
            .field("track_id", &self.track.id())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Media track received from the remote peer
#[derive(Clone)]
pub struct RemoteTrack {
    track: Arc<TrackRemote>,
}

impl RemoteTrack {
    /// Wrap a webrtc-rs remote track
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self { track }
    }

    /// Track id
    pub fn id(&self) -> String {
        self.track.id()
    }

    /// Media kind (audio/video)
    pub fn kind(&self) -> String {
        self.track.kind().to_string()
    }

    /// Underlying track, for playback
    pub fn track(&self) -> Arc<TrackRemote> {
        Arc::clone(&self.track)
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}
