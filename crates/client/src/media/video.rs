//! IVF file playback as a local video source

use super::{LocalVideo, MediaSource};
use crate::{Error, Result};
use async_trait::async_trait;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::media_engine::{MIME_TYPE_VP8, MIME_TYPE_VP9};
use webrtc::media::io::ivf_reader::{IVFFileHeader, IVFReader};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Plays a VP8/VP9 IVF file into a local track, looping at end of file
#[derive(Debug, Clone)]
pub struct IvfFileSource {
    path: PathBuf,
}

impl IvfFileSource {
    /// Create a source for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File being played
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| {
            Error::MediaAcquisition(format!("Cannot open {}: {}", path.display(), e))
        })
    }

    /// Parses from memory so frame reads never block the runtime
    fn reader<'a>(
        path: &Path,
        data: &'a [u8],
    ) -> Result<(IVFReader<Cursor<&'a [u8]>>, IVFFileHeader)> {
        IVFReader::new(Cursor::new(data)).map_err(|e| {
            Error::MediaAcquisition(format!("{} is not an IVF file: {}", path.display(), e))
        })
    }

    /// Frame interval declared by the file header
    fn frame_interval(header: &IVFFileHeader) -> Duration {
        if header.timebase_denominator == 0 {
            return Duration::from_millis(33);
        }
        let millis = 1000 * u64::from(header.timebase_numerator)
            / u64::from(header.timebase_denominator);
        Duration::from_millis(millis.max(1))
    }

    async fn feed(
        path: PathBuf,
        data: Vec<u8>,
        track: Arc<TrackLocalStaticSample>,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);

        loop {
            let mut reader = match Self::reader(&path, &data) {
                Ok((reader, _)) => reader,
                Err(e) => {
                    warn!("Video playback stopped: {}", e);
                    return;
                }
            };

            let mut frames = 0u64;
            while let Ok((frame, _)) = reader.parse_next_frame() {
                ticker.tick().await;
                frames += 1;

                let sample = Sample {
                    data: frame.freeze(),
                    duration: interval,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    debug!("Failed to write video sample: {}", e);
                }
            }

            if frames == 0 {
                warn!("{} holds no frames, stopping playback", path.display());
                return;
            }
            debug!("Reached end of {} after {} frames, looping", path.display(), frames);
        }
    }
}

/// MIME type for an IVF fourcc
fn mime_type_for(four_cc: &[u8; 4]) -> Option<&'static str> {
    match four_cc {
        b"VP80" => Some(MIME_TYPE_VP8),
        b"VP90" => Some(MIME_TYPE_VP9),
        _ => None,
    }
}

#[async_trait]
impl MediaSource for IvfFileSource {
    async fn acquire_video(&self) -> Result<LocalVideo> {
        let data = Self::load(&self.path).await?;
        let (_, header) = Self::reader(&self.path, &data)?;
        let mime_type = mime_type_for(&header.four_cc).ok_or_else(|| {
            Error::MediaAcquisition(format!(
                "Unsupported IVF codec {:?} in {}",
                String::from_utf8_lossy(&header.four_cc),
                self.path.display()
            ))
        })?;

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_owned(),
            format!("quizlink-{}", Uuid::new_v4()),
        ));

        let interval = Self::frame_interval(&header);
        info!(
            "Playing {} ({}, {}x{}, {:?} per frame)",
            self.path.display(),
            mime_type,
            header.width,
            header.height,
            interval
        );

        let feeder = tokio::spawn(Self::feed(
            self.path.clone(),
            data,
            Arc::clone(&track),
            interval,
        ));
        Ok(LocalVideo::with_feeder(track, feeder))
    }
}
