//! Lokale Media-Tracks
//!
//! Eine `MediaSource` liefert das Set an ausgehenden Tracks, das an die
//! ausgehende Peer Connection gehängt wird. Wie die Samples in die Tracks
//! kommen (Kamera, Mikrofon, Datei) ist Sache des Aufrufers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Sample Rate für Opus (48kHz)
pub const AUDIO_CLOCK_RATE: u32 = 48000;

/// RTP Clock Rate für Video
pub const VIDEO_CLOCK_RATE: u32 = 90000;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Access to media devices was denied")]
    PermissionDenied,

    #[error("Unsupported media configuration: {0}")]
    Unsupported(String),
}

// ============================================================================
// TRACKS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    fn codec(self) -> RTCRtpCodecCapability {
        match self {
            Self::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: AUDIO_CLOCK_RATE,
                channels: 2,
                ..Default::default()
            },
            Self::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: VIDEO_CLOCK_RATE,
                ..Default::default()
            },
        }
    }
}

/// Ein ausgehender Track
#[derive(Clone)]
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
    pub track: Arc<TrackLocalStaticSample>,
}

impl LocalTrack {
    pub fn new(kind: MediaKind, id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let id = id.into();
        let track = Arc::new(TrackLocalStaticSample::new(
            kind.codec(),
            id.clone(),
            stream_id.into(),
        ));
        Self { id, kind, track }
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Das Set an lokalen Tracks eines Calls.
///
/// Klone teilen sich den Stop-Zustand: `stop()` auf einem Klon stoppt alle.
#[derive(Debug, Clone)]
pub struct TrackSet {
    stream_id: String,
    tracks: Vec<LocalTrack>,
    stopped: Arc<AtomicBool>,
}

impl TrackSet {
    pub fn new(stream_id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Gibt die Tracks frei. Sample-Writer sollen danach nichts mehr schreiben.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("Stopped local stream {}", self.stream_id);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Was die Präsentationsschicht über den lokalen Stream erfährt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStream {
    pub stream_id: String,
    pub track_ids: Vec<String>,
}

impl From<&TrackSet> for LocalStream {
    fn from(set: &TrackSet) -> Self {
        Self {
            stream_id: set.stream_id.clone(),
            track_ids: set.tracks.iter().map(|t| t.id.clone()).collect(),
        }
    }
}

// ============================================================================
// MEDIA SOURCE
// ============================================================================

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Beschafft die lokalen Tracks für einen neuen Call
    async fn acquire(&self) -> Result<TrackSet, MediaError>;
}

/// Liefert pro Aufruf ein frisches Audio+Video Track-Set.
///
/// Die Samples schreibt der Aufrufer selbst über `LocalTrack::track`.
#[derive(Debug, Clone)]
pub struct StaticTrackSource {
    audio: bool,
    video: bool,
}

impl StaticTrackSource {
    pub fn new(audio: bool, video: bool) -> Self {
        Self { audio, video }
    }
}

impl Default for StaticTrackSource {
    fn default() -> Self {
        Self::new(true, true)
    }
}

#[async_trait]
impl MediaSource for StaticTrackSource {
    async fn acquire(&self) -> Result<TrackSet, MediaError> {
        if !self.audio && !self.video {
            return Err(MediaError::Unsupported(
                "neither audio nor video requested".to_string(),
            ));
        }

        let stream_id = format!("duocall-{}", uuid::Uuid::new_v4());
        let mut tracks = Vec::new();
        if self.audio {
            tracks.push(LocalTrack::new(MediaKind::Audio, "audio", stream_id.clone()));
        }
        if self.video {
            tracks.push(LocalTrack::new(MediaKind::Video, "video", stream_id.clone()));
        }

        Ok(TrackSet::new(stream_id, tracks))
    }
}
