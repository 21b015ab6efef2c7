//! Geräte-gestützte MediaSource
//!
//! Verwendet cpal, um vor dem Call zu prüfen, ob ein Mikrofon vorhanden
//! und nutzbar ist. Fehlt es, schlägt `acquire()` fehl, bevor irgendeine
//! Peer Connection angefasst wird.

use super::source::{LocalTrack, MediaError, MediaKind, MediaSource, TrackSet, AUDIO_CLOCK_RATE};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};

/// MediaSource, die das Standard-Eingabegerät voraussetzt
#[derive(Debug, Clone)]
pub struct DeviceMediaSource {
    /// Zusätzlich einen Video-Track anlegen (Kamera wird nicht geprüft)
    with_video: bool,
}

impl DeviceMediaSource {
    pub fn new(with_video: bool) -> Self {
        Self { with_video }
    }

    /// Prüft das Standard-Eingabegerät und gibt dessen Namen zurück
    fn probe_input_device() -> Result<String, MediaError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(MediaError::NoInputDevice)?;

        let configs: Vec<SupportedStreamConfigRange> = device
            .supported_input_configs()
            .map_err(|e| MediaError::Unsupported(e.to_string()))?
            .collect();

        if !Self::supports_capture(&configs) {
            return Err(MediaError::Unsupported(
                "input device offers no usable capture format".to_string(),
            ));
        }

        Ok(device.name().unwrap_or_else(|_| "unknown".to_string()))
    }

    /// Priorität: 48kHz F32, sonst irgendein F32/I16 Format
    fn supports_capture(configs: &[SupportedStreamConfigRange]) -> bool {
        let target_rate = cpal::SampleRate(AUDIO_CLOCK_RATE);

        let exact = configs.iter().any(|config| {
            config.min_sample_rate() <= target_rate
                && config.max_sample_rate() >= target_rate
                && config.sample_format() == SampleFormat::F32
        });

        exact
            || configs.iter().any(|config| {
                matches!(config.sample_format(), SampleFormat::F32 | SampleFormat::I16)
            })
    }
}

#[async_trait]
impl MediaSource for DeviceMediaSource {
    async fn acquire(&self) -> Result<TrackSet, MediaError> {
        // cpal blockiert bei der Geräte-Enumeration
        let device_name = tokio::task::spawn_blocking(Self::probe_input_device)
            .await
            .map_err(|e| MediaError::Unsupported(e.to_string()))??;

        tracing::info!("Using audio input device '{}'", device_name);

        let stream_id = format!("duocall-{}", uuid::Uuid::new_v4());
        let mut tracks = vec![LocalTrack::new(MediaKind::Audio, "audio", stream_id.clone())];
        if self.with_video {
            tracks.push(LocalTrack::new(MediaKind::Video, "video", stream_id.clone()));
        }

        Ok(TrackSet::new(stream_id, tracks))
    }
}
