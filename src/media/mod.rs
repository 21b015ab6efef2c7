//! Media Module - lokale Tracks
//!
//! Dieses Modul verwaltet:
//! - Das `MediaSource` Interface für ausgehende Tracks
//! - Track-Sets mit gemeinsamem Stop-Zustand
//! - Optional: Mikrofon-Prüfung über cpal (`device-capture`)

#[cfg(feature = "device-capture")]
mod device;
mod source;

#[cfg(feature = "device-capture")]
pub use device::DeviceMediaSource;
pub use source::{
    LocalStream, LocalTrack, MediaError, MediaKind, MediaSource, StaticTrackSource, TrackSet,
    AUDIO_CLOCK_RATE, VIDEO_CLOCK_RATE,
};
