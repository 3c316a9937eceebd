//! Lokales Mikrofon
//!
//! `LocalMedia` besitzt den gemeinsamen Audio-Track, den alle Peer
//! Connections senden. Ein Pump-Task liest alle 20ms einen Frame von der
//! [`MicrophoneSource`], kodiert ihn als G.711 µ-law (PCMU, 8kHz) und
//! schreibt ihn in den Track, solange nicht stummgeschaltet ist.

use super::transport::LocalTrack;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use webrtc::api::media_engine::MIME_TYPE_PCMU;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Bevorzugte Aufnahme-Rate des Geräts
pub const CAPTURE_RATE: u32 = 48000;

/// Sample Rate auf der Leitung (PCMU)
pub const WIRE_RATE: u32 = 8000;

/// Frame Size in Samples (20ms @ 8kHz = 160 samples)
pub const FRAME_SIZE: usize = 160;

/// Dauer eines Frames
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

// ============================================================================
// MEDIA STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaStatus {
    /// Noch nicht angefragt (vor dem ersten Join)
    #[default]
    Unrequested,
    Granted,
    Denied,
    NoDevice,
}

impl MediaStatus {
    fn from_error(err: &AudioError) -> Self {
        match err {
            AudioError::NoInputDevice => Self::NoDevice,
            _ => Self::Denied,
        }
    }
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unrequested => "unrequested",
            Self::Granted => "granted",
            Self::Denied => "denied",
            Self::NoDevice => "no-device",
        };
        f.write_str(s)
    }
}

// ============================================================================
// MICROPHONE SOURCE
// ============================================================================

/// Liefert Mono-Frames mit [`FRAME_SIZE`] Samples bei [`WIRE_RATE`]
pub trait CaptureStream: Send {
    /// `None` wenn noch kein vollständiger Frame vorliegt
    fn read_frame(&mut self) -> Option<Vec<f32>>;
}

/// Öffnet die Aufnahme (Berechtigung + Gerät)
#[async_trait]
pub trait MicrophoneSource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CaptureStream>, AudioError>;
}

/// Mikrofon ohne Gerät, liefert Stille (Headless-Betrieb)
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentMicrophone;

struct SilentStream;

impl CaptureStream for SilentStream {
    fn read_frame(&mut self) -> Option<Vec<f32>> {
        Some(vec![0.0; FRAME_SIZE])
    }
}

#[async_trait]
impl MicrophoneSource for SilentMicrophone {
    async fn open(&self) -> Result<Box<dyn CaptureStream>, AudioError> {
        tracing::info!("Using silent microphone");
        Ok(Box::new(SilentStream))
    }
}

// ============================================================================
// CODEC
// ============================================================================

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

/// G.711 µ-law Kodierung eines 16-bit Samples
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut pcm = i32::from(sample);
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };

    pcm = pcm.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (pcm >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Kodiert einen Frame (f32 in [-1, 1]) nach PCMU
pub fn encode_frame(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|s| linear_to_mulaw((s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16))
        .collect()
}

/// Einfaches Linear-Resampling
#[cfg_attr(not(feature = "cpal"), allow(dead_code))]
pub(crate) fn resample_linear(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || data.is_empty() {
        return data.to_vec();
    }

    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

// ============================================================================
// LOCAL MEDIA
// ============================================================================

/// Von außen sichtbarer Teil von `LocalMedia` (Status, Mute)
#[derive(Debug, Clone, Default)]
pub struct MediaControl {
    status: Arc<RwLock<MediaStatus>>,
    muted: Arc<Mutex<bool>>,
}

impl MediaControl {
    pub fn status(&self) -> MediaStatus {
        *self.status.read()
    }

    pub fn is_muted(&self) -> bool {
        *self.muted.lock()
    }

    /// Schaltet stumm bzw. wieder an, gibt den neuen Zustand zurück
    ///
    /// Funktioniert auch bevor die Aufnahme läuft; der Zustand gilt dann
    /// ab dem ersten Frame.
    pub fn toggle_mute(&self) -> bool {
        let mut muted = self.muted.lock();
        *muted = !*muted;
        tracing::debug!("Audio muted: {}", *muted);
        *muted
    }

    pub fn set_muted(&self, muted: bool) {
        *self.muted.lock() = muted;
        tracing::debug!("Audio muted: {}", muted);
    }
}

/// Mikrofon-Aufnahme und gemeinsamer lokaler Track
pub struct LocalMedia {
    control: MediaControl,
    track: Option<LocalTrack>,
    pump: Option<JoinHandle<()>>,
}

impl LocalMedia {
    pub fn new(control: MediaControl) -> Self {
        Self {
            control,
            track: None,
            pump: None,
        }
    }

    pub fn control(&self) -> &MediaControl {
        &self.control
    }

    pub fn status(&self) -> MediaStatus {
        self.control.status()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == MediaStatus::Granted && self.track.is_some()
    }

    /// Track zum Hinzufügen in neue Peer Connections
    pub fn track(&self) -> Option<LocalTrack> {
        self.track.clone()
    }

    /// Fordert das Mikrofon an und startet den Pump-Task
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub async fn acquire(&mut self, source: &dyn MicrophoneSource) -> MediaStatus {
        if self.is_ready() {
            return MediaStatus::Granted;
        }

        let status = match source.open().await {
            Ok(stream) => {
                let track = Arc::new(TrackLocalStaticSample::new(
                    RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_PCMU.to_owned(),
                        clock_rate: WIRE_RATE,
                        channels: 1,
                        ..Default::default()
                    },
                    "audio".to_owned(),
                    "vokey".to_owned(),
                ));

                self.pump = Some(spawn_pump(
                    stream,
                    Arc::clone(&track),
                    Arc::clone(&self.control.muted),
                ));
                self.track = Some(track);

                tracing::info!(
                    "Microphone granted: {}Hz mono, {:?} frames",
                    WIRE_RATE,
                    FRAME_DURATION
                );
                MediaStatus::Granted
            }
            Err(e) => {
                tracing::error!("Failed to acquire microphone: {}", e);
                MediaStatus::from_error(&e)
            }
        };

        *self.control.status.write() = status;
        status
    }

    /// Beendet die Aufnahme (beim Verlassen des Raums)
    pub fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.track = None;
        *self.control.status.write() = MediaStatus::Unrequested;
        tracing::info!("Local media stopped");
    }
}

impl Drop for LocalMedia {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

impl fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMedia")
            .field("status", &self.status())
            .field("is_muted", &self.control.is_muted())
            .field("has_track", &self.track.is_some())
            .finish()
    }
}

fn spawn_pump(
    mut stream: Box<dyn CaptureStream>,
    track: LocalTrack,
    muted: Arc<Mutex<bool>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FRAME_DURATION);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            // Immer lesen, damit der Puffer beim Stummschalten nicht vollläuft
            let Some(frame) = stream.read_frame() else {
                continue;
            };
            if *muted.lock() {
                continue;
            }

            let sample = Sample {
                data: Bytes::from(encode_frame(&frame)),
                duration: FRAME_DURATION,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                tracing::debug!("Failed to write audio sample: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulaw_reference_values() {
        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(linear_to_mulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_mulaw(i16::MIN), 0x00);
        assert_eq!(linear_to_mulaw(-1) ^ 0x80, linear_to_mulaw(1));
    }

    #[test]
    fn encode_frame_clamps_out_of_range_samples() {
        let encoded = encode_frame(&[0.0, 2.0, -2.0]);
        assert_eq!(encoded, vec![0xFF, 0x80, 0x00]);
    }

    #[test]
    fn resample_48k_to_8k_keeps_duration() {
        let input = vec![0.5; 960];
        let output = resample_linear(&input, CAPTURE_RATE, WIRE_RATE);
        assert_eq!(output.len(), FRAME_SIZE);
        assert!(output.iter().all(|s| (*s - 0.5).abs() < f32::EPSILON));
    }

    #[test]
    fn mute_toggles_before_capture() {
        let control = MediaControl::default();
        assert!(!control.is_muted());
        assert!(control.toggle_mute());
        assert!(!control.toggle_mute());
        assert_eq!(control.status(), MediaStatus::Unrequested);
    }

    #[tokio::test]
    async fn silent_microphone_grants_and_provides_track() {
        let mut media = LocalMedia::new(MediaControl::default());

        let status = media.acquire(&SilentMicrophone).await;

        assert_eq!(status, MediaStatus::Granted);
        assert!(media.is_ready());
        assert!(media.track().is_some());

        media.stop();
        assert_eq!(media.status(), MediaStatus::Unrequested);
        assert!(media.track().is_none());
    }

    struct MissingDevice;

    #[async_trait]
    impl MicrophoneSource for MissingDevice {
        async fn open(&self) -> Result<Box<dyn CaptureStream>, AudioError> {
            Err(AudioError::NoInputDevice)
        }
    }

    struct Refused;

    #[async_trait]
    impl MicrophoneSource for Refused {
        async fn open(&self) -> Result<Box<dyn CaptureStream>, AudioError> {
            Err(AudioError::PermissionDenied("blocked".into()))
        }
    }

    #[tokio::test]
    async fn capture_failures_map_to_status() {
        let mut media = LocalMedia::new(MediaControl::default());
        assert_eq!(media.acquire(&MissingDevice).await, MediaStatus::NoDevice);
        assert_eq!(media.acquire(&Refused).await, MediaStatus::Denied);
        assert!(!media.is_ready());
        assert!(media.track().is_none());
    }
}
