//! Call Engine Module - WebRTC und Audio
//!
//! Dieses Modul verwaltet:
//! - Eine Peer Connection pro Raum-Teilnehmer (Full Mesh)
//! - Rollenverteilung, Offer/Answer und ICE Candidates
//! - Audio Capture (Mikrofon) als gemeinsamer PCMU-Track

mod audio;
mod engine;
#[cfg(feature = "cpal")]
mod microphone;
mod peer_link;
mod role;
#[cfg(test)]
pub(crate) mod testing;
mod transport;
mod webrtc_transport;

pub use audio::{
    encode_frame, linear_to_mulaw, AudioError, CaptureStream, LocalMedia, MediaControl,
    MediaStatus, MicrophoneSource, SilentMicrophone, CAPTURE_RATE, FRAME_DURATION, FRAME_SIZE,
    WIRE_RATE,
};
pub use engine::{CallEngine, CallEvent, EngineCommand, EngineHandle};
#[cfg(feature = "cpal")]
pub use microphone::CpalMicrophone;
pub use peer_link::{NegotiationState, PeerLink};
pub use role::{role, Role};
pub use transport::{
    LocalTrack, MediaTransport, PeerConnectionState, RemoteStream, TransportError,
    TransportEvent, TransportSession,
};
pub use webrtc_transport::WebRtcTransport;
