//! Signaling Module - WebSocket Client für den Raum-Koordinator
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Koordinator:
//! - WebSocket-Verbindung aufbauen und halten (inkl. Reconnect)
//! - Nachrichten serialisieren und senden
//! - Eingehende Nachrichten parsen und an Handler weiterleiten
//!

mod backoff;
mod client;
mod messages;
mod output;

pub use backoff::*;
pub use client::{MessageHandler, SignalingChannel, SignalingError, SignalingEvent};
pub use messages::*;
pub use output::SignalingOutput;
