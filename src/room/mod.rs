//! Room Module - Raum-Zustand und Mitgliederverwaltung
//!
//! - `RoomSession`: wer sind wir, wer ist noch im Raum, wie steht die Verbindung
//! - `MembershipTracker`: wendet join/new-peer/peer-left auf die Session an

mod membership;
mod session;

pub use membership::{MembershipTracker, MembershipUpdate, PeerSetChange};
pub use session::{ConnectionStatus, RoomSession};
