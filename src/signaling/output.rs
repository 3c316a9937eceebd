use super::messages::SignalingMessage;

/// Ausgehende Seite des Signalings, wie sie die Call Engine sieht
///
/// Entkoppelt die Engine vom WebSocket, damit sie in Tests gegen eine
/// einfache Aufzeichnung laufen kann.
pub trait SignalingOutput: Send + Sync {
    /// `false` wenn die Nachricht nicht übertragen werden konnte
    fn send_signal(&self, message: SignalingMessage) -> bool;
}
