//! Reconnect-Strategie mit exponentiellem Backoff

use std::time::Duration;

/// Standard-Basisverzögerung (1 Sekunde)
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Obergrenze für eine einzelne Wartezeit
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Maximale Anzahl Reconnect-Versuche
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Parameter für das Wiederverbinden nach einem unerwarteten Verbindungsabbruch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Wartezeit vor dem `attempt`-ten Versuch (1-basiert):
    /// `min(base * 2^attempt, max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Gibt die Wartezeit für den nächsten Versuch zurück,
    /// oder `None` wenn das Budget erschöpft ist
    pub fn next_delay(&self, attempts_so_far: u32) -> Option<Duration> {
        if attempts_so_far >= self.max_attempts {
            return None;
        }
        Some(self.delay_for(attempts_so_far + 1))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_ATTEMPTS)
    }
}
