//! Wer startet die Verhandlung?
//!
//! Beide Seiten berechnen die Rolle unabhängig aus denselben zwei IDs, es
//! gibt daher nie zwei gleichzeitige Offers für dasselbe Paar.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sendet das Offer
    Initiator,
    /// Wartet auf das Offer und antwortet
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiator => f.write_str("initiator"),
            Self::Responder => f.write_str("responder"),
        }
    }
}

/// Byteweiser Vergleich: die kleinere ID initiiert
///
/// Gleiche IDs kommen im Raum nicht vor; falls doch, initiiert keiner.
pub fn role(self_id: &str, peer_id: &str) -> Role {
    if self_id.as_bytes() < peer_id.as_bytes() {
        Role::Initiator
    } else {
        Role::Responder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smaller_id_initiates() {
        assert_eq!(role("alice", "bob"), Role::Initiator);
        assert_eq!(role("bob", "alice"), Role::Responder);
    }

    #[test]
    fn exactly_one_side_initiates() {
        let ids = ["a", "b", "B", "peer-10", "peer-9", "Ärger", "zz", ""];

        for x in ids {
            for y in ids {
                if x == y {
                    continue;
                }
                let initiators = [role(x, y), role(y, x)]
                    .iter()
                    .filter(|r| **r == Role::Initiator)
                    .count();
                assert_eq!(initiators, 1, "pair ({x:?}, {y:?})");
            }
        }
    }

    #[test]
    fn ordering_is_bytewise_not_numeric() {
        assert_eq!(role("peer-10", "peer-9"), Role::Initiator);
        assert_eq!(role("Zed", "alice"), Role::Initiator);
    }

    #[test]
    fn equal_ids_never_initiate() {
        assert_eq!(role("same", "same"), Role::Responder);
    }
}
