//! Conflict detection and resolution types.
//!
//! When a mutation arrives with a `knownVersion` older than the task's
//! current version, the server rejects it and attaches a
//! [`ConflictDescriptor`] so the client can drive resolution.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{Task, UserId};

/// Unique identifier for a detected conflict. Fresh per detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(Uuid);

impl ConflictId {
    /// Creates a fresh conflict identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `ConflictId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConflictId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a client needs to resolve a stale write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDescriptor {
    /// Identifier the client echoes back in `conflict.resolve`.
    pub conflict_id: ConflictId,
    /// The version the client based its mutation on.
    pub client_version: u64,
    /// The version the server currently holds.
    pub server_version: u64,
    /// Full server-side task state at detection time (the conflict base).
    pub server_task: Task,
    /// Who produced the winning write.
    pub last_modified_by: UserId,
}

/// How the client wants a detected conflict resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    /// Field-wise three-way merge against the conflict base.
    #[serde(rename = "merge")]
    Merge,
    /// Client resends with the current version; server records the intent.
    #[serde(rename = "take-mine")]
    TakeMine,
    /// Discard client changes and accept server state.
    #[serde(rename = "take-theirs")]
    TakeTheirs,
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::TakeMine => write!(f, "take-mine"),
            Self::TakeTheirs => write!(f, "take-theirs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_ids_are_unique() {
        assert_ne!(ConflictId::new(), ConflictId::new());
    }

    #[test]
    fn strategy_wire_names() {
        assert_eq!(
            serde_json::to_string(&ResolutionStrategy::TakeTheirs).unwrap(),
            "\"take-theirs\""
        );
        let parsed: ResolutionStrategy = serde_json::from_str("\"merge\"").unwrap();
        assert_eq!(parsed, ResolutionStrategy::Merge);
    }

    #[test]
    fn strategy_display_matches_wire() {
        for s in [
            ResolutionStrategy::Merge,
            ResolutionStrategy::TakeMine,
            ResolutionStrategy::TakeTheirs,
        ] {
            let wire = serde_json::to_string(&s).unwrap();
            assert_eq!(wire, format!("\"{s}\""));
        }
    }
}
