//! User types consumed read-only from the external user directory.

use serde::{Deserialize, Serialize};

use crate::task::UserId;

/// Authorization role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Member => write!(f, "member"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// A user of the board. Created and mutated externally; the core only reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable, unique identifier.
    pub id: UserId,
    /// Display name shown to other users.
    pub display_name: String,
    /// Authorization role.
    pub role: Role,
    /// Inactive users cannot be assigned tasks.
    pub is_active: bool,
}

impl User {
    /// Returns `true` if the user may perform admin-only operations.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}
