//! Wire-level error taxonomy.
//!
//! Every failure the server surfaces to a client is one of the
//! [`ErrorCode`] kinds, carried in an `error` frame as
//! `{code, message, issues?, conflict?}`.

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictDescriptor;

/// Abstract failure kinds, stable on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    Unauthenticated,
    Forbidden,
    Validation,
    NotFound,
    DuplicateTitle,
    ReservedTitle,
    InvalidAssignee,
    Conflict,
    UnknownConflict,
    NoEligibleUser,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::Validation => "validation",
            Self::NotFound => "not-found",
            Self::DuplicateTitle => "duplicate-title",
            Self::ReservedTitle => "reserved-title",
            Self::InvalidAssignee => "invalid-assignee",
            Self::Conflict => "conflict",
            Self::UnknownConflict => "unknown-conflict",
            Self::NoEligibleUser => "no-eligible-user",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// One schema violation inside a `Validation` error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// Which input field violated the schema.
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl FieldIssue {
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Payload of an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorData {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Present on `Validation` errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<FieldIssue>,
    /// Present on `Conflict` errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<Box<ConflictDescriptor>>,
}

impl ErrorData {
    /// Builds an error payload with no detail lists.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            issues: Vec::new(),
            conflict: None,
        }
    }
}
