//! Typed failure taxonomy for the board core.
//!
//! Every operation surfaces one of these kinds; the gateway converts them
//! into wire `error` frames via [`ServiceError::into_error_data`].

use boardcast_proto::conflict::ConflictDescriptor;
use boardcast_proto::error::{ErrorCode, ErrorData, FieldIssue};

/// Failures produced by the task service, conflict controller, and
/// assignment engine.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The credential was rejected at handshake.
    #[error("credential rejected")]
    Unauthenticated,

    /// The actor is not allowed to perform this operation.
    #[error("operation not permitted")]
    Forbidden,

    /// One or more input fields violated the schema.
    #[error("validation failed")]
    Validation(Vec<FieldIssue>),

    /// The target does not exist, or is archived where the operation
    /// demands a live task.
    #[error("task not found")]
    NotFound,

    /// Another non-archived task already holds this title (case-insensitive).
    #[error("a task with that title already exists")]
    DuplicateTitle,

    /// The title equals a reserved column name.
    #[error("title is a reserved column name")]
    ReservedTitle,

    /// The assignee is unknown or inactive.
    #[error("assignee is not an active user")]
    InvalidAssignee,

    /// The mutation was based on a stale version.
    #[error("stale write: client v{} behind server v{}", .0.client_version, .0.server_version)]
    Conflict(Box<ConflictDescriptor>),

    /// No detected conflict matches the supplied id.
    #[error("no conflict with that id")]
    UnknownConflict,

    /// Smart-Assign found no active user.
    #[error("no active user is eligible for assignment")]
    NoEligibleUser,

    /// Unexpected failure, typically from a backing store.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Builds a single-issue validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation(vec![FieldIssue::new(field, reason)])
    }

    /// Wire code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::Forbidden => ErrorCode::Forbidden,
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound => ErrorCode::NotFound,
            Self::DuplicateTitle => ErrorCode::DuplicateTitle,
            Self::ReservedTitle => ErrorCode::ReservedTitle,
            Self::InvalidAssignee => ErrorCode::InvalidAssignee,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::UnknownConflict => ErrorCode::UnknownConflict,
            Self::NoEligibleUser => ErrorCode::NoEligibleUser,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Converts this failure into the wire error payload, attaching the
    /// conflict descriptor or validation issues where present.
    #[must_use]
    pub fn into_error_data(self) -> ErrorData {
        let message = self.to_string();
        let code = self.code();
        let mut data = ErrorData::new(code, message);
        match self {
            Self::Validation(issues) => data.issues = issues,
            Self::Conflict(descriptor) => data.conflict = Some(descriptor),
            _ => {}
        }
        data
    }
}
