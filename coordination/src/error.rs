//! Engine error types
//!
//! [`ConsultError`] is what callers of the registry and the admin service see.
//! Every variant belongs to exactly one [`ErrorClass`], which tells the caller
//! how to react (fix input, re-fetch state, or give up).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::Operation;
use crate::consult::{ActorId, ConsultId, ConsultStatus, DepartmentId, Urgency};
use crate::state::StoreError;

/// Result type alias for registry and admin operations
pub type ConsultResult<T> = Result<T, ConsultError>;

/// How a caller should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Bad input; nothing changed
    Validation,
    /// Current state does not allow the operation; re-fetch and retry if sensible
    Conflict,
    /// Caller lacks the capability
    Authorization,
    /// Consult does not exist
    NotFound,
    /// Storage or other internal failure
    Internal,
}

/// Errors returned by consult operations
#[derive(Error, Debug)]
pub enum ConsultError {
    #[error("Department {0} is unknown, inactive, or not accepting consults")]
    InvalidDepartment(DepartmentId),

    #[error("Unrecognised urgency: {0:?}")]
    InvalidUrgency(String),

    #[error("Department {department} has no SLA configured for {urgency}")]
    MissingSlaConfig {
        department: DepartmentId,
        urgency: Urgency,
    },

    #[error("A non-empty reason is required")]
    ReasonRequired,

    #[error("Note content must not be empty")]
    EmptyNote,

    #[error("Reassignment needs a new target department or a new assignee")]
    EmptyReassignment,

    #[error("Consult {consult_id} is {status}; {operation} is not allowed")]
    InvalidTransition {
        consult_id: ConsultId,
        status: ConsultStatus,
        operation: Operation,
    },

    #[error("Consult {consult_id} was already acknowledged by {acknowledged_by}")]
    AlreadyAcknowledged {
        consult_id: ConsultId,
        acknowledged_by: ActorId,
    },

    #[error("Consult {0} was modified concurrently")]
    Conflict(ConsultId),

    #[error("{actor} is not permitted to {operation}")]
    Forbidden { actor: ActorId, operation: Operation },

    #[error("Unknown actor: {0}")]
    UnknownActor(ActorId),

    #[error("Consult not found: {0}")]
    NotFound(ConsultId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ConsultError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidDepartment(_)
            | Self::InvalidUrgency(_)
            | Self::MissingSlaConfig { .. }
            | Self::ReasonRequired
            | Self::EmptyNote
            | Self::EmptyReassignment => ErrorClass::Validation,
            Self::InvalidTransition { .. } | Self::AlreadyAcknowledged { .. } | Self::Conflict(_) => {
                ErrorClass::Conflict
            }
            Self::Forbidden { .. } | Self::UnknownActor(_) => ErrorClass::Authorization,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Store(_) => ErrorClass::Internal,
        }
    }

    /// Machine-readable code for client mapping
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDepartment(_) => "INVALID_DEPARTMENT",
            Self::InvalidUrgency(_) => "INVALID_URGENCY",
            Self::MissingSlaConfig { .. } => "MISSING_SLA_CONFIG",
            Self::ReasonRequired => "REASON_REQUIRED",
            Self::EmptyNote => "EMPTY_NOTE",
            Self::EmptyReassignment => "EMPTY_REASSIGNMENT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AlreadyAcknowledged { .. } => "ALREADY_ACKNOWLEDGED",
            Self::Conflict(_) => "CONFLICT",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::UnknownActor(_) => "UNKNOWN_ACTOR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether re-fetching state and retrying may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
            || matches!(self, Self::Store(e) if e.is_transient())
    }
}
