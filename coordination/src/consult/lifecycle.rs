//! Consult lifecycle — explicit states and legal transition guards.
//!
//! ```text
//! PENDING → ACKNOWLEDGED | CANCELLED
//! ACKNOWLEDGED → IN_PROGRESS | COMPLETED | CANCELLED
//! IN_PROGRESS → COMPLETED | CANCELLED
//! ```
//!
//! Administrative force-close may additionally jump from any non-terminal
//! status straight to COMPLETED or CANCELLED; that edge set is checked by
//! [`is_legal_forced_transition`].

use super::types::ConsultStatus;

/// Whether `from → to` is a legal client-driven transition
pub fn is_legal_transition(from: ConsultStatus, to: ConsultStatus) -> bool {
    use ConsultStatus::*;

    matches!(
        (from, to),
        (Pending, Acknowledged)
            | (Pending, Cancelled)
            | (Acknowledged, InProgress)
            | (Acknowledged, Completed)
            | (Acknowledged, Cancelled)
            | (InProgress, Completed)
            | (InProgress, Cancelled)
    )
}

/// Whether an administrative force-close `from → to` is legal
pub fn is_legal_forced_transition(from: ConsultStatus, to: ConsultStatus) -> bool {
    !from.is_terminal() && to.is_terminal()
}
