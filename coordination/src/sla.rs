//! SLA clock — pure deadline and breach computation
//!
//! No state, no side effects. A missing SLA entry is a configuration error
//! and is reported, never defaulted.

use chrono::{DateTime, Duration, Utc};

use crate::consult::{ConsultRequest, Urgency};
use crate::department::Department;
use crate::error::{ConsultError, ConsultResult};

/// Deadline for a consult of `urgency` raised against `department` at `created_at`
pub fn deadline(
    urgency: Urgency,
    department: &Department,
    created_at: DateTime<Utc>,
) -> ConsultResult<DateTime<Utc>> {
    let duration =
        department
            .sla
            .duration_for(urgency)
            .ok_or_else(|| ConsultError::MissingSlaConfig {
                department: department.id.clone(),
                urgency,
            })?;
    Ok(created_at + duration)
}

/// `now > due_by` and the consult is still open
pub fn is_overdue(request: &ConsultRequest, now: DateTime<Utc>) -> bool {
    now > request.due_by && !request.status.is_terminal()
}

/// Time left before breach; `None` when closed or already at/after the deadline
pub fn time_remaining(request: &ConsultRequest, now: DateTime<Utc>) -> Option<Duration> {
    if request.status.is_terminal() || now >= request.due_by {
        return None;
    }
    Some(request.due_by - now)
}
