//! Escalation ladder — deterministic decision for one overdue consult
//!
//! Given the consult as it stands under its lock and the department snapshot
//! pinned for the sweep, decide whether to climb a rung, announce the ceiling,
//! or hold. No I/O happens here.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::consult::{Assignee, ConsultId, ConsultRequest, DepartmentId};
use crate::department::{Department, HierarchyError};
use crate::error::ConsultError;

/// Per-record escalation failure
#[derive(Debug, thiserror::Error)]
pub enum EscalationError {
    #[error("Department {0} is not configured")]
    UnknownDepartment(DepartmentId),

    #[error("Department {department} has an unusable hierarchy: {source}")]
    MalformedHierarchy {
        department: DepartmentId,
        #[source]
        source: HierarchyError,
    },

    #[error("Escalating {0} timed out")]
    Timeout(ConsultId),

    #[error(transparent)]
    Consult(#[from] ConsultError),
}

impl EscalationError {
    /// Whether the failure means the store itself is down
    pub fn is_systemic(&self) -> bool {
        matches!(self, Self::Consult(ConsultError::Store(e)) if e.is_systemic())
    }
}

/// Why nothing happened this tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    /// At the ceiling and this breach episode was already announced
    CeilingAlreadyNotified,
    /// Escalated too recently
    Cooldown { until: DateTime<Utc> },
}

/// What the sweep should do with one overdue consult
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LadderDecision {
    /// Climb one rung
    Escalate {
        from_level: u32,
        to_level: u32,
        assignee: Assignee,
        rung_title: String,
    },
    /// Nowhere left to go; tell everyone once
    NotifyCeiling { level: u32 },
    Hold(HoldReason),
}

/// Decide the next ladder step for an overdue, escalation-eligible consult
pub fn decide(
    consult: &ConsultRequest,
    department: Option<&Department>,
    now: DateTime<Utc>,
    min_interval: Duration,
) -> Result<LadderDecision, EscalationError> {
    let department = department
        .ok_or_else(|| EscalationError::UnknownDepartment(consult.target_department.clone()))?;

    department
        .hierarchy
        .validate()
        .map_err(|source| EscalationError::MalformedHierarchy {
            department: department.id.clone(),
            source,
        })?;

    // validate() guarantees at least one rung
    let ceiling = department.hierarchy.ceiling().unwrap_or(0);
    let level = consult.escalation_level;

    if level >= ceiling {
        if consult.ceiling_notified_for == Some(consult.due_by) {
            return Ok(LadderDecision::Hold(HoldReason::CeilingAlreadyNotified));
        }
        return Ok(LadderDecision::NotifyCeiling { level });
    }

    if min_interval > Duration::zero() {
        if let Some(last) = consult.last_escalated_at {
            let until = last + min_interval;
            if now < until {
                return Ok(LadderDecision::Hold(HoldReason::Cooldown { until }));
            }
        }
    }

    let to_level = level + 1;
    let rung = department
        .hierarchy
        .rung(to_level)
        .ok_or_else(|| EscalationError::MalformedHierarchy {
            department: department.id.clone(),
            source: HierarchyError::Empty,
        })?;

    Ok(LadderDecision::Escalate {
        from_level: level,
        to_level,
        assignee: rung.assignee(&department.id),
        rung_title: rung.title.clone(),
    })
}
