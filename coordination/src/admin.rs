//! Administrative overrides
//!
//! Privileged reassignment, force-close, and acknowledge-on-behalf. Each
//! override writes an [`AuditEntry`] in the same commit as the record change
//! and goes through the registry's per-consult lock like any other mutation.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::Operation;
use crate::consult::registry::{apply_acknowledge, Change};
use crate::consult::{
    is_legal_forced_transition, ActorId, Assignee, AuditAction, AuditEntry, ConsultRequest,
    ConsultStatus, DepartmentId, SharedConsultRegistry,
};
use crate::error::{ConsultError, ConsultResult};
use crate::events::ConsultEvent;
use crate::sla;

/// Terminal status an administrator forces a consult into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForceCloseAction {
    Complete,
    Cancel,
}

impl ForceCloseAction {
    fn status(self) -> ConsultStatus {
        match self {
            Self::Complete => ConsultStatus::Completed,
            Self::Cancel => ConsultStatus::Cancelled,
        }
    }

    fn audit_action(self) -> AuditAction {
        match self {
            Self::Complete => AuditAction::ForceComplete,
            Self::Cancel => AuditAction::ForceCancel,
        }
    }
}

impl std::fmt::Display for ForceCloseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => write!(f, "COMPLETE"),
            Self::Cancel => write!(f, "CANCEL"),
        }
    }
}

/// Reassignment request; at least one target must be set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reassignment {
    pub new_target_department: Option<DepartmentId>,
    pub new_assignee: Option<ActorId>,
    pub reason: String,
}

impl Reassignment {
    pub fn to_department(department: impl Into<DepartmentId>, reason: impl Into<String>) -> Self {
        Self {
            new_target_department: Some(department.into()),
            new_assignee: None,
            reason: reason.into(),
        }
    }

    pub fn to_actor(actor_id: impl Into<ActorId>, reason: impl Into<String>) -> Self {
        Self {
            new_target_department: None,
            new_assignee: Some(actor_id.into()),
            reason: reason.into(),
        }
    }
}

fn require_reason(reason: &str) -> ConsultResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ConsultError::ReasonRequired);
    }
    Ok(reason.to_string())
}

fn ensure_open(consult: &ConsultRequest, operation: Operation) -> ConsultResult<()> {
    if consult.status.is_terminal() {
        return Err(ConsultError::InvalidTransition {
            consult_id: consult.id.clone(),
            status: consult.status,
            operation,
        });
    }
    Ok(())
}

/// Privileged consult operations
pub struct AdminOverrideService {
    registry: SharedConsultRegistry,
}

impl AdminOverrideService {
    pub fn new(registry: SharedConsultRegistry) -> Self {
        Self { registry }
    }

    /// Move a consult to another department and/or a named assignee
    ///
    /// A move to a different department restarts the SLA from now against
    /// the new department's table. The escalation level is kept, capped at
    /// the new department's ceiling. Naming the consult's own department
    /// changes nothing but the assignee.
    pub async fn reassign(
        &self,
        actor_id: &str,
        consult_id: &str,
        request: Reassignment,
    ) -> ConsultResult<ConsultRequest> {
        let actor = self.registry.resolve_actor(actor_id)?;
        let reason = require_reason(&request.reason)?;
        if request.new_target_department.is_none() && request.new_assignee.is_none() {
            return Err(ConsultError::EmptyReassignment);
        }

        let department = match &request.new_target_department {
            Some(id) => Some(
                self.registry
                    .catalog()
                    .get(id)
                    .filter(|d| d.accepts_consults())
                    .ok_or_else(|| ConsultError::InvalidDepartment(id.clone()))?,
            ),
            None => None,
        };
        let assignee = match &request.new_assignee {
            Some(id) => Some(self.registry.resolve_actor(id)?),
            None => None,
        };

        let registry = &self.registry;
        let mutated = registry
            .mutate::<_, ConsultError>(consult_id, |consult, now| {
                registry.guard().check(&actor, Operation::Reassign, Some(&*consult))?;
                ensure_open(consult, Operation::Reassign)?;

                let previous_department = consult.target_department.clone();
                let previous_assignee = consult.assigned_to.clone();

                // Naming the current department is not a move and keeps the deadline
                let moved_to = department
                    .as_ref()
                    .filter(|d| d.id != consult.target_department);
                if moved_to.is_none() && assignee.is_none() {
                    return Err(ConsultError::EmptyReassignment);
                }

                if let Some(department) = moved_to {
                    consult.due_by = sla::deadline(consult.urgency, department, now)?;
                    consult.target_department = department.id.clone();
                    let ceiling = department.hierarchy.ceiling().unwrap_or(0);
                    consult.escalation_level = consult.escalation_level.min(ceiling);
                    consult.ceiling_notified_for = None;
                    if assignee.is_none() {
                        consult.assigned_to = None;
                    }
                }
                if let Some(assignee) = &assignee {
                    consult.assigned_to = Some(Assignee::actor(assignee.id.clone()));
                }

                let audit = AuditEntry::new(
                    actor.id.clone(),
                    consult.id.clone(),
                    AuditAction::Reassign,
                    reason.clone(),
                    now,
                );
                let reassigned_by = actor.id.clone();
                let reason = reason.clone();
                Ok(Some(
                    Change::emit(move |consult| ConsultEvent::ConsultReassigned {
                        consult,
                        reassigned_by,
                        previous_department,
                        previous_assignee,
                        reason,
                        timestamp: now,
                    })
                    .with_audit(audit),
                ))
            })
            .await?;

        info!(
            consult_id,
            actor = %actor.id,
            target_department = %mutated.consult.target_department,
            assignee = ?mutated.consult.assigned_to,
            "Consult reassigned"
        );
        Ok(mutated.consult)
    }

    /// Force an open consult into COMPLETED or CANCELLED
    pub async fn force_close(
        &self,
        actor_id: &str,
        consult_id: &str,
        action: ForceCloseAction,
        reason: &str,
    ) -> ConsultResult<ConsultRequest> {
        let actor = self.registry.resolve_actor(actor_id)?;
        let reason = require_reason(reason)?;

        let registry = &self.registry;
        let mutated = registry
            .mutate::<_, ConsultError>(consult_id, |consult, now| {
                registry.guard().check(&actor, Operation::ForceClose, Some(&*consult))?;
                if !is_legal_forced_transition(consult.status, action.status()) {
                    return Err(ConsultError::InvalidTransition {
                        consult_id: consult.id.clone(),
                        status: consult.status,
                        operation: Operation::ForceClose,
                    });
                }

                consult.status = action.status();
                match action {
                    ForceCloseAction::Complete => consult.completed_at = Some(now),
                    ForceCloseAction::Cancel => {
                        consult.cancelled_at = Some(now);
                        consult.cancellation_reason = Some(reason.clone());
                    }
                }

                let audit = AuditEntry::new(
                    actor.id.clone(),
                    consult.id.clone(),
                    action.audit_action(),
                    reason.clone(),
                    now,
                );
                let closed_by = actor.id.clone();
                let reason = reason.clone();
                Ok(Some(
                    Change::emit(move |consult| ConsultEvent::ConsultForceClosed {
                        consult,
                        closed_by,
                        action,
                        reason,
                        timestamp: now,
                    })
                    .with_audit(audit),
                ))
            })
            .await?;

        info!(consult_id, actor = %actor.id, %action, "Consult force-closed");
        Ok(mutated.consult)
    }

    /// Acknowledge a PENDING consult as an administrator, with audit
    pub async fn acknowledge_on_behalf(
        &self,
        actor_id: &str,
        consult_id: &str,
        reason: &str,
    ) -> ConsultResult<ConsultRequest> {
        let actor = self.registry.resolve_actor(actor_id)?;
        let reason = require_reason(reason)?;

        let registry = &self.registry;
        let mutated = registry
            .mutate::<_, ConsultError>(consult_id, |consult, now| {
                registry
                    .guard()
                    .check(&actor, Operation::AcknowledgeOnBehalf, Some(&*consult))?;
                if consult.status != ConsultStatus::Pending {
                    return Err(ConsultError::InvalidTransition {
                        consult_id: consult.id.clone(),
                        status: consult.status,
                        operation: Operation::AcknowledgeOnBehalf,
                    });
                }

                let audit = AuditEntry::new(
                    actor.id.clone(),
                    consult.id.clone(),
                    AuditAction::Acknowledge,
                    reason,
                    now,
                );
                let change =
                    apply_acknowledge(consult, &actor.id, Operation::AcknowledgeOnBehalf, now)?;
                Ok(change.map(|c| c.with_audit(audit)))
            })
            .await?;

        info!(consult_id, actor = %actor.id, "Consult acknowledged on behalf");
        Ok(mutated.consult)
    }
}
