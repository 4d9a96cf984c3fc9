//! Authorization guard
//!
//! Capabilities are a closed set resolved once per operation from the
//! identity collaborator. Each [`Operation`] has one rule; a denial returns
//! [`ConsultError::Forbidden`] before anything is written or emitted, and is
//! logged so denials stay observable even though they are not audited.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::consult::ConsultRequest;
use crate::error::{ConsultError, ConsultResult};
use crate::identity::Actor;

/// Closed set of grantable capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Raise consults on behalf of one's own department
    #[serde(rename = "CAN_REQUEST_CONSULTS")]
    RequestConsults,
    /// Acknowledge and work consults targeted at one's own department
    #[serde(rename = "CAN_ACKNOWLEDGE_IN_OWN_DEPARTMENT")]
    AcknowledgeInOwnDepartment,
    /// Act on any consult, including reassignment
    #[serde(rename = "CAN_MANAGE_CONSULTS_GLOBALLY")]
    ManageConsultsGlobally,
    /// Force a consult into a terminal status
    #[serde(rename = "CAN_FORCE_CLOSE")]
    ForceClose,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RequestConsults => write!(f, "CAN_REQUEST_CONSULTS"),
            Self::AcknowledgeInOwnDepartment => write!(f, "CAN_ACKNOWLEDGE_IN_OWN_DEPARTMENT"),
            Self::ManageConsultsGlobally => write!(f, "CAN_MANAGE_CONSULTS_GLOBALLY"),
            Self::ForceClose => write!(f, "CAN_FORCE_CLOSE"),
        }
    }
}

/// Mutating operations gated by the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Acknowledge,
    AddNote,
    Complete,
    Cancel,
    Reassign,
    ForceClose,
    AcknowledgeOnBehalf,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Acknowledge => write!(f, "acknowledge"),
            Self::AddNote => write!(f, "add_note"),
            Self::Complete => write!(f, "complete"),
            Self::Cancel => write!(f, "cancel"),
            Self::Reassign => write!(f, "reassign"),
            Self::ForceClose => write!(f, "force_close"),
            Self::AcknowledgeOnBehalf => write!(f, "acknowledge_on_behalf"),
        }
    }
}

/// Capability checks for every mutating operation
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizationGuard;

impl AuthorizationGuard {
    pub fn new() -> Self {
        Self
    }

    /// Whether `actor` may perform `operation` on `consult`
    pub fn permits(
        &self,
        actor: &Actor,
        operation: Operation,
        consult: Option<&ConsultRequest>,
    ) -> bool {
        let global = actor.has(Capability::ManageConsultsGlobally);
        let in_target = consult.is_some_and(|c| {
            actor.has(Capability::AcknowledgeInOwnDepartment)
                && actor.is_member_of(&c.target_department)
        });
        let is_requester = consult.is_some_and(|c| c.requester == actor.id);

        match operation {
            Operation::Create => global || actor.has(Capability::RequestConsults),
            Operation::Acknowledge | Operation::Complete => global || in_target,
            Operation::AddNote | Operation::Cancel => global || in_target || is_requester,
            Operation::Reassign | Operation::AcknowledgeOnBehalf => global,
            Operation::ForceClose => global || actor.has(Capability::ForceClose),
        }
    }

    /// Check and log; returns `Forbidden` on denial
    pub fn check(
        &self,
        actor: &Actor,
        operation: Operation,
        consult: Option<&ConsultRequest>,
    ) -> ConsultResult<()> {
        if self.permits(actor, operation, consult) {
            return Ok(());
        }

        warn!(
            actor = %actor.id,
            actor_department = %actor.department,
            %operation,
            consult_id = consult.map(|c| c.id.as_str()).unwrap_or("-"),
            "Authorization denied"
        );
        Err(ConsultError::Forbidden {
            actor: actor.id.clone(),
            operation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consult::{ClinicalPayload, ConsultStatus, Urgency};
    use chrono::Utc;

    fn consult() -> ConsultRequest {
        let now = Utc::now();
        ConsultRequest {
            id: "c-1".into(),
            requesting_department: "emergency".into(),
            target_department: "cardiology".into(),
            requester: "dr-requester".into(),
            assigned_to: None,
            patient: "patient-1".into(),
            urgency: Urgency::Urgent,
            status: ConsultStatus::Pending,
            created_at: now,
            due_by: now,
            acknowledged_at: None,
            acknowledged_by: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            escalation_level: 0,
            last_escalated_at: None,
            ceiling_notified_for: None,
            note_count: 0,
            payload: ClinicalPayload::default(),
            version: 1,
            updated_at: now,
        }
    }

    #[test]
    fn test_acknowledge_requires_target_membership() {
        let guard = AuthorizationGuard::new();
        let c = consult();

        let member = Actor::new("dr-card", "cardiology", 1)
            .with_capability(Capability::AcknowledgeInOwnDepartment);
        let outsider = Actor::new("dr-onc", "oncology", 1)
            .with_capability(Capability::AcknowledgeInOwnDepartment);
        let member_without_cap = Actor::new("clerk", "cardiology", 0);

        assert!(guard.check(&member, Operation::Acknowledge, Some(&c)).is_ok());
        assert!(matches!(
            guard.check(&outsider, Operation::Acknowledge, Some(&c)),
            Err(ConsultError::Forbidden { .. })
        ));
        assert!(!guard.permits(&member_without_cap, Operation::Acknowledge, Some(&c)));
    }

    #[test]
    fn test_requester_may_cancel_and_note_but_not_complete() {
        let guard = AuthorizationGuard::new();
        let c = consult();
        let requester = Actor::new("dr-requester", "emergency", 2);

        assert!(guard.permits(&requester, Operation::Cancel, Some(&c)));
        assert!(guard.permits(&requester, Operation::AddNote, Some(&c)));
        assert!(!guard.permits(&requester, Operation::Complete, Some(&c)));
        assert!(!guard.permits(&requester, Operation::Acknowledge, Some(&c)));
    }

    #[test]
    fn test_override_capabilities() {
        let guard = AuthorizationGuard::new();
        let c = consult();
        let admin =
            Actor::new("admin", "operations", 5).with_capability(Capability::ManageConsultsGlobally);
        let closer = Actor::new("bed-manager", "operations", 3).with_capability(Capability::ForceClose);

        assert!(guard.permits(&admin, Operation::Reassign, Some(&c)));
        assert!(guard.permits(&admin, Operation::ForceClose, Some(&c)));
        assert!(guard.permits(&admin, Operation::Acknowledge, Some(&c)));
        assert!(guard.permits(&closer, Operation::ForceClose, Some(&c)));
        assert!(!guard.permits(&closer, Operation::Reassign, Some(&c)));
        assert!(!guard.permits(&closer, Operation::AcknowledgeOnBehalf, Some(&c)));
    }

    #[test]
    fn test_create_requires_request_capability() {
        let guard = AuthorizationGuard::new();
        let requester =
            Actor::new("dr-a", "emergency", 1).with_capability(Capability::RequestConsults);
        let visitor = Actor::new("visitor", "emergency", 0);

        assert!(guard.permits(&requester, Operation::Create, None));
        assert!(!guard.permits(&visitor, Operation::Create, None));
    }

    #[test]
    fn test_global_manager_passes_every_operation() {
        let guard = AuthorizationGuard::new();
        let admin =
            Actor::new("admin", "operations", 5).with_capability(Capability::ManageConsultsGlobally);
        for operation in [
            Operation::Create,
            Operation::Acknowledge,
            Operation::AddNote,
            Operation::Complete,
            Operation::Cancel,
            Operation::Reassign,
            Operation::ForceClose,
            Operation::AcknowledgeOnBehalf,
        ] {
            assert!(guard.permits(&admin, operation, Some(&consult())), "{operation}");
        }
    }

    #[test]
    fn test_capability_serde_names() {
        let json = serde_json::to_string(&Capability::AcknowledgeInOwnDepartment).unwrap();
        assert_eq!(json, "\"CAN_ACKNOWLEDGE_IN_OWN_DEPARTMENT\"");
        let parsed: Capability = serde_json::from_str("\"CAN_FORCE_CLOSE\"").unwrap();
        assert_eq!(parsed, Capability::ForceClose);
    }
}
