//! Core consult entities
//!
//! These types are persisted by the [`ConsultStore`](crate::state::ConsultStore)
//! and carried as snapshots inside every [`ConsultEvent`](crate::events::ConsultEvent).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ConsultError;

/// Unique identifier for consult requests
pub type ConsultId = String;

/// Opaque reference to an actor resolved by the identity collaborator
pub type ActorId = String;

/// Department identifier (stable key, not the display name)
pub type DepartmentId = String;

/// Opaque patient reference owned by the patient record system
pub type PatientRef = String;

/// Clinical urgency of a consult; selects the SLA duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    #[serde(alias = "emergency")]
    Emergency,
    #[serde(alias = "urgent")]
    Urgent,
    #[serde(alias = "routine")]
    Routine,
}

impl Urgency {
    /// All urgencies, most to least urgent
    pub fn all() -> &'static [Urgency] {
        &[Urgency::Emergency, Urgency::Urgent, Urgency::Routine]
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Urgency::Emergency => write!(f, "EMERGENCY"),
            Urgency::Urgent => write!(f, "URGENT"),
            Urgency::Routine => write!(f, "ROUTINE"),
        }
    }
}

impl FromStr for Urgency {
    type Err = ConsultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EMERGENCY" => Ok(Urgency::Emergency),
            "URGENT" => Ok(Urgency::Urgent),
            "ROUTINE" => Ok(Urgency::Routine),
            _ => Err(ConsultError::InvalidUrgency(s.to_string())),
        }
    }
}

/// Lifecycle status of a consult
///
/// Escalation is not a status; see [`ConsultRequest::escalation_level`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsultStatus {
    Pending,
    Acknowledged,
    InProgress,
    Completed,
    Cancelled,
}

impl ConsultStatus {
    /// Whether this is a terminal status (no further transitions allowed)
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether the escalation sweep may act on a consult in this status
    pub fn is_escalation_eligible(self) -> bool {
        matches!(self, Self::Pending | Self::Acknowledged)
    }
}

impl std::fmt::Display for ConsultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Acknowledged => write!(f, "ACKNOWLEDGED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Who currently holds a consult
///
/// Externally tagged so the binary store encoding can round-trip it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignee {
    /// A specific person
    Actor { actor_id: ActorId },
    /// A seniority role within a department (e.g. "on-call registrar")
    Role {
        department: DepartmentId,
        title: String,
    },
}

impl Assignee {
    /// Assign to a specific actor
    pub fn actor(actor_id: impl Into<ActorId>) -> Self {
        Self::Actor {
            actor_id: actor_id.into(),
        }
    }

    /// Assign to a department role
    pub fn role(department: impl Into<DepartmentId>, title: impl Into<String>) -> Self {
        Self::Role {
            department: department.into(),
            title: title.into(),
        }
    }

    /// The actor id, when assigned to a person
    pub fn actor_id(&self) -> Option<&str> {
        match self {
            Self::Actor { actor_id } => Some(actor_id),
            Self::Role { .. } => None,
        }
    }
}

impl std::fmt::Display for Assignee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Actor { actor_id } => write!(f, "{}", actor_id),
            Self::Role { department, title } => write!(f, "{}/{}", department, title),
        }
    }
}

/// Free-text clinical content; opaque to the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicalPayload {
    pub reason: String,
    pub question: String,
    #[serde(default)]
    pub history: String,
}

/// A consult request between two departments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsultRequest {
    /// Unique consult identifier
    pub id: ConsultId,

    /// Department asking for input
    pub requesting_department: DepartmentId,

    /// Department being asked
    pub target_department: DepartmentId,

    /// Actor who raised the request
    pub requester: ActorId,

    /// Current holder (set on acknowledgement, escalation, or reassignment)
    pub assigned_to: Option<Assignee>,

    /// Patient the consult concerns
    pub patient: PatientRef,

    pub urgency: Urgency,

    pub status: ConsultStatus,

    pub created_at: DateTime<Utc>,

    /// Resolution deadline, computed from the target department's SLA
    pub due_by: DateTime<Utc>,

    pub acknowledged_at: Option<DateTime<Utc>>,

    pub acknowledged_by: Option<ActorId>,

    pub completed_at: Option<DateTime<Utc>>,

    pub cancelled_at: Option<DateTime<Utc>>,

    pub cancellation_reason: Option<String>,

    /// Hierarchy rungs climbed because of SLA breach (0 = not escalated)
    pub escalation_level: u32,

    pub last_escalated_at: Option<DateTime<Utc>>,

    /// `due_by` of the breach episode already announced at the hierarchy ceiling
    pub ceiling_notified_for: Option<DateTime<Utc>>,

    /// Number of notes appended so far
    pub note_count: u32,

    pub payload: ClinicalPayload,

    /// Record version, bumped on every committed mutation
    pub version: u64,

    pub updated_at: DateTime<Utc>,
}

impl ConsultRequest {
    /// Whether the consult is past its deadline and still open
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        crate::sla::is_overdue(self, now)
    }

    /// Whether the consult has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Read model returned to callers: snapshot plus derived fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultView {
    pub consult: ConsultRequest,
    pub is_overdue: bool,
    /// Seconds until `due_by`; `None` once breached or closed
    pub seconds_remaining: Option<i64>,
}

impl ConsultView {
    /// Build a view evaluated at `now`
    pub fn at(consult: ConsultRequest, now: DateTime<Utc>) -> Self {
        let is_overdue = crate::sla::is_overdue(&consult, now);
        let seconds_remaining =
            crate::sla::time_remaining(&consult, now).map(|d: Duration| d.num_seconds());
        Self {
            consult,
            is_overdue,
            seconds_remaining,
        }
    }
}

/// Input for [`ConsultRegistry::create`](crate::consult::ConsultRegistry::create)
///
/// `urgency` is the raw client value; it is validated on create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConsult {
    pub target_department: DepartmentId,
    pub urgency: String,
    pub patient: PatientRef,
    #[serde(default)]
    pub payload: ClinicalPayload,
}

/// Kind of clinical note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoteType {
    Progress,
    Recommendation,
    Assessment,
    Plan,
}

impl std::fmt::Display for NoteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Progress => write!(f, "PROGRESS"),
            Self::Recommendation => write!(f, "RECOMMENDATION"),
            Self::Assessment => write!(f, "ASSESSMENT"),
            Self::Plan => write!(f, "PLAN"),
        }
    }
}

/// Append-only note on a consult
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsultNote {
    pub id: String,
    pub consult_id: ConsultId,
    pub author: ActorId,
    pub note_type: NoteType,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Input for [`ConsultRegistry::add_note`](crate::consult::ConsultRegistry::add_note)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNote {
    pub note_type: NoteType,
    pub content: String,
}

impl NewNote {
    pub fn new(note_type: NoteType, content: impl Into<String>) -> Self {
        Self {
            note_type,
            content: content.into(),
        }
    }
}

/// Audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Acknowledge,
    Escalate,
    Reassign,
    ForceComplete,
    ForceCancel,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acknowledge => write!(f, "ACKNOWLEDGE"),
            Self::Escalate => write!(f, "ESCALATE"),
            Self::Reassign => write!(f, "REASSIGN"),
            Self::ForceComplete => write!(f, "FORCE_COMPLETE"),
            Self::ForceCancel => write!(f, "FORCE_CANCEL"),
        }
    }
}

/// Immutable audit record for escalations and overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub actor: ActorId,
    pub consult_id: ConsultId,
    pub action: AuditAction,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: impl Into<ActorId>,
        consult_id: impl Into<ConsultId>,
        action: AuditAction,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            actor: actor.into(),
            consult_id: consult_id.into(),
            action,
            reason: reason.into(),
            timestamp,
        }
    }
}
