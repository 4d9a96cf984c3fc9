//! Event types for consult notifications
//!
//! Every event carries the committed consult snapshot, so subscribers never
//! need to read back from the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::admin::ForceCloseAction;
use crate::consult::{ActorId, Assignee, ConsultNote, ConsultRequest, DepartmentId};

/// All consult lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsultEvent {
    /// A consult was raised
    ConsultCreated {
        consult: ConsultRequest,
        timestamp: DateTime<Utc>,
    },

    /// A consult was acknowledged by a target department member (or an admin)
    ConsultAcknowledged {
        consult: ConsultRequest,
        acknowledged_by: ActorId,
        timestamp: DateTime<Utc>,
    },

    /// A clinical note was appended
    NoteAdded {
        consult: ConsultRequest,
        note: ConsultNote,
        timestamp: DateTime<Utc>,
    },

    /// The sweep moved an overdue consult up the hierarchy
    ConsultEscalated {
        consult: ConsultRequest,
        from_level: u32,
        to_level: u32,
        new_assignee: Assignee,
        timestamp: DateTime<Utc>,
    },

    ConsultCompleted {
        consult: ConsultRequest,
        completed_by: ActorId,
        timestamp: DateTime<Utc>,
    },

    ConsultCancelled {
        consult: ConsultRequest,
        cancelled_by: ActorId,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Administrative reassignment to another department and/or assignee
    ConsultReassigned {
        consult: ConsultRequest,
        reassigned_by: ActorId,
        previous_department: DepartmentId,
        previous_assignee: Option<Assignee>,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Administrative force-close
    ConsultForceClosed {
        consult: ConsultRequest,
        closed_by: ActorId,
        action: ForceCloseAction,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Overdue with nowhere left to escalate; emitted once per breach episode
    OverdueAtCeiling {
        consult: ConsultRequest,
        level: u32,
        timestamp: DateTime<Utc>,
    },
}

impl ConsultEvent {
    /// Get the event timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ConsultCreated { timestamp, .. }
            | Self::ConsultAcknowledged { timestamp, .. }
            | Self::NoteAdded { timestamp, .. }
            | Self::ConsultEscalated { timestamp, .. }
            | Self::ConsultCompleted { timestamp, .. }
            | Self::ConsultCancelled { timestamp, .. }
            | Self::ConsultReassigned { timestamp, .. }
            | Self::ConsultForceClosed { timestamp, .. }
            | Self::OverdueAtCeiling { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConsultCreated { .. } => "CONSULT_CREATED",
            Self::ConsultAcknowledged { .. } => "CONSULT_ACKNOWLEDGED",
            Self::NoteAdded { .. } => "NOTE_ADDED",
            Self::ConsultEscalated { .. } => "CONSULT_ESCALATED",
            Self::ConsultCompleted { .. } => "CONSULT_COMPLETED",
            Self::ConsultCancelled { .. } => "CONSULT_CANCELLED",
            Self::ConsultReassigned { .. } => "CONSULT_REASSIGNED",
            Self::ConsultForceClosed { .. } => "CONSULT_FORCE_CLOSED",
            Self::OverdueAtCeiling { .. } => "OVERDUE_AT_CEILING",
        }
    }

    /// Committed consult snapshot carried by the event
    pub fn consult(&self) -> &ConsultRequest {
        match self {
            Self::ConsultCreated { consult, .. }
            | Self::ConsultAcknowledged { consult, .. }
            | Self::NoteAdded { consult, .. }
            | Self::ConsultEscalated { consult, .. }
            | Self::ConsultCompleted { consult, .. }
            | Self::ConsultCancelled { consult, .. }
            | Self::ConsultReassigned { consult, .. }
            | Self::ConsultForceClosed { consult, .. }
            | Self::OverdueAtCeiling { consult, .. } => consult,
        }
    }

    pub fn consult_id(&self) -> &str {
        &self.consult().id
    }
}

/// Logical delivery target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Room {
    Department { department: DepartmentId },
    User { actor_id: ActorId },
    Role { department: DepartmentId, title: String },
}

impl Room {
    pub fn department(department: impl Into<DepartmentId>) -> Self {
        Self::Department {
            department: department.into(),
        }
    }

    pub fn user(actor_id: impl Into<ActorId>) -> Self {
        Self::User {
            actor_id: actor_id.into(),
        }
    }
}

impl From<&Assignee> for Room {
    fn from(assignee: &Assignee) -> Self {
        match assignee {
            Assignee::Actor { actor_id } => Room::user(actor_id.clone()),
            Assignee::Role { department, title } => Room::Role {
                department: department.clone(),
                title: title.clone(),
            },
        }
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Department { department } => write!(f, "department:{}", department),
            Self::User { actor_id } => write!(f, "user:{}", actor_id),
            Self::Role { department, title } => write!(f, "role:{}:{}", department, title),
        }
    }
}

/// One event addressed to one room, as handed to a delivery sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event_type: String,
    pub room: Room,
    pub payload: ConsultEvent,
}

impl Envelope {
    pub fn new(room: Room, payload: ConsultEvent) -> Self {
        Self {
            event_type: payload.event_type().to_string(),
            room,
            payload,
        }
    }

    pub fn consult_id(&self) -> &str {
        self.payload.consult_id()
    }
}
