//! Consult requests: entities, lifecycle table, and the registry

pub mod lifecycle;
pub mod registry;
pub mod types;

pub use lifecycle::{is_legal_forced_transition, is_legal_transition};
pub use registry::{ConsultFilter, ConsultRegistry, DepartmentSide, SharedConsultRegistry};
pub use types::{
    ActorId, Assignee, AuditAction, AuditEntry, ClinicalPayload, ConsultId, ConsultNote,
    ConsultRequest, ConsultStatus, ConsultView, DepartmentId, NewConsult, NewNote, NoteType,
    PatientRef, Urgency,
};
