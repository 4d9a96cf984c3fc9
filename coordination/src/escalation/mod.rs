//! Escalation — SLA breach handling over the seniority ladder
//!
//! Escalation is an overlay on PENDING/ACKNOWLEDGED consults: it raises
//! `escalation_level` and reassigns, but never changes status.
//!
//! # Escalation Ladder
//!
//! ```text
//! rung 0  (e.g. Registrar)          ← fresh consult
//!     │  overdue at sweep
//!     ▼
//! rung 1  (e.g. Consultant)         ← ESCALATE audit + CONSULT_ESCALATED
//!     │  still overdue at a later sweep
//!     ▼
//! rung N-1 (Head of Department)     ← ceiling
//!     │  still overdue
//!     ▼
//! OVERDUE_AT_CEILING, once per breach episode (per due_by value)
//! ```

pub mod ladder;
pub mod scheduler;

pub use ladder::{decide, EscalationError, HoldReason, LadderDecision};
pub use scheduler::{EscalationScheduler, SharedEscalationScheduler, SweepError, SweepReport};

/// Actor recorded on audit entries written by the sweep
pub const SYSTEM_ACTOR: &str = "system:escalation";
