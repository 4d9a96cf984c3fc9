//! Consult Coordination Library
//!
//! Engine for inter-department clinical consult requests:
//! - Consult lifecycle state machine with per-consult serialized mutations
//! - SLA deadlines per department and urgency
//! - Periodic escalation sweep up each department's seniority hierarchy
//! - Notification fan-out to department, user, and role rooms
//! - Capability-based authorization and audited administrative overrides
//!
//! # Wiring
//!
//! ```ignore
//! use std::sync::Arc;
//! use consult_coordination::{
//!     ConsultRegistry, DepartmentCatalog, EscalationScheduler, MemoryStore, MemorySink,
//!     NotificationDispatcher, StaticDirectory, SystemClock,
//! };
//!
//! let catalog = DepartmentCatalog::from_file("consult.toml")?.shared();
//! let (dispatcher, worker) =
//!     NotificationDispatcher::with_sink(MemorySink::new().shared(), Default::default());
//! let registry = ConsultRegistry::new(
//!     MemoryStore::new().shared(),
//!     catalog,
//!     Arc::new(StaticDirectory::default()),
//!     dispatcher.shared(),
//!     SystemClock::shared(),
//! )
//! .shared();
//! let scheduler = EscalationScheduler::new(registry.clone(), Default::default()).shared();
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod admin;
pub mod auth;
pub mod clock;
pub mod config;
pub mod consult;
pub mod department;
pub mod error;
pub mod escalation;
pub mod events;
pub mod identity;
pub mod sla;
pub mod state;

// Re-export key consult types
pub use consult::{
    Assignee, AuditAction, AuditEntry, ClinicalPayload, ConsultFilter, ConsultNote,
    ConsultRegistry, ConsultRequest, ConsultStatus, ConsultView, DepartmentSide, NewConsult,
    NewNote, NoteType, SharedConsultRegistry, Urgency,
};

// Re-export admin types
pub use admin::{AdminOverrideService, ForceCloseAction, Reassignment};

// Re-export authorization and identity types
pub use auth::{AuthorizationGuard, Capability, Operation};
pub use identity::{Actor, IdentityProvider, SharedIdentityProvider, StaticDirectory};

// Re-export department and configuration types
pub use config::{ConfigError, ConfigFile, EngineConfig};
pub use department::{
    Department, DepartmentCatalog, DepartmentSnapshot, HierarchyError, Rung, SeniorityHierarchy,
    SharedDepartmentCatalog, SlaTable,
};

// Re-export clock types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};

// Re-export error types
pub use error::{ConsultError, ConsultResult, ErrorClass};

// Re-export escalation types
pub use escalation::{
    EscalationError, EscalationScheduler, SharedEscalationScheduler, SweepError, SweepReport,
};

// Re-export event types
pub use events::{
    ConsultEvent, DeliveryError, DeliveryPolicy, DeliverySink, DeliveryWorker, DispatchStatsSnapshot,
    Envelope, EventBus, EventBusExt, EventFilter, MemorySink, NotificationDispatcher, Room,
    SharedNotificationDispatcher, rooms_for,
};

// Re-export state types
#[cfg(feature = "rocksdb-store")]
pub use state::RocksStore;
pub use state::{
    Commit, ConsultStore, MemoryStore, SharedConsultStore, StoreError, StoreResult,
};
