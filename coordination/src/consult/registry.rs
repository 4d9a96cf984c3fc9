//! ConsultRegistry — authoritative consult state
//!
//! Sole writer of status, assignment, and escalation level. Every mutation
//! runs the same path:
//!
//! 1. resolve the actor (once per operation)
//! 2. take the per-consult async lock
//! 3. re-read the record, check authorization and the transition
//! 4. commit record + note/audit atomically with a version compare-and-swap
//! 5. dispatch the event, still under the lock, so per-consult event order
//!    matches commit order
//!
//! Different consults never contend on the same lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use super::lifecycle::is_legal_transition;
use super::types::*;
use crate::auth::{AuthorizationGuard, Operation};
use crate::clock::SharedClock;
use crate::department::SharedDepartmentCatalog;
use crate::error::{ConsultError, ConsultResult};
use crate::events::{ConsultEvent, SharedNotificationDispatcher};
use crate::identity::{Actor, SharedIdentityProvider};
use crate::sla;
use crate::state::{Commit, SharedConsultStore, StoreError};

/// Idle lock entries are pruned once the table grows past this
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Per-consult async mutexes
#[derive(Default)]
struct ConsultLocks {
    table: Mutex<HashMap<ConsultId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConsultLocks {
    async fn acquire(&self, consult_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            if table.len() >= LOCK_PRUNE_THRESHOLD {
                table.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            table
                .entry(consult_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

type EventBuilder = Box<dyn FnOnce(ConsultRequest) -> ConsultEvent + Send>;

/// What a mutation appends alongside the updated record
pub(crate) struct Change {
    note: Option<ConsultNote>,
    audit: Option<AuditEntry>,
    event: EventBuilder,
}

impl Change {
    /// Emit the event built from the committed snapshot
    pub(crate) fn emit<F>(event: F) -> Self
    where
        F: FnOnce(ConsultRequest) -> ConsultEvent + Send + 'static,
    {
        Self {
            note: None,
            audit: None,
            event: Box::new(event),
        }
    }

    pub(crate) fn with_note(mut self, note: ConsultNote) -> Self {
        self.note = Some(note);
        self
    }

    pub(crate) fn with_audit(mut self, audit: AuditEntry) -> Self {
        self.audit = Some(audit);
        self
    }
}

/// Result of a locked mutation
pub(crate) struct Mutated {
    pub consult: ConsultRequest,
    pub committed: bool,
}

/// Which side of a consult a department listing covers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepartmentSide {
    /// Consults the department has been asked to answer
    #[default]
    Incoming,
    /// Consults the department raised
    Outgoing,
    Both,
}

/// Filter for [`ConsultRegistry::list_for_department`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsultFilter {
    pub side: DepartmentSide,
    /// Restrict to these statuses; `None` means open consults only
    pub statuses: Option<Vec<ConsultStatus>>,
    pub urgency: Option<Urgency>,
    pub overdue_only: bool,
}

impl ConsultFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn side(mut self, side: DepartmentSide) -> Self {
        self.side = side;
        self
    }

    pub fn statuses(mut self, statuses: Vec<ConsultStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }

    pub fn overdue_only(mut self) -> Self {
        self.overdue_only = true;
        self
    }

    fn matches(&self, department: &str, view: &ConsultView) -> bool {
        let consult = &view.consult;
        let side_ok = match self.side {
            DepartmentSide::Incoming => consult.target_department == department,
            DepartmentSide::Outgoing => consult.requesting_department == department,
            DepartmentSide::Both => {
                consult.target_department == department
                    || consult.requesting_department == department
            }
        };
        let status_ok = match &self.statuses {
            Some(statuses) => statuses.contains(&consult.status),
            None => !consult.status.is_terminal(),
        };
        side_ok
            && status_ok
            && self.urgency.map_or(true, |u| u == consult.urgency)
            && (!self.overdue_only || view.is_overdue)
    }
}

/// Shared reference to ConsultRegistry
pub type SharedConsultRegistry = Arc<ConsultRegistry>;

/// Consult state machine over the storage collaborator
pub struct ConsultRegistry {
    store: SharedConsultStore,
    catalog: SharedDepartmentCatalog,
    identity: SharedIdentityProvider,
    dispatcher: SharedNotificationDispatcher,
    clock: SharedClock,
    guard: AuthorizationGuard,
    locks: ConsultLocks,
}

impl ConsultRegistry {
    pub fn new(
        store: SharedConsultStore,
        catalog: SharedDepartmentCatalog,
        identity: SharedIdentityProvider,
        dispatcher: SharedNotificationDispatcher,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            catalog,
            identity,
            dispatcher,
            clock,
            guard: AuthorizationGuard::new(),
            locks: ConsultLocks::default(),
        }
    }

    /// Create a shared reference to this registry
    pub fn shared(self) -> SharedConsultRegistry {
        Arc::new(self)
    }

    pub fn catalog(&self) -> &SharedDepartmentCatalog {
        &self.catalog
    }

    pub fn dispatcher(&self) -> &SharedNotificationDispatcher {
        &self.dispatcher
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn store(&self) -> &SharedConsultStore {
        &self.store
    }

    pub(crate) fn guard(&self) -> &AuthorizationGuard {
        &self.guard
    }

    /// Number of per-consult lock entries currently held in the table
    pub fn lock_table_len(&self) -> usize {
        self.locks.len()
    }

    pub(crate) fn resolve_actor(&self, actor_id: &str) -> ConsultResult<Actor> {
        self.identity
            .resolve(actor_id)
            .ok_or_else(|| ConsultError::UnknownActor(actor_id.to_string()))
    }

    fn load(&self, consult_id: &str) -> ConsultResult<ConsultRequest> {
        self.store
            .get_consult(consult_id)?
            .ok_or_else(|| ConsultError::NotFound(consult_id.to_string()))
    }

    fn commit(&self, commit: Commit) -> ConsultResult<()> {
        let id = commit.consult.id.clone();
        self.store.commit(commit).map_err(|e| match e {
            StoreError::VersionConflict { .. } => ConsultError::Conflict(id),
            other => ConsultError::Store(other),
        })
    }

    /// Run one serialized read-validate-commit-dispatch cycle
    ///
    /// `apply` edits a copy of the current record and returns the change to
    /// commit, or `None` to leave the record untouched. Version and
    /// `updated_at` are stamped here.
    pub(crate) async fn mutate<F, E>(&self, consult_id: &str, apply: F) -> Result<Mutated, E>
    where
        F: FnOnce(&mut ConsultRequest, DateTime<Utc>) -> Result<Option<Change>, E> + Send,
        E: From<ConsultError>,
    {
        let _guard = self.locks.acquire(consult_id).await;
        let now = self.clock.now();
        let current = self.load(consult_id)?;

        let mut next = current.clone();
        let Some(change) = apply(&mut next, now)? else {
            return Ok(Mutated {
                consult: current,
                committed: false,
            });
        };
        next.version = current.version + 1;
        next.updated_at = now;

        let mut commit = Commit::update(next.clone(), current.version);
        commit.note = change.note;
        commit.audit = change.audit;
        self.commit(commit)?;

        let event = (change.event)(next.clone());
        debug!(
            consult_id,
            event_type = event.event_type(),
            version = next.version,
            "Consult committed"
        );
        self.dispatcher.dispatch(event).await;

        Ok(Mutated {
            consult: next,
            committed: true,
        })
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Raise a new consult against `new.target_department`
    pub async fn create(&self, requester_id: &str, new: NewConsult) -> ConsultResult<ConsultRequest> {
        let urgency: Urgency = new.urgency.parse()?;
        let requester = self.resolve_actor(requester_id)?;
        self.guard.check(&requester, Operation::Create, None)?;

        let department = self
            .catalog
            .get(&new.target_department)
            .filter(|d| d.accepts_consults())
            .ok_or_else(|| ConsultError::InvalidDepartment(new.target_department.clone()))?;

        let now = self.clock.now();
        let due_by = sla::deadline(urgency, &department, now)?;

        let consult = ConsultRequest {
            id: uuid::Uuid::new_v4().to_string(),
            requesting_department: requester.department.clone(),
            target_department: department.id.clone(),
            requester: requester.id.clone(),
            assigned_to: None,
            patient: new.patient,
            urgency,
            status: ConsultStatus::Pending,
            created_at: now,
            due_by,
            acknowledged_at: None,
            acknowledged_by: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            escalation_level: 0,
            last_escalated_at: None,
            ceiling_notified_for: None,
            note_count: 0,
            payload: new.payload,
            version: 1,
            updated_at: now,
        };

        let _guard = self.locks.acquire(&consult.id).await;
        self.commit(Commit::insert(consult.clone()))?;
        info!(
            consult_id = %consult.id,
            actor = %requester.id,
            target_department = %consult.target_department,
            %urgency,
            %due_by,
            "Consult created"
        );
        self.dispatcher
            .dispatch(ConsultEvent::ConsultCreated {
                consult: consult.clone(),
                timestamp: now,
            })
            .await;

        Ok(consult)
    }

    /// Acknowledge a PENDING consult
    ///
    /// Repeating the call as the same actor is a no-op that returns the
    /// current record and emits nothing.
    pub async fn acknowledge(&self, actor_id: &str, consult_id: &str) -> ConsultResult<ConsultRequest> {
        let actor = self.resolve_actor(actor_id)?;
        let mutated = self
            .mutate::<_, ConsultError>(consult_id, |consult, now| {
                self.guard.check(&actor, Operation::Acknowledge, Some(&*consult))?;
                apply_acknowledge(consult, &actor.id, Operation::Acknowledge, now)
            })
            .await?;

        if mutated.committed {
            info!(consult_id, actor = %actor.id, "Consult acknowledged");
        }
        Ok(mutated.consult)
    }

    /// Append a clinical note; the first note starts work on an acknowledged consult
    pub async fn add_note(
        &self,
        actor_id: &str,
        consult_id: &str,
        note: NewNote,
    ) -> ConsultResult<ConsultNote> {
        if note.content.trim().is_empty() {
            return Err(ConsultError::EmptyNote);
        }
        let actor = self.resolve_actor(actor_id)?;

        let mut created = None;
        self.mutate::<_, ConsultError>(consult_id, |consult, now| {
            self.guard.check(&actor, Operation::AddNote, Some(&*consult))?;
            match consult.status {
                ConsultStatus::Acknowledged => {
                    consult.status = ConsultStatus::InProgress;
                }
                ConsultStatus::InProgress => {}
                status => {
                    return Err(ConsultError::InvalidTransition {
                        consult_id: consult.id.clone(),
                        status,
                        operation: Operation::AddNote,
                    })
                }
            }
            consult.note_count += 1;

            let record = ConsultNote {
                id: uuid::Uuid::new_v4().to_string(),
                consult_id: consult.id.clone(),
                author: actor.id.clone(),
                note_type: note.note_type,
                content: note.content,
                created_at: now,
            };
            created = Some(record.clone());

            let for_event = record.clone();
            Ok(Some(
                Change::emit(move |consult| ConsultEvent::NoteAdded {
                    consult,
                    note: for_event,
                    timestamp: now,
                })
                .with_note(record),
            ))
        })
        .await?;

        created.ok_or_else(|| ConsultError::NotFound(consult_id.to_string()))
    }

    /// Mark an acknowledged or in-progress consult as answered
    pub async fn complete(&self, actor_id: &str, consult_id: &str) -> ConsultResult<ConsultRequest> {
        let actor = self.resolve_actor(actor_id)?;
        let mutated = self
            .mutate::<_, ConsultError>(consult_id, |consult, now| {
                self.guard.check(&actor, Operation::Complete, Some(&*consult))?;
                transition(consult, ConsultStatus::Completed, Operation::Complete)?;
                consult.completed_at = Some(now);

                let completed_by = actor.id.clone();
                Ok(Some(Change::emit(move |consult| {
                    ConsultEvent::ConsultCompleted {
                        consult,
                        completed_by,
                        timestamp: now,
                    }
                })))
            })
            .await?;

        info!(consult_id, actor = %actor.id, "Consult completed");
        Ok(mutated.consult)
    }

    /// Withdraw an open consult
    pub async fn cancel(
        &self,
        actor_id: &str,
        consult_id: &str,
        reason: Option<String>,
    ) -> ConsultResult<ConsultRequest> {
        let actor = self.resolve_actor(actor_id)?;
        let reason = reason.filter(|r| !r.trim().is_empty());
        let mutated = self
            .mutate::<_, ConsultError>(consult_id, |consult, now| {
                self.guard.check(&actor, Operation::Cancel, Some(&*consult))?;
                transition(consult, ConsultStatus::Cancelled, Operation::Cancel)?;
                consult.cancelled_at = Some(now);
                consult.cancellation_reason = reason.clone();

                let cancelled_by = actor.id.clone();
                Ok(Some(Change::emit(move |consult| {
                    ConsultEvent::ConsultCancelled {
                        consult,
                        cancelled_by,
                        reason,
                        timestamp: now,
                    }
                })))
            })
            .await?;

        info!(consult_id, actor = %actor.id, "Consult cancelled");
        Ok(mutated.consult)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, consult_id: &str) -> ConsultResult<ConsultRequest> {
        self.load(consult_id)
    }

    /// Record plus derived overdue flag and time remaining, evaluated now
    pub async fn view(&self, consult_id: &str) -> ConsultResult<ConsultView> {
        let consult = self.load(consult_id)?;
        Ok(ConsultView::at(consult, self.clock.now()))
    }

    /// Notes in creation order
    pub async fn notes(&self, consult_id: &str) -> ConsultResult<Vec<ConsultNote>> {
        self.load(consult_id)?;
        Ok(self.store.list_notes(consult_id)?)
    }

    /// Escalation and override history in creation order
    pub async fn audit_trail(&self, consult_id: &str) -> ConsultResult<Vec<AuditEntry>> {
        self.load(consult_id)?;
        Ok(self.store.list_audit(consult_id)?)
    }

    /// Consults involving `department`, earliest deadline first
    pub async fn list_for_department(
        &self,
        department: &str,
        filter: &ConsultFilter,
    ) -> ConsultResult<Vec<ConsultView>> {
        let now = self.clock.now();
        let mut views: Vec<ConsultView> = self
            .store
            .list_consults()?
            .into_iter()
            .map(|c| ConsultView::at(c, now))
            .filter(|v| filter.matches(department, v))
            .collect();
        views.sort_by(|a, b| {
            a.consult
                .due_by
                .cmp(&b.consult.due_by)
                .then_with(|| a.consult.id.cmp(&b.consult.id))
        });
        Ok(views)
    }
}

/// Move `consult` to `to` if the lifecycle table allows it
fn transition(
    consult: &mut ConsultRequest,
    to: ConsultStatus,
    operation: Operation,
) -> ConsultResult<()> {
    if !is_legal_transition(consult.status, to) {
        return Err(ConsultError::InvalidTransition {
            consult_id: consult.id.clone(),
            status: consult.status,
            operation,
        });
    }
    consult.status = to;
    Ok(())
}

/// Shared acknowledgement rules for the regular and on-behalf paths
pub(crate) fn apply_acknowledge(
    consult: &mut ConsultRequest,
    actor_id: &str,
    operation: Operation,
    now: DateTime<Utc>,
) -> ConsultResult<Option<Change>> {
    if !consult.status.is_terminal() {
        if let Some(by) = &consult.acknowledged_by {
            if by == actor_id {
                return Ok(None);
            }
            return Err(ConsultError::AlreadyAcknowledged {
                consult_id: consult.id.clone(),
                acknowledged_by: by.clone(),
            });
        }
    }

    transition(consult, ConsultStatus::Acknowledged, operation)?;
    consult.acknowledged_at = Some(now);
    consult.acknowledged_by = Some(actor_id.to_string());
    if consult.assigned_to.is_none() {
        consult.assigned_to = Some(Assignee::actor(actor_id));
    }

    let acknowledged_by = actor_id.to_string();
    Ok(Some(Change::emit(move |consult| {
        ConsultEvent::ConsultAcknowledged {
            consult,
            acknowledged_by,
            timestamp: now,
        }
    })))
}
