//! Escalation sweep
//!
//! Each tick: refresh the department catalog if its file changed, pin one
//! snapshot, fetch overdue consults, and run the ladder for each one under
//! its consult lock. Per-record configuration problems are logged and
//! counted; a store outage halts the sweep.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ladder::{decide, EscalationError, HoldReason, LadderDecision};
use super::SYSTEM_ACTOR;
use crate::config::EngineConfig;
use crate::consult::registry::Change;
use crate::consult::{AuditAction, AuditEntry, ConsultId, ConsultRequest, SharedConsultRegistry};
use crate::department::DepartmentSnapshot;
use crate::events::ConsultEvent;
use crate::sla;
use crate::state::StoreError;

/// Why a sweep stopped early
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Overdue query failed: {0}")]
    Query(#[source] StoreError),

    #[error("Store failed while escalating {consult_id}: {source}")]
    Store {
        consult_id: ConsultId,
        #[source]
        source: EscalationError,
    },
}

/// Counters for one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Overdue candidates returned by the store (after de-duplication)
    pub scanned: usize,
    pub escalated: usize,
    pub ceiling_notified: usize,
    /// Held by cooldown or ceiling already announced, or no longer eligible
    pub skipped: usize,
    /// Configuration errors and timeouts; retried next tick
    pub failed: usize,
}

/// What happened to one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
enum StepOutcome {
    Escalated,
    CeilingNotified,
    Held(HoldReason),
    /// Closed, acknowledged into work, re-timed, or escalated by someone else since the query
    Stale,
}

impl SweepReport {
    fn record(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Escalated => self.escalated += 1,
            StepOutcome::CeilingNotified => self.ceiling_notified += 1,
            StepOutcome::Held(_) | StepOutcome::Stale => self.skipped += 1,
        }
    }
}

/// Shared reference to EscalationScheduler
pub type SharedEscalationScheduler = Arc<EscalationScheduler>;

/// Periodic SLA breach escalation
pub struct EscalationScheduler {
    registry: SharedConsultRegistry,
    config: EngineConfig,
}

impl EscalationScheduler {
    pub fn new(registry: SharedConsultRegistry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Create a shared reference to this scheduler
    pub fn shared(self) -> SharedEscalationScheduler {
        Arc::new(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one sweep to completion
    pub async fn sweep(&self) -> Result<SweepReport, SweepError> {
        let catalog = self.registry.catalog();
        match catalog.refresh_if_changed() {
            Ok(true) => info!("Department catalog reloaded before sweep"),
            Ok(false) => {}
            Err(e) => warn!("Department catalog reload failed, keeping previous: {}", e),
        }
        let snapshot = catalog.snapshot();

        let now = self.registry.clock().now();
        let overdue = self
            .registry
            .store()
            .find_overdue(now)
            .map_err(SweepError::Query)?;

        let mut seen = HashSet::new();
        let candidates: Vec<ConsultRequest> = overdue
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .collect();

        let mut report = SweepReport {
            scanned: candidates.len(),
            ..SweepReport::default()
        };
        if candidates.is_empty() {
            debug!("Sweep found no overdue consults");
            return Ok(report);
        }

        let record_timeout = self.config.record_timeout();
        let snapshot = &snapshot;
        let mut results = stream::iter(candidates.into_iter().map(|candidate| async move {
            let consult_id = candidate.id.clone();
            let outcome =
                tokio::time::timeout(record_timeout, self.escalate_one(&candidate, snapshot)).await;
            (consult_id, outcome)
        }))
        .buffer_unordered(self.config.sweep_concurrency.max(1));

        while let Some((consult_id, outcome)) = results.next().await {
            match outcome {
                Ok(Ok(step)) => report.record(&step),
                Ok(Err(e)) if e.is_systemic() => {
                    error!(%consult_id, "Sweep halted: {}", e);
                    return Err(SweepError::Store {
                        consult_id,
                        source: e,
                    });
                }
                Ok(Err(e)) => {
                    warn!(%consult_id, "Escalation failed: {}", e);
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(%consult_id, "{}", EscalationError::Timeout(consult_id.clone()));
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            escalated = report.escalated,
            ceiling_notified = report.ceiling_notified,
            skipped = report.skipped,
            failed = report.failed,
            generation = snapshot.generation(),
            "Escalation sweep finished"
        );
        Ok(report)
    }

    /// Re-validate one candidate under its lock and apply the ladder decision
    async fn escalate_one(
        &self,
        candidate: &ConsultRequest,
        snapshot: &DepartmentSnapshot,
    ) -> Result<StepOutcome, EscalationError> {
        let expected_level = candidate.escalation_level;
        let min_interval = self.config.min_escalation_interval();
        let mut outcome = StepOutcome::Stale;

        self.registry
            .mutate::<_, EscalationError>(&candidate.id, |consult, now| {
                if !consult.status.is_escalation_eligible()
                    || !sla::is_overdue(consult, now)
                    || consult.escalation_level != expected_level
                {
                    return Ok(None);
                }

                let department = snapshot.get(&consult.target_department);
                match decide(consult, department, now, min_interval)? {
                    LadderDecision::Escalate {
                        from_level,
                        to_level,
                        assignee,
                        rung_title,
                    } => {
                        consult.escalation_level = to_level;
                        consult.assigned_to = Some(assignee.clone());
                        consult.last_escalated_at = Some(now);
                        outcome = StepOutcome::Escalated;

                        let audit = AuditEntry::new(
                            SYSTEM_ACTOR,
                            consult.id.clone(),
                            AuditAction::Escalate,
                            format!(
                                "SLA breached at {}; escalated to {} (level {})",
                                consult.due_by, rung_title, to_level
                            ),
                            now,
                        );
                        info!(
                            consult_id = %consult.id,
                            from_level,
                            to_level,
                            assignee = %assignee,
                            "Consult escalated"
                        );
                        Ok(Some(
                            Change::emit(move |consult| ConsultEvent::ConsultEscalated {
                                consult,
                                from_level,
                                to_level,
                                new_assignee: assignee,
                                timestamp: now,
                            })
                            .with_audit(audit),
                        ))
                    }
                    LadderDecision::NotifyCeiling { level } => {
                        consult.ceiling_notified_for = Some(consult.due_by);
                        outcome = StepOutcome::CeilingNotified;
                        warn!(
                            consult_id = %consult.id,
                            level,
                            "Consult overdue at top of hierarchy"
                        );
                        Ok(Some(Change::emit(move |consult| {
                            ConsultEvent::OverdueAtCeiling {
                                consult,
                                level,
                                timestamp: now,
                            }
                        })))
                    }
                    LadderDecision::Hold(reason) => {
                        debug!(consult_id = %consult.id, ?reason, "Escalation held");
                        outcome = StepOutcome::Held(reason);
                        Ok(None)
                    }
                }
            })
            .await?;

        Ok(outcome)
    }

    /// Sweep every `sweep_interval` until cancelled
    ///
    /// Each sweep runs as its own task so a slow sweep never delays the next
    /// tick. In-flight sweeps are awaited before returning.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inflight = JoinSet::new();

        info!(
            interval_secs = self.config.sweep_interval().as_secs(),
            concurrency = self.config.sweep_concurrency,
            "Escalation scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    while inflight.try_join_next().is_some() {}
                    let scheduler = self.clone();
                    inflight.spawn(async move {
                        if let Err(e) = scheduler.sweep().await {
                            error!("Escalation sweep failed: {}", e);
                        }
                    });
                }
            }
        }

        while inflight.join_next().await.is_some() {}
        info!("Escalation scheduler stopped");
    }
}
