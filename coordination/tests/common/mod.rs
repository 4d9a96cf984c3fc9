//! Shared fixture for consult integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::broadcast;

use consult_coordination::{
    Actor, AdminOverrideService, Capability, ClinicalPayload, Commit, ConsultEvent, ConsultStore,
    Department, DepartmentCatalog, EngineConfig, EscalationScheduler, ManualClock, MemoryStore,
    NewConsult, NotificationDispatcher, Rung, SharedConsultRegistry, SlaTable, StaticDirectory,
    StoreError, StoreResult, Urgency,
};
use consult_coordination::{AuditEntry, ConsultNote, ConsultRegistry, ConsultRequest};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 16, 9, 0, 0).unwrap()
}

pub fn departments() -> Vec<Department> {
    vec![
        Department::new("emergency", "Emergency Department", "ED"),
        Department::new("cardiology", "Cardiology", "CARD")
            .with_sla(
                SlaTable::new()
                    .with(Urgency::Emergency, 30)
                    .with(Urgency::Urgent, 240)
                    .with(Urgency::Routine, 2880),
            )
            .with_hierarchy(vec![
                Rung::role("Registrar", 1),
                Rung::person("Consultant", 2, "dr-okafor"),
                Rung::person("Head of Department", 3, "dr-hale"),
            ]),
        Department::new("oncology", "Oncology", "ONC")
            .with_sla(
                SlaTable::new()
                    .with(Urgency::Urgent, 120)
                    .with(Urgency::Routine, 1440),
            )
            .with_hierarchy(vec![
                Rung::role("Registrar", 1),
                Rung::person("Head of Department", 2, "dr-chen"),
            ]),
        Department::new("neurology", "Neurology", "NEURO")
            .with_sla(SlaTable::new().with(Urgency::Urgent, 60))
            .with_hierarchy(vec![Rung::role("Consultant", 3), Rung::role("Registrar", 1)]),
    ]
}

pub fn actors() -> Vec<Actor> {
    let ack = Capability::AcknowledgeInOwnDepartment;
    let mut actors = vec![
        Actor::new("dr-er", "emergency", 1).with_capability(Capability::RequestConsults),
        Actor::new("dr-okafor", "cardiology", 2).with_capability(ack),
        Actor::new("dr-hale", "cardiology", 3).with_capability(ack),
        Actor::new("dr-chen", "oncology", 2).with_capability(ack),
        Actor::new("dr-patel", "neurology", 2).with_capability(ack),
        Actor::new("admin", "operations", 5).with_capability(Capability::ManageConsultsGlobally),
        Actor::new("bed-manager", "operations", 3).with_capability(Capability::ForceClose),
    ];
    for i in 0..32 {
        actors.push(Actor::new(format!("dr-card-{}", i), "cardiology", 1).with_capability(ack));
    }
    actors
}

/// Memory store that can be switched into an outage
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("primary unreachable".into()));
        }
        Ok(())
    }
}

impl ConsultStore for FlakyStore {
    fn commit(&self, commit: Commit) -> StoreResult<()> {
        self.check()?;
        self.inner.commit(commit)
    }

    fn get_consult(&self, id: &str) -> StoreResult<Option<ConsultRequest>> {
        self.check()?;
        self.inner.get_consult(id)
    }

    fn list_consults(&self) -> StoreResult<Vec<ConsultRequest>> {
        self.check()?;
        self.inner.list_consults()
    }

    fn list_notes(&self, consult_id: &str) -> StoreResult<Vec<ConsultNote>> {
        self.check()?;
        self.inner.list_notes(consult_id)
    }

    fn list_audit(&self, consult_id: &str) -> StoreResult<Vec<AuditEntry>> {
        self.check()?;
        self.inner.list_audit(consult_id)
    }

    fn find_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<ConsultRequest>> {
        self.check()?;
        self.inner.find_overdue(now)
    }
}

pub struct Harness {
    pub registry: SharedConsultRegistry,
    pub admin: AdminOverrideService,
    pub scheduler: Arc<EscalationScheduler>,
    pub clock: Arc<ManualClock>,
    pub catalog: Arc<DepartmentCatalog>,
    pub directory: Arc<StaticDirectory>,
    pub store: Arc<FlakyStore>,
    pub events: broadcast::Receiver<ConsultEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig {
            sweep_interval_secs: 60,
            sweep_concurrency: 4,
            record_timeout_secs: 5,
            min_escalation_interval_secs: 0,
        })
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, NotificationDispatcher::local_only())
    }

    pub fn build(config: EngineConfig, dispatcher: NotificationDispatcher) -> Self {
        let clock = ManualClock::shared(t0());
        let catalog = DepartmentCatalog::new(departments()).shared();
        let directory = Arc::new(StaticDirectory::new(actors()));
        let store = Arc::new(FlakyStore::default());
        let dispatcher = dispatcher.shared();
        let events = dispatcher.subscribe();

        let registry = ConsultRegistry::new(
            store.clone(),
            catalog.clone(),
            directory.clone(),
            dispatcher,
            clock.clone(),
        )
        .shared();

        Self {
            admin: AdminOverrideService::new(registry.clone()),
            scheduler: EscalationScheduler::new(registry.clone(), config).shared(),
            registry,
            clock,
            catalog,
            directory,
            store,
            events,
        }
    }

    /// Every event published since the last drain
    pub fn drain_events(&mut self) -> Vec<ConsultEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn drain_event_types(&mut self) -> Vec<&'static str> {
        self.drain_events().iter().map(|e| e.event_type()).collect()
    }

    pub async fn create(&self, target: &str, urgency: &str) -> ConsultRequest {
        self.registry
            .create("dr-er", new_consult(target, urgency))
            .await
            .unwrap()
    }
}

pub fn new_consult(target: &str, urgency: &str) -> NewConsult {
    NewConsult {
        target_department: target.into(),
        urgency: urgency.into(),
        patient: "mrn-4471".into(),
        payload: ClinicalPayload {
            reason: "new murmur".into(),
            question: "echo needed before surgery?".into(),
            history: "HTN, T2DM".into(),
        },
    }
}
