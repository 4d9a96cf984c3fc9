//! Administrative override tests
//!
//! Verifies:
//! - Reassignment restarts the SLA against the new department and is audited
//! - A new breach episode after reassignment is announced at the ceiling again
//! - Force-close requires the capability and a reason, and never reopens
//! - Acknowledge-on-behalf is limited to PENDING consults

mod common;

use chrono::Duration;

use common::{t0, Harness};
use consult_coordination::{
    rooms_for, Assignee, AuditAction, ConsultError, ConsultEvent, ConsultStatus, ErrorClass,
    ForceCloseAction, Reassignment, Room,
};

// ── Reassignment ────────────────────────────────────────────────────

#[tokio::test]
async fn test_reassign_to_department_restarts_sla_and_audits() {
    let mut h = Harness::new();
    let consult = h.create("cardiology", "URGENT").await;
    h.clock.advance(Duration::minutes(90));
    h.drain_events();

    let moved = h
        .admin
        .reassign(
            "admin",
            &consult.id,
            Reassignment::to_department("oncology", "Suspected cardiac metastasis"),
        )
        .await
        .unwrap();

    let now = t0() + Duration::minutes(90);
    assert_eq!(moved.target_department, "oncology");
    assert_eq!(moved.due_by, now + Duration::minutes(120));
    assert_eq!(moved.status, ConsultStatus::Pending);
    assert!(moved.assigned_to.is_none());

    let audit = h.registry.audit_trail(&consult.id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Reassign);
    assert_eq!(audit[0].actor, "admin");
    assert_eq!(audit[0].reason, "Suspected cardiac metastasis");

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ConsultEvent::ConsultReassigned {
            previous_department,
            reassigned_by,
            ..
        } => {
            assert_eq!(previous_department, "cardiology");
            assert_eq!(reassigned_by, "admin");
        }
        other => panic!("unexpected event {:?}", other.event_type()),
    }

    // Both the old and the new department hear about it
    let rooms = rooms_for(&events[0]);
    assert!(rooms.contains(&Room::Department {
        department: "cardiology".into()
    }));
    assert!(rooms.contains(&Room::Department {
        department: "oncology".into()
    }));

    // The new department can now work it, the old one cannot
    assert!(h.registry.acknowledge("dr-okafor", &consult.id).await.is_err());
    assert!(h.registry.acknowledge("dr-chen", &consult.id).await.is_ok());
}

#[tokio::test]
async fn test_reassign_to_person_keeps_department_and_deadline() {
    let h = Harness::new();
    let consult = h.create("cardiology", "URGENT").await;

    let moved = h
        .admin
        .reassign(
            "admin",
            &consult.id,
            Reassignment::to_actor("dr-hale", "Registrar off sick"),
        )
        .await
        .unwrap();
    assert_eq!(moved.target_department, "cardiology");
    assert_eq!(moved.due_by, consult.due_by);
    assert_eq!(moved.assigned_to, Some(Assignee::actor("dr-hale")));
}

#[tokio::test]
async fn test_reassign_validation_and_authorization() {
    let mut h = Harness::new();
    let consult = h.create("cardiology", "URGENT").await;
    h.drain_events();

    let cases = vec![
        (
            "admin",
            Reassignment::to_department("oncology", "   "),
            "REASON_REQUIRED",
        ),
        (
            "admin",
            Reassignment {
                reason: "tidy up".into(),
                ..Reassignment::default()
            },
            "EMPTY_REASSIGNMENT",
        ),
        (
            "admin",
            Reassignment::to_department("dermatology", "wrong team"),
            "INVALID_DEPARTMENT",
        ),
        (
            "admin",
            Reassignment::to_actor("dr-nobody", "wrong person"),
            "UNKNOWN_ACTOR",
        ),
        (
            "dr-okafor",
            Reassignment::to_department("oncology", "not mine"),
            "FORBIDDEN",
        ),
    ];

    for (actor, request, code) in cases {
        let err = h
            .admin
            .reassign(actor, &consult.id, request)
            .await
            .unwrap_err();
        assert_eq!(err.code(), code);
    }

    let unchanged = h.registry.get(&consult.id).await.unwrap();
    assert_eq!(unchanged.version, 1);
    assert!(h.registry.audit_trail(&consult.id).await.unwrap().is_empty());
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn test_reassign_to_own_department_keeps_breach() {
    let mut h = Harness::new();
    let consult = h.create("cardiology", "URGENT").await;
    h.clock.advance(Duration::minutes(300));
    let now = t0() + Duration::minutes(300);
    assert!(consult.is_overdue(now));
    h.drain_events();

    // Department alone, and it is the current one: nothing to do
    let err = h
        .admin
        .reassign(
            "admin",
            &consult.id,
            Reassignment::to_department("cardiology", "same team"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EMPTY_REASSIGNMENT");
    let unchanged = h.registry.get(&consult.id).await.unwrap();
    assert_eq!(unchanged.version, 1);
    assert_eq!(unchanged.due_by, consult.due_by);
    assert!(h.registry.audit_trail(&consult.id).await.unwrap().is_empty());
    assert!(h.drain_events().is_empty());

    // With an assignee only the assignee changes
    let moved = h
        .admin
        .reassign(
            "admin",
            &consult.id,
            Reassignment {
                new_target_department: Some("cardiology".into()),
                new_assignee: Some("dr-hale".into()),
                reason: "head of department to review".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.target_department, "cardiology");
    assert_eq!(moved.due_by, consult.due_by);
    assert!(moved.is_overdue(now));
    assert_eq!(moved.assigned_to, Some(Assignee::actor("dr-hale")));
    assert_eq!(h.registry.audit_trail(&consult.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reassignment_starts_new_ceiling_episode() {
    let mut h = Harness::new();
    let consult = h.create("oncology", "URGENT").await;

    // Oncology ladder has two rungs: one escalation reaches the ceiling
    h.clock.advance(Duration::minutes(121));
    h.scheduler.sweep().await.unwrap();
    h.clock.advance(Duration::minutes(1));
    h.scheduler.sweep().await.unwrap();
    h.clock.advance(Duration::minutes(1));
    h.scheduler.sweep().await.unwrap();

    let at_ceiling = h.registry.get(&consult.id).await.unwrap();
    assert_eq!(at_ceiling.escalation_level, 1);
    assert_eq!(at_ceiling.ceiling_notified_for, Some(at_ceiling.due_by));

    let moved = h
        .admin
        .reassign(
            "admin",
            &consult.id,
            Reassignment::to_department("cardiology", "Needs cardiology input"),
        )
        .await
        .unwrap();
    assert_eq!(moved.escalation_level, 1);
    assert!(moved.ceiling_notified_for.is_none());

    // Cardiology has one more rung above level 1
    h.clock.advance(Duration::minutes(241));
    h.scheduler.sweep().await.unwrap();
    h.clock.advance(Duration::minutes(1));
    h.scheduler.sweep().await.unwrap();
    h.clock.advance(Duration::minutes(1));
    h.scheduler.sweep().await.unwrap();

    let final_state = h.registry.get(&consult.id).await.unwrap();
    assert_eq!(final_state.escalation_level, 2);

    let ceiling_events = h
        .drain_events()
        .iter()
        .filter(|e| e.event_type() == "OVERDUE_AT_CEILING")
        .count();
    assert_eq!(ceiling_events, 2);
}

#[tokio::test]
async fn test_reassign_clamps_level_to_smaller_ladder() {
    let h = Harness::new();
    let consult = h.create("cardiology", "EMERGENCY").await;
    h.clock.advance(Duration::minutes(31));
    h.scheduler.sweep().await.unwrap();
    h.clock.advance(Duration::minutes(1));
    h.scheduler.sweep().await.unwrap();
    assert_eq!(h.registry.get(&consult.id).await.unwrap().escalation_level, 2);

    let moved = h
        .admin
        .reassign(
            "admin",
            &consult.id,
            Reassignment::to_department("oncology", "Oncology emergency"),
        )
        .await;
    // Oncology has no EMERGENCY SLA
    assert!(matches!(moved, Err(ConsultError::MissingSlaConfig { .. })));

    let h2 = Harness::new();
    let routine = h2.create("cardiology", "ROUTINE").await;
    h2.clock.advance(Duration::hours(49));
    h2.scheduler.sweep().await.unwrap();
    h2.clock.advance(Duration::minutes(1));
    h2.scheduler.sweep().await.unwrap();
    let moved = h2
        .admin
        .reassign(
            "admin",
            &routine.id,
            Reassignment::to_department("oncology", "Oncology follow-up"),
        )
        .await
        .unwrap();
    assert_eq!(moved.escalation_level, 1);
}

// ── Force close ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_force_complete_with_capability() {
    let mut h = Harness::new();
    let consult = h.create("cardiology", "URGENT").await;
    h.drain_events();

    let closed = h
        .admin
        .force_close(
            "bed-manager",
            &consult.id,
            ForceCloseAction::Complete,
            "Patient discharged",
        )
        .await
        .unwrap();
    assert_eq!(closed.status, ConsultStatus::Completed);
    assert!(closed.completed_at.is_some());

    let audit = h.registry.audit_trail(&consult.id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::ForceComplete);
    assert_eq!(h.drain_event_types(), vec!["CONSULT_FORCE_CLOSED"]);

    // Terminal stays terminal, even for overrides
    let err = h
        .admin
        .force_close("admin", &consult.id, ForceCloseAction::Cancel, "oops")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn test_force_cancel_records_reason() {
    let h = Harness::new();
    let consult = h.create("cardiology", "URGENT").await;
    h.registry.acknowledge("dr-okafor", &consult.id).await.unwrap();

    let closed = h
        .admin
        .force_close("admin", &consult.id, ForceCloseAction::Cancel, "Duplicate request")
        .await
        .unwrap();
    assert_eq!(closed.status, ConsultStatus::Cancelled);
    assert_eq!(closed.cancellation_reason.as_deref(), Some("Duplicate request"));
    assert_eq!(
        h.registry.audit_trail(&consult.id).await.unwrap()[0].action,
        AuditAction::ForceCancel
    );
}

#[tokio::test]
async fn test_force_close_denied_without_capability_or_reason() {
    let h = Harness::new();
    let consult = h.create("cardiology", "URGENT").await;

    let err = h
        .admin
        .force_close("dr-okafor", &consult.id, ForceCloseAction::Complete, "done")
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Authorization);

    let err = h
        .admin
        .force_close("bed-manager", &consult.id, ForceCloseAction::Complete, "")
        .await
        .unwrap_err();
    assert!(matches!(err, ConsultError::ReasonRequired));

    assert_eq!(
        h.registry.get(&consult.id).await.unwrap().status,
        ConsultStatus::Pending
    );
}

// ── Acknowledge on behalf ───────────────────────────────────────────

#[tokio::test]
async fn test_acknowledge_on_behalf_is_audited() {
    let mut h = Harness::new();
    let consult = h.create("cardiology", "URGENT").await;
    h.drain_events();

    let acked = h
        .admin
        .acknowledge_on_behalf("admin", &consult.id, "Registrar paged by phone")
        .await
        .unwrap();
    assert_eq!(acked.status, ConsultStatus::Acknowledged);
    assert_eq!(acked.acknowledged_by.as_deref(), Some("admin"));

    let audit = h.registry.audit_trail(&consult.id).await.unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Acknowledge);
    assert_eq!(h.drain_event_types(), vec!["CONSULT_ACKNOWLEDGED"]);

    let err = h
        .admin
        .acknowledge_on_behalf("admin", &consult.id, "again")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");

    let err = h
        .admin
        .acknowledge_on_behalf("bed-manager", &consult.id, "not allowed")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[tokio::test]
async fn test_blank_force_close_reason_leaves_no_trace() {
    let mut h = Harness::new();
    let consult = h.create("cardiology", "ROUTINE").await;
    h.drain_events();

    for reason in ["", "   "] {
        let err = h
            .admin
            .force_close("admin", &consult.id, ForceCloseAction::Cancel, reason)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "REASON_REQUIRED");
    }
    assert!(h.registry.audit_trail(&consult.id).await.unwrap().is_empty());
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn test_reassign_uses_new_department_routine_sla() {
    let h = Harness::new();
    let consult = h.create("cardiology", "ROUTINE").await;
    assert_eq!(consult.due_by, t0() + Duration::minutes(2880));

    h.clock.advance(Duration::minutes(30));
    let moved = h
        .admin
        .reassign(
            "admin",
            &consult.id,
            Reassignment::to_department("oncology", "Known oncology patient"),
        )
        .await
        .unwrap();
    assert_eq!(moved.due_by, t0() + Duration::minutes(30 + 1440));
    assert_eq!(moved.created_at, consult.created_at);
}
