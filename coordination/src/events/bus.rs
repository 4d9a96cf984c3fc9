//! In-process event bus for local observers
//!
//! Tokio broadcast channel carrying every committed [`ConsultEvent`]. Slow
//! subscribers lag and lose events; the delivery queue in
//! [`dispatcher`](super::dispatcher) is the retrying path, at-least-once within its
//! [`DeliveryPolicy`](super::DeliveryPolicy) bounds.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::ConsultEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for consult events
pub struct EventBus {
    sender: broadcast::Sender<ConsultEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers; returns how many received it
    pub fn publish(&self, event: ConsultEvent) -> usize {
        let event_type = event.event_type();
        let consult_id = event.consult_id().to_string();

        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, %consult_id, receivers = count, "Event published");
                count
            }
            Err(_) => {
                debug!(event_type, %consult_id, "Event published (no receivers)");
                0
            }
        }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<ConsultEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by consult ID
    pub consult_id: Option<String>,
    /// Filter by department (target or requesting)
    pub department: Option<String>,
    /// Filter by event types
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consult(mut self, consult_id: &str) -> Self {
        self.consult_id = Some(consult_id.to_string());
        self
    }

    pub fn department(mut self, department: &str) -> Self {
        self.department = Some(department.to_string());
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &ConsultEvent) -> bool {
        let consult = event.consult();

        if let Some(ref id) = self.consult_id {
            if consult.id != *id {
                return false;
            }
        }

        if let Some(ref department) = self.department {
            let involved = consult.target_department == *department
                || consult.requesting_department == *department
                || matches!(
                    event,
                    ConsultEvent::ConsultReassigned { previous_department, .. }
                        if previous_department == department
                );
            if !involved {
                return false;
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<ConsultEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<ConsultEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<ConsultEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consult::{ClinicalPayload, ConsultRequest, ConsultStatus, Urgency};
    use chrono::Utc;

    fn consult(id: &str, target: &str) -> ConsultRequest {
        let now = Utc::now();
        ConsultRequest {
            id: id.into(),
            requesting_department: "emergency".into(),
            target_department: target.into(),
            requester: "dr-a".into(),
            assigned_to: None,
            patient: "p".into(),
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

    fn created(id: &str, target: &str) -> ConsultEvent {
        ConsultEvent::ConsultCreated {
            consult: consult(id, target),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        assert_eq!(bus.publish(created("c-1", "cardiology")), 1);

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "CONSULT_CREATED");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        assert!(!bus.has_subscribers());
        assert_eq!(bus.publish(created("c-1", "cardiology")), 0);
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .department("cardiology")
            .types(vec!["CONSULT_CREATED", "CONSULT_COMPLETED"]);

        let matching = created("c-1", "cardiology");
        let other_department = created("c-2", "oncology");
        let other_type = ConsultEvent::ConsultCompleted {
            consult: consult("c-3", "oncology"),
            completed_by: "dr-b".into(),
            timestamp: Utc::now(),
        };
        let requesting_side = ConsultEvent::ConsultCompleted {
            consult: {
                let mut c = consult("c-4", "oncology");
                c.requesting_department = "cardiology".into();
                c
            },
            completed_by: "dr-b".into(),
            timestamp: Utc::now(),
        };

        assert!(filter.matches(&matching));
        assert!(!filter.matches(&other_department));
        assert!(!filter.matches(&other_type));
        assert!(filter.matches(&requesting_side));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new().shared();
        let mut filtered = bus.subscribe_filtered(EventFilter::new().consult("target"));

        let publisher = bus.clone();
        tokio::spawn(async move {
            publisher.publish(created("other", "cardiology"));
            publisher.publish(created("target", "cardiology"));
        });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.consult_id(), "target");
    }
}
