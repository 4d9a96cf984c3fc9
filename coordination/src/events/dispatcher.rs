//! Notification fan-out
//!
//! The registry hands every committed event to [`NotificationDispatcher::dispatch`].
//! The dispatcher publishes it on the local [`EventBus`], resolves the rooms
//! that must hear about it, and enqueues one [`Envelope`] per room on a
//! bounded channel drained by a [`DeliveryWorker`]. Dispatch never fails the
//! caller: a full queue costs at most the enqueue timeout, after which the
//! envelope is dropped, counted, and logged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use super::bus::{EventBus, SharedEventBus};
use super::delivery::{DeliveryPolicy, DeliveryWorker, SharedDeliverySink};
use super::types::{ConsultEvent, Envelope, Room};

/// Delivery counters
#[derive(Debug, Default)]
pub struct DispatchStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl DispatchStats {
    fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Rooms that must receive `event`, duplicates collapsed, in a stable order
pub fn rooms_for(event: &ConsultEvent) -> Vec<Room> {
    let consult = event.consult();
    let mut rooms = vec![
        Room::department(consult.target_department.clone()),
        Room::department(consult.requesting_department.clone()),
    ];
    if let Some(assignee) = &consult.assigned_to {
        rooms.push(Room::from(assignee));
    }
    if let ConsultEvent::ConsultReassigned {
        previous_department,
        previous_assignee,
        ..
    } = event
    {
        rooms.push(Room::department(previous_department.clone()));
        if let Some(previous) = previous_assignee {
            rooms.push(Room::from(previous));
        }
    }

    let mut unique = Vec::with_capacity(rooms.len());
    for room in rooms {
        if !unique.contains(&room) {
            unique.push(room);
        }
    }
    unique
}

/// Shared reference to NotificationDispatcher
pub type SharedNotificationDispatcher = Arc<NotificationDispatcher>;

/// Publishes events locally and queues envelopes for delivery
pub struct NotificationDispatcher {
    bus: SharedEventBus,
    queue: Option<mpsc::Sender<Envelope>>,
    enqueue_timeout: Duration,
    stats: Arc<DispatchStats>,
}

impl NotificationDispatcher {
    /// Dispatcher that only publishes on the local bus
    pub fn local_only() -> Self {
        Self {
            bus: EventBus::new().shared(),
            queue: None,
            enqueue_timeout: Duration::ZERO,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Dispatcher feeding `sink`; the returned worker must be spawned
    pub fn with_sink(sink: SharedDeliverySink, policy: DeliveryPolicy) -> (Self, DeliveryWorker) {
        let (sender, receiver) = mpsc::channel(policy.queue_capacity.max(1));
        let stats = Arc::new(DispatchStats::default());
        let dispatcher = Self {
            bus: EventBus::new().shared(),
            queue: Some(sender),
            enqueue_timeout: policy.enqueue_timeout(),
            stats: stats.clone(),
        };
        let worker = DeliveryWorker::new(receiver, sink, policy, stats);
        (dispatcher, worker)
    }

    /// Create a shared reference to this dispatcher
    pub fn shared(self) -> SharedNotificationDispatcher {
        Arc::new(self)
    }

    pub fn bus(&self) -> &SharedEventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsultEvent> {
        self.bus.subscribe()
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Fan out one committed event
    pub async fn dispatch(&self, event: ConsultEvent) {
        let Some(queue) = &self.queue else {
            self.bus.publish(event);
            return;
        };

        for room in rooms_for(&event) {
            let envelope = Envelope::new(room, event.clone());
            let room = envelope.room.clone();
            match queue.send_timeout(envelope, self.enqueue_timeout).await {
                Ok(()) => self.stats.record_enqueued(),
                Err(e) => {
                    self.stats.record_dropped();
                    let cause = match e {
                        mpsc::error::SendTimeoutError::Timeout(_) => "queue full",
                        mpsc::error::SendTimeoutError::Closed(_) => "worker stopped",
                    };
                    warn!(
                        event_type = event.event_type(),
                        consult_id = event.consult_id(),
                        %room,
                        "Notification dropped: {}",
                        cause
                    );
                }
            }
        }

        self.bus.publish(event);
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::local_only()
    }
}
