//! Notification dispatch for consult lifecycle events
//!
//! # Architecture
//!
//! 1. **Event Types** (`types.rs`): the nine consult events, delivery rooms,
//!    and the envelope handed to a sink.
//!
//! 2. **Event Bus** (`bus.rs`): Tokio broadcast pub/sub for in-process
//!    observers, with filtered subscriptions.
//!
//! 3. **Dispatcher** (`dispatcher.rs`): room resolution and bounded-time
//!    enqueue, called by the registry after each commit.
//!
//! 4. **Delivery** (`delivery.rs`): the `DeliverySink` contract and the worker
//!    that drains the queue with retries.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Registry   │────▶│  Dispatcher  │────▶│ bounded mpsc │────▶│DeliveryWorker│──▶ sink
//! │   (commit)   │     │ (fan-out)    │     └──────────────┘     └──────────────┘
//! └──────────────┘     └──────┬───────┘
//!                             ▼
//!                      ┌──────────────┐
//!                      │  Event Bus   │──▶ local subscribers
//!                      └──────────────┘
//! ```

pub mod bus;
pub mod delivery;
pub mod dispatcher;
pub mod types;

pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use delivery::{
    DeliveryError, DeliveryPolicy, DeliverySink, DeliveryWorker, MemorySink, SharedDeliverySink,
};
pub use dispatcher::{
    rooms_for, DispatchStats, DispatchStatsSnapshot, NotificationDispatcher,
    SharedNotificationDispatcher,
};
pub use types::{ConsultEvent, Envelope, Room};
