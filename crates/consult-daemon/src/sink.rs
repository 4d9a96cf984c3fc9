//! Delivery sink that writes envelopes to the log
//!
//! Stands in for a push or websocket gateway: each envelope becomes one
//! structured `info` line carrying the room and the JSON payload.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use consult_coordination::{DeliveryError, DeliverySink, Envelope};
use tracing::info;

#[derive(Debug, Default)]
pub struct LogSink {
    delivered: AtomicU64,
}

impl LogSink {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DeliverySink for LogSink {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        let payload = serde_json::to_string(&envelope.payload)
            .map_err(|e| DeliveryError::Rejected(e.to_string()))?;
        info!(
            target: "consult_daemon::delivery",
            room = %envelope.room,
            event_type = %envelope.event_type,
            consult_id = envelope.consult_id(),
            %payload,
            "Notification"
        );
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
