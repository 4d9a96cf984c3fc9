//! Delivery handoff: sink contract, retry policy, and the queue-draining worker

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::DispatchStats;
use super::types::Envelope;
use crate::config::env_or;

/// Why a sink refused an envelope
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("Delivery channel unavailable: {0}")]
    Unavailable(String),

    #[error("Envelope rejected: {0}")]
    Rejected(String),
}

/// Downstream delivery collaborator (push, pager, websocket gateway, ...)
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError>;
}

/// Shared reference to a delivery sink
pub type SharedDeliverySink = Arc<dyn DeliverySink>;

/// Queue sizing and handoff retry settings
///
/// Delivery is at-least-once only within these bounds. An envelope is
/// dropped when the queue stays full past `enqueue_timeout_ms`, or when the
/// sink fails `max_attempts` times in a row. Both cases are counted in
/// [`DispatchStats`](super::DispatchStats) and logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryPolicy {
    /// Bounded queue length between dispatcher and worker
    pub queue_capacity: usize,
    /// How long a mutation may wait for queue space before the envelope is dropped
    pub enqueue_timeout_ms: u64,
    /// Per-attempt deadline for `DeliverySink::deliver`
    pub handoff_timeout_ms: u64,
    /// Attempts per envelope, including the first
    pub max_attempts: u32,
    /// Base backoff between attempts (multiplied by attempt number)
    pub retry_backoff_ms: u64,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            queue_capacity: env_or("CONSULT_DELIVERY_QUEUE_CAPACITY", 1024),
            enqueue_timeout_ms: env_or("CONSULT_DELIVERY_ENQUEUE_TIMEOUT_MS", 250),
            handoff_timeout_ms: env_or("CONSULT_DELIVERY_HANDOFF_TIMEOUT_MS", 5_000),
            max_attempts: env_or("CONSULT_DELIVERY_MAX_ATTEMPTS", 3),
            retry_backoff_ms: env_or("CONSULT_DELIVERY_RETRY_BACKOFF_MS", 200),
        }
    }
}

impl DeliveryPolicy {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Drains the delivery queue into a [`DeliverySink`]
pub struct DeliveryWorker {
    receiver: mpsc::Receiver<Envelope>,
    sink: SharedDeliverySink,
    policy: DeliveryPolicy,
    stats: Arc<DispatchStats>,
}

impl DeliveryWorker {
    pub(crate) fn new(
        receiver: mpsc::Receiver<Envelope>,
        sink: SharedDeliverySink,
        policy: DeliveryPolicy,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            receiver,
            sink,
            policy,
            stats,
        }
    }

    /// Run until cancelled or every dispatcher handle is dropped
    ///
    /// On cancellation, envelopes already queued are still handed off.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Delivery worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.receiver.close();
                    while let Some(envelope) = self.receiver.recv().await {
                        self.handoff(envelope).await;
                    }
                    break;
                }
                next = self.receiver.recv() => match next {
                    Some(envelope) => self.handoff(envelope).await,
                    None => break,
                },
            }
        }
        info!("Delivery worker stopped");
    }

    /// Deliver one envelope with per-attempt timeout and bounded retries
    async fn handoff(&self, envelope: Envelope) {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            let outcome =
                tokio::time::timeout(self.policy.handoff_timeout(), self.sink.deliver(&envelope))
                    .await;

            let reason = match outcome {
                Ok(Ok(())) => {
                    self.stats.record_delivered();
                    debug!(
                        event_type = %envelope.event_type,
                        room = %envelope.room,
                        consult_id = envelope.consult_id(),
                        attempt,
                        "Envelope delivered"
                    );
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "handoff timed out".to_string(),
            };

            warn!(
                event_type = %envelope.event_type,
                room = %envelope.room,
                consult_id = envelope.consult_id(),
                attempt,
                max_attempts = attempts,
                "Delivery attempt failed: {}",
                reason
            );

            if attempt < attempts {
                tokio::time::sleep(self.policy.retry_backoff() * attempt).await;
            }
        }

        self.stats.record_failed();
    }
}

/// Sink that keeps every envelope in memory
#[derive(Default)]
pub struct MemorySink {
    envelopes: Mutex<Vec<Envelope>>,
    fail_remaining: Mutex<u32>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose first `failures` deliveries are refused
    pub fn failing_first(failures: u32) -> Self {
        Self {
            envelopes: Mutex::new(Vec::new()),
            fail_remaining: Mutex::new(failures),
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Copy of every envelope received so far
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.envelopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Envelopes for one consult, in delivery order
    pub fn for_consult(&self, consult_id: &str) -> Vec<Envelope> {
        self.envelopes()
            .into_iter()
            .filter(|e| e.consult_id() == consult_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.envelopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeliverySink for MemorySink {
    async fn deliver(&self, envelope: &Envelope) -> Result<(), DeliveryError> {
        {
            let mut remaining = self.fail_remaining.lock().unwrap_or_else(|e| e.into_inner());
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DeliveryError::Unavailable("simulated outage".into()));
            }
        }
        self.envelopes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(envelope.clone());
        Ok(())
    }
}
