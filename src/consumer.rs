//! Ingestion consumer: decode, validate, persist, then settle
//!
//! Each delivery moves through
//! `Received → Deserialized → Validated → Persisted → Acknowledged`.
//! Content failures (malformed envelope, invalid `details`, conflicting
//! duplicate) are permanent: the message is acknowledged, abandoned and
//! dead-lettered. Storage failures are transient: the message is nak'd and
//! the transport redelivers it with its own backoff. Nothing here retries
//! in-process.

use crate::codec::EnvelopeDecoder;
use crate::dlq::{should_dead_letter, DeadLetter, DlqHandler};
use crate::error::AuditError;
use crate::provider::{Delivery, Subscription};
use crate::store::{AuditStore, UpsertOutcome};
use crate::types::{AuditEvent, DeliveryInfo};
use crate::validator::DetailsValidator;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RECEIVE_RETRY_INITIAL: Duration = Duration::from_millis(500);
const RECEIVE_RETRY_MAX: Duration = Duration::from_secs(30);

/// Processing state of a single message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Received,
    Deserialized,
    Validated,
    Persisted,
    Acknowledged,
    Abandoned,
}

/// What the transport should do with a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Consume the message; it will not be redelivered
    Ack,
    /// Leave it unconsumed so the transport redelivers it
    Retry,
}

/// Result of handling one message
#[derive(Debug)]
pub enum IngestOutcome {
    /// A new record was written
    Persisted { event_id: String, event_type: String },

    /// An identical record was already stored
    Duplicate { event_id: String, event_type: String },

    /// The message can never be stored; it is acknowledged and dropped
    Abandoned {
        event_id: Option<String>,
        error: AuditError,
    },

    /// Storage failed transiently; the message must be redelivered
    Retry { event_id: String, error: AuditError },
}

impl IngestOutcome {
    /// Ack decision for this outcome
    pub fn disposition(&self) -> Disposition {
        match self {
            IngestOutcome::Retry { .. } => Disposition::Retry,
            _ => Disposition::Ack,
        }
    }

    /// State the message reached before settlement
    pub fn state(&self) -> IngestState {
        match self {
            IngestOutcome::Persisted { .. } | IngestOutcome::Duplicate { .. } => {
                IngestState::Persisted
            }
            IngestOutcome::Abandoned { .. } => IngestState::Abandoned,
            IngestOutcome::Retry { .. } => IngestState::Validated,
        }
    }

    /// Event id, when the envelope could be decoded
    pub fn event_id(&self) -> Option<&str> {
        match self {
            IngestOutcome::Persisted { event_id, .. }
            | IngestOutcome::Duplicate { event_id, .. }
            | IngestOutcome::Retry { event_id, .. } => Some(event_id),
            IngestOutcome::Abandoned { event_id, .. } => event_id.as_deref(),
        }
    }
}

/// Counters shared by all workers of a consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    persisted: AtomicU64,
    duplicates: AtomicU64,
    abandoned: AtomicU64,
    retried: AtomicU64,
    settle_failures: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub persisted: u64,
    pub duplicates: u64,
    pub abandoned: u64,
    pub retried: u64,
    pub settle_failures: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &IngestOutcome) {
        let counter = match outcome {
            IngestOutcome::Persisted { .. } => &self.persisted,
            IngestOutcome::Duplicate { .. } => &self.duplicates,
            IngestOutcome::Abandoned { .. } => &self.abandoned,
            IngestOutcome::Retry { .. } => &self.retried,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Orchestrates the ingestion of audit messages
///
/// Clones share the store, the dead letter sink and the statistics; give one
/// clone to each worker.
#[derive(Clone)]
pub struct IngestionConsumer {
    store: Arc<dyn AuditStore>,
    decoder: EnvelopeDecoder,
    validator: DetailsValidator,
    dlq: Option<Arc<dyn DlqHandler>>,
    max_deliver: u64,
    stats: Arc<ConsumerStats>,
}

impl IngestionConsumer {
    /// Create a consumer writing to `store`
    pub fn new(
        store: Arc<dyn AuditStore>,
        decoder: EnvelopeDecoder,
        validator: DetailsValidator,
    ) -> Self {
        Self {
            store,
            decoder,
            validator,
            dlq: None,
            max_deliver: 0,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    /// Send abandoned messages to a dead letter sink
    pub fn with_dlq(mut self, dlq: Arc<dyn DlqHandler>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    /// Delivery limit of the transport (0 = unlimited); a transient failure on
    /// the last attempt is dead-lettered
    pub fn with_max_deliver(mut self, max_deliver: u64) -> Self {
        self.max_deliver = max_deliver;
        self
    }

    /// Shared statistics
    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Handle a raw payload without a transport
    ///
    /// Returns the decision; the caller settles the message.
    pub async fn handle_message(&self, payload: &[u8]) -> IngestOutcome {
        self.handle(payload, None).await
    }

    /// Handle one delivery, then ack or nak it
    ///
    /// Settlement failures are logged and counted; the transport redelivers
    /// anything that was not acknowledged.
    pub async fn process(&self, delivery: Delivery) -> IngestOutcome {
        let outcome = self.handle(&delivery.payload, Some(&delivery.info)).await;
        let sequence = delivery.info.sequence;

        let settled = match outcome.disposition() {
            Disposition::Ack => delivery.ack().await,
            Disposition::Retry => delivery.nak().await,
        };

        match settled {
            Ok(()) if outcome.disposition() == Disposition::Ack => {
                tracing::debug!(
                    sequence,
                    event_id = outcome.event_id().unwrap_or("-"),
                    state = ?IngestState::Acknowledged,
                    "Message acknowledged"
                );
            }
            Ok(()) => {}
            Err(e) => {
                self.stats.settle_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    sequence,
                    event_id = outcome.event_id().unwrap_or("-"),
                    disposition = ?outcome.disposition(),
                    error = %e,
                    "Failed to settle message"
                );
            }
        }

        outcome
    }

    /// Consume deliveries until the subscription ends or `shutdown` resolves
    ///
    /// Shutdown is observed between messages only: a message being processed
    /// is always settled first.
    pub async fn run<F>(&self, mut subscription: Box<dyn Subscription>, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut retry_delay = RECEIVE_RETRY_INITIAL;

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Consumer stopping on shutdown");
                    break;
                }
                next = subscription.next() => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    retry_delay = RECEIVE_RETRY_INITIAL;
                    self.process(delivery).await;
                }
                Ok(None) => {
                    tracing::info!("Subscription closed, consumer stopping");
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = retry_delay.as_millis() as u64,
                        "Failed to receive message"
                    );
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(retry_delay) => {}
                    }
                    retry_delay = (retry_delay * 2).min(RECEIVE_RETRY_MAX);
                }
            }
        }
    }

    async fn handle(&self, payload: &[u8], info: Option<&DeliveryInfo>) -> IngestOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let sequence = info.map(|i| i.sequence);
        tracing::trace!(sequence, bytes = payload.len(), state = ?IngestState::Received, "Message received");

        let outcome = self.ingest(payload, info).await;
        self.stats.record(&outcome);
        outcome
    }

    async fn ingest(&self, payload: &[u8], info: Option<&DeliveryInfo>) -> IngestOutcome {
        let sequence = info.map(|i| i.sequence);

        let message = match self.decoder.decode(payload) {
            Ok(message) => message,
            Err(error) => {
                tracing::error!(
                    sequence,
                    payload = %String::from_utf8_lossy(payload),
                    error = %error,
                    "Abandoning malformed audit message"
                );
                self.dead_letter(DeadLetter::new(payload, error.to_string()).with_delivery(info))
                    .await;
                return IngestOutcome::Abandoned {
                    event_id: None,
                    error,
                };
            }
        };

        let record = AuditEvent::from(message);
        let event_id = record.event_id.clone();
        let event_type = record.event_type.clone();
        tracing::trace!(%event_id, state = ?IngestState::Deserialized, "Envelope decoded");

        // check_record logs the offending payload with the event identity
        if let Err(error) = self.validator.check_record(&record) {
            return self
                .abandon(payload, info, &event_id, &event_type, error)
                .await;
        }
        tracing::trace!(%event_id, state = ?IngestState::Validated, "Details validated");

        match self.store.upsert_if_absent(&record).await {
            Ok(UpsertOutcome::Inserted) => {
                tracing::info!(
                    %event_id,
                    %event_type,
                    sequence,
                    "Audit event persisted"
                );
                IngestOutcome::Persisted {
                    event_id,
                    event_type,
                }
            }
            Ok(UpsertOutcome::AlreadyExists) => {
                tracing::info!(
                    %event_id,
                    %event_type,
                    sequence,
                    "Duplicate delivery, audit event already stored"
                );
                IngestOutcome::Duplicate {
                    event_id,
                    event_type,
                }
            }
            Ok(UpsertOutcome::Conflicting) => {
                tracing::error!(
                    %event_id,
                    %event_type,
                    sequence,
                    "Event id reused with different content, stored record kept"
                );
                let error = AuditError::ConflictingDuplicate {
                    event_id: event_id.clone(),
                };
                self.abandon(payload, info, &event_id, &event_type, error)
                    .await
            }
            Err(error) if error.is_transient() => {
                tracing::warn!(
                    %event_id,
                    %event_type,
                    sequence,
                    num_delivered = info.map(|i| i.num_delivered),
                    error = %error,
                    "Storage unavailable, message will be redelivered"
                );
                if info.is_some_and(|i| should_dead_letter(i, self.max_deliver)) {
                    let letter = DeadLetter::new(
                        payload,
                        format!("Retry budget exhausted: {}", error),
                    )
                    .with_event(&event_id, &event_type)
                    .with_delivery(info);
                    self.dead_letter(letter).await;
                }
                IngestOutcome::Retry { event_id, error }
            }
            Err(error) => {
                tracing::error!(
                    %event_id,
                    %event_type,
                    sequence,
                    error = %error,
                    "Store rejected audit event"
                );
                self.abandon(payload, info, &event_id, &event_type, error)
                    .await
            }
        }
    }

    async fn abandon(
        &self,
        payload: &[u8],
        info: Option<&DeliveryInfo>,
        event_id: &str,
        event_type: &str,
        error: AuditError,
    ) -> IngestOutcome {
        let letter = DeadLetter::new(payload, error.to_string())
            .with_event(event_id, event_type)
            .with_delivery(info);
        self.dead_letter(letter).await;

        IngestOutcome::Abandoned {
            event_id: Some(event_id.to_string()),
            error,
        }
    }

    async fn dead_letter(&self, letter: DeadLetter) {
        let Some(dlq) = &self.dlq else {
            return;
        };
        if let Err(e) = dlq.handle(letter).await {
            tracing::error!(error = %e, "Failed to dead-letter message");
        }
    }
}
