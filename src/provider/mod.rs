//! Queue provider trait: the transport abstraction for audit messages
//!
//! The ingestion consumer reads raw payloads from a named durable queue and
//! settles each delivery explicitly: `ack` once the record is durable,
//! `nak` to have the transport redeliver later. Backends (NATS JetStream,
//! in-memory) implement `QueueProvider` and `Subscription`.

use crate::error::Result;
use crate::types::{ConsumerOptions, DeliveryInfo};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;

pub mod memory;
pub mod nats;

/// Core trait for queue backends
///
/// The queue itself is provisioned outside the consumer; providers bind to
/// it by name.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Publish a raw payload, returning the provider-assigned sequence number
    ///
    /// `msg_id`, when set, lets providers with a deduplication window drop
    /// repeated publishes of the same message.
    async fn publish(&self, payload: Bytes, msg_id: Option<&str>) -> Result<u64>;

    /// Attach a pull subscription to the named durable consumer
    ///
    /// Several subscriptions on the same consumer name share the work:
    /// each message goes to one of them.
    async fn subscribe_durable(
        &self,
        consumer_name: &str,
        opts: &ConsumerOptions,
    ) -> Result<Box<dyn Subscription>>;

    /// Get provider info (message count, etc.)
    async fn info(&self) -> Result<ProviderInfo>;

    /// Name of the queue this provider is bound to
    fn queue_name(&self) -> &str;

    /// Provider name (e.g., "nats", "memory")
    fn name(&self) -> &str;

    /// Health check: returns true if the provider is connected and operational
    ///
    /// Default implementation delegates to `info()` and returns true if it succeeds.
    async fn health(&self) -> Result<bool> {
        self.info().await.map(|_| true)
    }
}

/// Async subscription handle for receiving deliveries
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next delivery
    ///
    /// Returns `Ok(None)` once the subscription is closed. Must be cancel
    /// safe: dropping the future before it resolves loses no message.
    async fn next(&mut self) -> Result<Option<Delivery>>;
}

type SettleFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A message pending acknowledgement
///
/// Dropping a delivery without settling it leaves the message unacknowledged;
/// the transport redelivers it.
pub struct Delivery {
    /// Raw message body (UTF-8 JSON envelope)
    pub payload: Bytes,

    /// Delivery metadata
    pub info: DeliveryInfo,

    /// Ack callback: call to confirm processing
    ack_fn: SettleFn,

    /// Nak callback: call to request redelivery
    nak_fn: SettleFn,
}

impl Delivery {
    /// Create a new delivery with ack/nak callbacks
    pub fn new(
        payload: Bytes,
        info: DeliveryInfo,
        ack_fn: impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
        nak_fn: impl FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            payload,
            info,
            ack_fn: Box::new(ack_fn),
            nak_fn: Box::new(nak_fn),
        }
    }

    /// Acknowledge: the message is consumed and will not be redelivered
    pub async fn ack(self) -> Result<()> {
        (self.ack_fn)().await
    }

    /// Negative-acknowledge: request redelivery after the transport's backoff
    pub async fn nak(self) -> Result<()> {
        (self.nak_fn)().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Provider status information
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    /// Provider name
    pub provider: String,
    /// Queue (stream) name
    pub queue: String,
    /// Messages waiting in the queue
    pub messages: u64,
    /// Total bytes used
    pub bytes: u64,
    /// Number of consumers attached
    pub consumers: usize,
}
