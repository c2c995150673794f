//! NATS JetStream queue provider
//!
//! Implements `QueueProvider` over a JetStream stream used as a durable
//! work queue: a durable pull consumer with explicit acks, shared by all
//! ingestion workers.

mod client;
mod config;
mod subscriber;

pub use client::{NatsClient, StreamInfo};
pub use config::{NatsConfig, StorageType};
pub use subscriber::NatsSubscription;

use crate::error::Result;
use crate::provider::{ProviderInfo, QueueProvider, Subscription};
use crate::types::ConsumerOptions;
use async_trait::async_trait;
use bytes::Bytes;

/// NATS JetStream queue provider
///
/// Wraps `NatsClient` and implements the `QueueProvider` trait.
pub struct NatsProvider {
    client: NatsClient,
}

impl NatsProvider {
    /// Connect to NATS and bind the audit stream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = NatsClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Get the underlying NATS client for advanced usage
    pub fn client(&self) -> &NatsClient {
        &self.client
    }
}

#[async_trait]
impl QueueProvider for NatsProvider {
    async fn publish(&self, payload: Bytes, msg_id: Option<&str>) -> Result<u64> {
        self.client.publish(payload, msg_id).await
    }

    async fn subscribe_durable(
        &self,
        consumer_name: &str,
        opts: &ConsumerOptions,
    ) -> Result<Box<dyn Subscription>> {
        let sub = self.client.subscribe_durable(consumer_name, opts).await?;
        Ok(Box::new(sub))
    }

    async fn info(&self) -> Result<ProviderInfo> {
        let info = self.client.stream_info().await?;
        Ok(ProviderInfo {
            provider: "nats".to_string(),
            queue: self.client.config().stream_name.clone(),
            messages: info.messages,
            bytes: info.bytes,
            consumers: info.consumer_count,
        })
    }

    fn queue_name(&self) -> &str {
        &self.client.config().stream_name
    }

    fn name(&self) -> &str {
        "nats"
    }
}
