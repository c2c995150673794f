//! JetStream pull subscription yielding settleable deliveries

use crate::error::{AuditError, Result};
use crate::provider::{Delivery, Subscription};
use crate::types::DeliveryInfo;
use async_nats::jetstream::{self, consumer::pull, AckKind};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

/// Subscription over a durable JetStream pull consumer
pub struct NatsSubscription {
    messages: pull::Stream,
    stream_name: String,
    nak_delay: Option<Duration>,
}

impl NatsSubscription {
    pub(crate) fn new(messages: pull::Stream, stream_name: String, nak_delay: Option<Duration>) -> Self {
        Self {
            messages,
            stream_name,
            nak_delay,
        }
    }

    fn wrap(&self, msg: jetstream::Message) -> Delivery {
        let (sequence, num_delivered) = match msg.info() {
            Ok(info) => (info.stream_sequence, info.delivered.max(1) as u64),
            Err(e) => {
                tracing::warn!(error = %e, "Message without JetStream metadata");
                (0, 1)
            }
        };

        let payload = msg.message.payload.clone();
        let info = DeliveryInfo {
            sequence,
            num_delivered,
            queue: self.stream_name.clone(),
        };

        let msg = Arc::new(msg);
        let ack_msg = Arc::clone(&msg);
        let nak_delay = self.nak_delay;

        Delivery::new(
            payload,
            info,
            move || {
                Box::pin(async move {
                    ack_msg
                        .double_ack()
                        .await
                        .map_err(|e| AuditError::Ack(e.to_string()))
                })
            },
            move || {
                Box::pin(async move {
                    msg.ack_with(AckKind::Nak(nak_delay))
                        .await
                        .map_err(|e| AuditError::Ack(format!("nak failed: {}", e)))
                })
            },
        )
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        match self.messages.next().await {
            Some(Ok(msg)) => Ok(Some(self.wrap(msg))),
            Some(Err(e)) => Err(AuditError::Consumer(format!(
                "Failed to receive from '{}': {}",
                self.stream_name, e
            ))),
            None => Ok(None),
        }
    }
}
