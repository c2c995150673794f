//! In-memory queue provider for tests and embedding in one process
//!
//! A work queue with competing consumers and explicit settlement. A message
//! handed to a subscriber stays leased until it is acked; a nak, or dropping
//! the delivery unsettled, puts it back at the tail of the queue with its
//! delivery count preserved. Messages are lost on process exit.

use super::{Delivery, ProviderInfo, QueueProvider, Subscription};
use crate::error::{AuditError, Result};
use crate::types::{ConsumerOptions, DeliveryInfo};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Configuration for the in-memory provider
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Queue name reported in delivery metadata
    pub queue_name: String,

    /// Maximum messages waiting in the queue (0 = unlimited)
    pub max_messages: usize,

    /// Delay before a nak'd message becomes visible again
    pub redelivery_delay: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            queue_name: "audit_events_queue".to_string(),
            max_messages: 100_000,
            redelivery_delay: Duration::ZERO,
        }
    }
}

/// Point-in-time counters of the in-memory queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryQueueStats {
    /// Waiting for a subscriber
    pub ready: usize,
    /// Leased to a subscriber, not yet settled
    pub in_flight: usize,
    /// Acknowledged
    pub acked: u64,
    /// Dropped after exceeding `max_deliver`
    pub dropped: u64,
}

struct Queued {
    payload: Bytes,
    sequence: u64,
    num_delivered: u64,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Queued>,
    in_flight: usize,
    acked: u64,
    dropped: u64,
    consumers: HashSet<String>,
    closed: bool,
}

struct QueueInner {
    config: MemoryConfig,
    state: Mutex<QueueState>,
    notify: Notify,
    sequence: AtomicU64,
}

enum Settlement {
    Ack,
    Nak,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn requeue(&self, msg: Queued) {
        self.lock().ready.push_back(msg);
        self.notify.notify_waiters();
    }

    fn finish(self: &Arc<Self>, msg: Queued, settlement: Settlement, max_deliver: Option<u64>) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);

            match settlement {
                Settlement::Ack => {
                    state.acked += 1;
                    return;
                }
                Settlement::Nak => {
                    if max_deliver.is_some_and(|max| msg.num_delivered >= max) {
                        state.dropped += 1;
                        tracing::warn!(
                            sequence = msg.sequence,
                            num_delivered = msg.num_delivered,
                            "Message exceeded max deliveries, dropping"
                        );
                        return;
                    }
                }
            }
        }

        let delay = self.config.redelivery_delay;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) if !delay.is_zero() => {
                let queue = Arc::clone(self);
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.requeue(msg);
                });
            }
            _ => self.requeue(msg),
        }
    }
}

/// In-memory `QueueProvider`
///
/// Clones share the same queue.
#[derive(Clone)]
pub struct MemoryProvider {
    inner: Arc<QueueInner>,
}

impl MemoryProvider {
    /// Create a provider with the given configuration
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Close the queue: subscriptions end once the queue drains
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.inner.notify.notify_waiters();
    }

    /// Current queue counters
    pub fn stats(&self) -> MemoryQueueStats {
        let state = self.inner.lock();
        MemoryQueueStats {
            ready: state.ready.len(),
            in_flight: state.in_flight,
            acked: state.acked,
            dropped: state.dropped,
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

#[async_trait]
impl QueueProvider for MemoryProvider {
    async fn publish(&self, payload: Bytes, _msg_id: Option<&str>) -> Result<u64> {
        let sequence = {
            let mut state = self.inner.lock();
            let max = self.inner.config.max_messages;
            if state.closed || (max > 0 && state.ready.len() >= max) {
                return Err(AuditError::Publish {
                    subject: self.inner.config.queue_name.clone(),
                    reason: if state.closed {
                        "queue closed".to_string()
                    } else {
                        format!("queue full ({} messages)", max)
                    },
                });
            }
            let sequence = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            state.ready.push_back(Queued {
                payload,
                sequence,
                num_delivered: 0,
            });
            sequence
        };
        self.inner.notify.notify_waiters();
        Ok(sequence)
    }

    async fn subscribe_durable(
        &self,
        consumer_name: &str,
        opts: &ConsumerOptions,
    ) -> Result<Box<dyn Subscription>> {
        self.inner.lock().consumers.insert(consumer_name.to_string());
        Ok(Box::new(MemorySubscription {
            queue: Arc::clone(&self.inner),
            max_deliver: opts.max_deliver.filter(|m| *m > 0).map(|m| m as u64),
        }))
    }

    async fn info(&self) -> Result<ProviderInfo> {
        let state = self.inner.lock();
        Ok(ProviderInfo {
            provider: "memory".to_string(),
            queue: self.inner.config.queue_name.clone(),
            messages: state.ready.len() as u64,
            bytes: state.ready.iter().map(|m| m.payload.len() as u64).sum(),
            consumers: state.consumers.len(),
        })
    }

    fn queue_name(&self) -> &str {
        &self.inner.config.queue_name
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Subscription on the in-memory queue
pub struct MemorySubscription {
    queue: Arc<QueueInner>,
    max_deliver: Option<u64>,
}

impl MemorySubscription {
    fn try_take(&self) -> Option<std::result::Result<Queued, ()>> {
        let mut state = self.queue.lock();
        match state.ready.pop_front() {
            Some(mut msg) => {
                msg.num_delivered += 1;
                state.in_flight += 1;
                Some(Ok(msg))
            }
            None if state.closed => Some(Err(())),
            None => None,
        }
    }

    fn lease(&self, msg: Queued) -> Delivery {
        let payload = msg.payload.clone();
        let info = DeliveryInfo {
            sequence: msg.sequence,
            num_delivered: msg.num_delivered,
            queue: self.queue.config.queue_name.clone(),
        };
        let lease = Arc::new(Lease {
            queue: Arc::clone(&self.queue),
            msg: Mutex::new(Some(msg)),
            max_deliver: self.max_deliver,
        });
        let ack_lease = Arc::clone(&lease);

        Delivery::new(
            payload,
            info,
            move || {
                Box::pin(async move {
                    ack_lease.settle(Settlement::Ack);
                    Ok(())
                })
            },
            move || {
                Box::pin(async move {
                    lease.settle(Settlement::Nak);
                    Ok(())
                })
            },
        )
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_take() {
                Some(Ok(msg)) => return Ok(Some(self.lease(msg))),
                Some(Err(())) => return Ok(None),
                None => notified.await,
            }
        }
    }
}

/// A leased message; settles as nak when dropped unsettled
struct Lease {
    queue: Arc<QueueInner>,
    msg: Mutex<Option<Queued>>,
    max_deliver: Option<u64>,
}

impl Lease {
    fn settle(&self, settlement: Settlement) {
        let msg = self
            .msg
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(msg) = msg {
            self.queue.finish(msg, settlement, self.max_deliver);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.settle(Settlement::Nak);
    }
}
