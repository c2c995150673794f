//! Dead letter sink for abandoned audit messages
//!
//! Messages that can never be persisted (malformed envelopes, invalid
//! `details`, conflicting duplicates) are acknowledged so the transport
//! stops redelivering them. A `DlqHandler` keeps a copy with the reason,
//! so nothing is dropped silently. The same sink records transient
//! failures on the final delivery attempt.

use crate::error::Result;
use crate::types::DeliveryInfo;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An abandoned message with context about why it was abandoned
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    /// Raw message body (lossy UTF-8)
    pub payload: String,

    /// Event id, when the envelope could be decoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    /// Event type, when the envelope could be decoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// Why the message was abandoned
    pub reason: String,

    /// Transport metadata, when delivered by a queue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryInfo>,

    /// Unix timestamp in milliseconds when the message was dead-lettered
    pub dead_lettered_at: u64,
}

impl DeadLetter {
    /// Create a dead letter from a raw payload
    pub fn new(payload: &[u8], reason: impl Into<String>) -> Self {
        Self {
            payload: String::from_utf8_lossy(payload).into_owned(),
            event_id: None,
            event_type: None,
            reason: reason.into(),
            delivery: None,
            dead_lettered_at: now_millis(),
        }
    }

    /// Attach the identity of the decoded envelope
    pub fn with_event(mut self, event_id: &str, event_type: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self.event_type = Some(event_type.to_string());
        self
    }

    /// Attach transport metadata
    pub fn with_delivery(mut self, info: Option<&DeliveryInfo>) -> Self {
        self.delivery = info.cloned();
        self
    }
}

/// Trait for dead letter handlers
#[async_trait]
pub trait DlqHandler: Send + Sync {
    /// Record an abandoned message
    async fn handle(&self, letter: DeadLetter) -> Result<()>;

    /// Number of dead letters currently held
    async fn count(&self) -> Result<usize>;

    /// Most recent dead letters, newest first
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>>;
}

/// In-memory DLQ handler for development and testing
///
/// Bounded: once `max_letters` is reached the oldest entries are evicted.
#[derive(Clone)]
pub struct MemoryDlqHandler {
    letters: Arc<RwLock<VecDeque<DeadLetter>>>,
    max_letters: usize,
}

impl MemoryDlqHandler {
    /// Create a handler holding at most `max_letters` entries (0 = unbounded)
    pub fn new(max_letters: usize) -> Self {
        Self {
            letters: Arc::new(RwLock::new(VecDeque::new())),
            max_letters,
        }
    }
}

impl Default for MemoryDlqHandler {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DlqHandler for MemoryDlqHandler {
    async fn handle(&self, letter: DeadLetter) -> Result<()> {
        tracing::warn!(
            event_id = letter.event_id.as_deref().unwrap_or("-"),
            event_type = letter.event_type.as_deref().unwrap_or("-"),
            sequence = letter.delivery.as_ref().map(|d| d.sequence),
            reason = %letter.reason,
            "Message dead-lettered"
        );

        let mut letters = self.letters.write().await;
        letters.push_back(letter);

        if self.max_letters > 0 {
            while letters.len() > self.max_letters {
                letters.pop_front();
            }
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.letters.read().await.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetter>> {
        let letters = self.letters.read().await;
        Ok(letters.iter().rev().take(limit).cloned().collect())
    }
}

/// Whether this delivery is the transport's last attempt
///
/// `max_deliver` of 0 means unlimited redelivery.
pub fn should_dead_letter(info: &DeliveryInfo, max_deliver: u64) -> bool {
    max_deliver > 0 && info.num_delivered >= max_deliver
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
