//! # a3s-audit
//!
//! Durable audit-event ingestion for the A3S ecosystem.
//!
//! ## Overview
//!
//! Services publish audit envelopes to a durable queue. `a3s-audit` consumes
//! them, checks that each envelope is well formed and that its `details`
//! payload is valid JSON, stores it idempotently by `eventId`, and only then
//! acknowledges the message. Poison messages are acknowledged and
//! dead-lettered; storage outages leave messages unacknowledged so the queue
//! redelivers them. A small read-only HTTP API serves the stored records.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use a3s_audit::{DetailsValidator, EnvelopeDecoder, IngestionConsumer, IngestOutcome};
//! use a3s_audit::store::MemoryAuditStore;
//!
//! # async fn example() {
//! let store = Arc::new(MemoryAuditStore::new());
//! let consumer = IngestionConsumer::new(store, EnvelopeDecoder::new(), DetailsValidator::new());
//!
//! let payload = br#"{"eventId":"e1","timestamp":"2026-01-17T23:03:00","eventType":"USER_CREATED","details":"{\"k\":\"v\"}"}"#;
//! let outcome = consumer.handle_message(payload).await;
//! assert!(matches!(outcome, IngestOutcome::Persisted { .. }));
//! # }
//! ```
//!
//! ## Providers
//!
//! - **memory**: In-memory work queue for testing and single-process use
//! - **nats**: NATS JetStream durable pull consumer
//!
//! ## Stores
//!
//! - **memory**: `HashMap` behind a lock
//! - **postgres**: `audit_events` table with a JSONB `details` column

pub mod codec;
pub mod config;
pub mod consumer;
pub mod dlq;
pub mod error;
pub mod provider;
pub mod query;
pub mod service;
pub mod store;
pub mod types;
pub mod validator;

// Re-export core types
pub use codec::EnvelopeDecoder;
pub use config::{AuditConfig, ConfigOverrides, ConsumerConfig, HttpConfig};
pub use consumer::{
    ConsumerStats, ConsumerStatsSnapshot, Disposition, IngestOutcome, IngestState,
    IngestionConsumer,
};
pub use dlq::{DeadLetter, DlqHandler, MemoryDlqHandler};
pub use error::{AuditError, Result};
pub use provider::{Delivery, ProviderInfo, QueueProvider, Subscription};
pub use query::{query_router, QueryState};
pub use service::{open_store, IngestionHandle, IngestionService, WorkerLiveness};
pub use store::{AuditStore, MemoryAuditStore, PgAuditStore, PgStoreConfig, UpsertOutcome};
pub use types::{AuditEvent, AuditEventMessage, ConsumerOptions, DeliveryInfo};
pub use validator::DetailsValidator;

// Re-export providers for convenience
pub use provider::memory::{MemoryConfig, MemoryProvider};
pub use provider::nats::{NatsClient, NatsConfig, NatsProvider, NatsSubscription, StorageType};
