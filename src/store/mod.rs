//! Audit record persistence
//!
//! `AuditStore` is the storage collaborator of the ingestion pipeline and the
//! query API. Writes are idempotent on `event_id`: inserting a record whose id
//! already exists never creates a second record and never overwrites the first.

use crate::error::Result;
use crate::types::AuditEvent;
use async_trait::async_trait;
use chrono::NaiveDateTime;

pub mod memory;
pub mod postgres;

pub use memory::MemoryAuditStore;
pub use postgres::{PgAuditStore, PgStoreConfig};

/// Result of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The record was written
    Inserted,
    /// An identical record with the same id was already stored
    AlreadyExists,
    /// A record with the same id but different content is stored; it was
    /// left untouched
    Conflicting,
}

/// Storage backend for audit records
///
/// Every implementation runs the details gate
/// ([`DetailsValidator::check_record`](crate::validator::DetailsValidator::check_record))
/// inside `upsert_if_absent`. List results are ordered by `timestamp`, then
/// `event_id`.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert the record unless one with the same `event_id` exists
    async fn upsert_if_absent(&self, record: &AuditEvent) -> Result<UpsertOutcome>;

    /// Look up a single record
    async fn find_by_id(&self, event_id: &str) -> Result<Option<AuditEvent>>;

    /// Records whose subject is `user_id`
    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<AuditEvent>>;

    /// Records of the given event type
    async fn find_by_event_type(&self, event_type: &str) -> Result<Vec<AuditEvent>>;

    /// Records with `start <= timestamp <= end`
    async fn find_by_time_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<AuditEvent>>;

    /// All records
    async fn find_all(&self) -> Result<Vec<AuditEvent>>;

    /// Number of stored records
    async fn count(&self) -> Result<u64>;

    /// Backend name (e.g., "memory", "postgres")
    fn name(&self) -> &str;

    /// Health check: returns true if the backend is reachable
    ///
    /// Default implementation delegates to `count()`.
    async fn health(&self) -> Result<bool> {
        self.count().await.map(|_| true)
    }
}

/// Order records the way every store returns them
pub(crate) fn sort_records(records: &mut [AuditEvent]) {
    records.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
}
