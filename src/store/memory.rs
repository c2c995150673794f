//! In-memory audit store for development and testing
//!
//! Records live in a `HashMap` keyed by `event_id` behind a tokio `RwLock`;
//! the write lock makes check-and-insert atomic, which stands in for the
//! primary key constraint of a real database. Records are lost on drop.

use super::{sort_records, AuditStore, UpsertOutcome};
use crate::error::Result;
use crate::types::{storage_precision, AuditEvent};
use crate::validator::DetailsValidator;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory `AuditStore`
#[derive(Clone, Default)]
pub struct MemoryAuditStore {
    records: Arc<RwLock<HashMap<String, AuditEvent>>>,
    validator: DetailsValidator,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select(&self, pred: impl Fn(&AuditEvent) -> bool) -> Vec<AuditEvent> {
        let records = self.records.read().await;
        let mut out: Vec<AuditEvent> = records.values().filter(|r| pred(r)).cloned().collect();
        sort_records(&mut out);
        out
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn upsert_if_absent(&self, record: &AuditEvent) -> Result<UpsertOutcome> {
        let details = self.validator.check_record(record)?;
        let stored = AuditEvent {
            timestamp: storage_precision(record.timestamp),
            details: details.map(str::to_string),
            ..record.clone()
        };

        let mut records = self.records.write().await;
        match records.get(&record.event_id) {
            Some(existing) if existing.is_identical(&stored) => Ok(UpsertOutcome::AlreadyExists),
            Some(_) => Ok(UpsertOutcome::Conflicting),
            None => {
                records.insert(stored.event_id.clone(), stored);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn find_by_id(&self, event_id: &str) -> Result<Option<AuditEvent>> {
        let records = self.records.read().await;
        Ok(records.get(event_id).cloned())
    }

    async fn find_by_user_id(&self, user_id: &str) -> Result<Vec<AuditEvent>> {
        Ok(self
            .select(|r| r.user_id.as_deref() == Some(user_id))
            .await)
    }

    async fn find_by_event_type(&self, event_type: &str) -> Result<Vec<AuditEvent>> {
        Ok(self.select(|r| r.event_type == event_type).await)
    }

    async fn find_by_time_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<AuditEvent>> {
        Ok(self
            .select(|r| r.timestamp >= start && r.timestamp <= end)
            .await)
    }

    async fn find_all(&self) -> Result<Vec<AuditEvent>> {
        Ok(self.select(|_| true).await)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().await.len() as u64)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
