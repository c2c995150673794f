//! JSON validity gate for the `details` column
//!
//! `details` arrives as text from untrusted producers and lands in a JSONB
//! column. Every write passes through [`DetailsValidator`]: the consumer runs
//! it before persisting, and each [`AuditStore`](crate::store::AuditStore)
//! runs it again inside `upsert_if_absent`.

use crate::error::{AuditError, Result};
use crate::types::AuditEvent;
use serde::de::IgnoredAny;

/// Stateless validator for JSON `details` payloads
///
/// Cheap to copy; construct once and pass it where it is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetailsValidator;

impl DetailsValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a details string.
    ///
    /// Blank or absent input means "no details" and returns `Ok(None)`
    /// without touching the parser. Valid JSON is returned unchanged.
    pub fn validate<'a>(
        &self,
        details: Option<&'a str>,
    ) -> std::result::Result<Option<&'a str>, serde_json::Error> {
        match details {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => {
                serde_json::from_str::<IgnoredAny>(s)?;
                Ok(Some(s))
            }
        }
    }

    /// Validate the details of a record about to be committed.
    ///
    /// Returns the value to store in the details column.
    pub fn check_record<'a>(&self, record: &'a AuditEvent) -> Result<Option<&'a str>> {
        self.validate(record.details.as_deref()).map_err(|source| {
            tracing::error!(
                event_id = %record.event_id,
                event_type = %record.event_type,
                details = record.details.as_deref().unwrap_or_default(),
                error = %source,
                "Details payload is not valid JSON"
            );
            AuditError::InvalidDetailsJson {
                event_id: record.event_id.clone(),
                event_type: record.event_type.clone(),
                details: record.details.clone().unwrap_or_default(),
                source,
            }
        })
    }
}
