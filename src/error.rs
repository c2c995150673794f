//! Error types for a3s-audit

use thiserror::Error;

/// Errors that can occur while ingesting, storing, or querying audit events
#[derive(Debug, Error)]
pub enum AuditError {
    /// Payload could not be decoded into an audit event envelope
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// The `details` payload is not well-formed JSON
    #[error("Invalid details JSON for event '{event_id}' ({event_type}): {source}")]
    InvalidDetailsJson {
        event_id: String,
        event_type: String,
        details: String,
        #[source]
        source: serde_json::Error,
    },

    /// A different record is already stored under this event id
    #[error("Event '{event_id}' already stored with different content")]
    ConflictingDuplicate { event_id: String },

    /// The database refused the record's own values (too long, bad encoding)
    #[error("Record rejected by storage: {0}")]
    Rejected(String),

    /// Persistence backend failed (connectivity, timeouts, driver errors)
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Queue transport connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Subscribe failure
    #[error("Failed to subscribe to queue '{queue}': {reason}")]
    Subscribe { queue: String, reason: String },

    /// Publish failure
    #[error("Failed to publish to subject '{subject}': {reason}")]
    Publish { subject: String, reason: String },

    /// Stream (queue) lookup or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// Consumer creation or management error
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Acknowledgement failure
    #[error("Failed to acknowledge message: {0}")]
    Ack(String),

    /// Record not found
    #[error("Audit event not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization failure outside message decoding
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuditError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Content failures (malformed envelope, invalid details) are permanent
    /// for a given message; infrastructure failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuditError::StorageUnavailable(_)
                | AuditError::Connection(_)
                | AuditError::Subscribe { .. }
                | AuditError::Consumer(_)
                | AuditError::Stream(_)
                | AuditError::Ack(_)
        )
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        AuditError::MalformedMessage {
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for AuditError {
    fn from(e: sqlx::Error) -> Self {
        let rejected = match &e {
            sqlx::Error::Database(db) => db.code().is_some_and(|code| is_content_violation(&code)),
            sqlx::Error::Encode(_) => true,
            _ => false,
        };
        if rejected {
            AuditError::Rejected(e.to_string())
        } else {
            AuditError::StorageUnavailable(e.to_string())
        }
    }
}

/// SQLSTATE raised by the row's values rather than the server's state:
/// data exceptions (class 22) and integrity violations (class 23) other
/// than `unique_violation`.
fn is_content_violation(sqlstate: &str) -> bool {
    sqlstate.starts_with("22") || (sqlstate.starts_with("23") && sqlstate != "23505")
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
