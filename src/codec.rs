//! Envelope decoding for raw queue payloads

use crate::error::{AuditError, Result};
use crate::types::AuditEventMessage;

/// Stateless, reentrant decoder for audit event envelopes
///
/// Construct once at startup and hand it to the consumer; it holds no
/// state and can be shared freely across workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeDecoder;

impl EnvelopeDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a UTF-8 JSON payload into an envelope.
    ///
    /// Unknown fields are ignored. Missing required fields, non-UTF-8 input,
    /// timestamps with an offset, and a blank `eventId` all fail with
    /// [`AuditError::MalformedMessage`].
    pub fn decode(&self, payload: &[u8]) -> Result<AuditEventMessage> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| AuditError::malformed(format!("payload is not UTF-8: {}", e)))?;

        let message: AuditEventMessage =
            serde_json::from_str(text).map_err(|e| AuditError::malformed(e.to_string()))?;

        if message.event_id.trim().is_empty() {
            return Err(AuditError::malformed("eventId must not be blank"));
        }

        Ok(message)
    }
}
