//! NATS JetStream provider configuration

use serde::{Deserialize, Serialize};

/// JetStream storage backend for a stream created by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Persist to disk (survives broker restarts)
    #[default]
    File,
    /// Keep in broker memory
    Memory,
}

/// Configuration for the NATS JetStream provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// Server URL
    pub url: String,

    /// Authentication token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Stream name; this is the durable queue the consumer binds to
    pub stream_name: String,

    /// Subject producers publish audit envelopes on
    pub subject: String,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds (JetStream API calls, publish acks)
    pub request_timeout_secs: u64,

    /// Declare the stream if it does not exist.
    ///
    /// Off by default: in production the stream is provisioned by the
    /// broker's operators and a missing stream is a startup error.
    pub create_stream: bool,

    /// Storage for a stream created by the provider
    pub storage: StorageType,

    /// Maximum age of unconsumed messages in seconds (0 = unlimited)
    pub max_age_secs: u64,

    /// Delay requested with each nak, in seconds (0 = consumer backoff applies)
    pub nak_delay_secs: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            token: None,
            stream_name: "audit_events_queue".to_string(),
            subject: "audit.events".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            create_stream: false,
            storage: StorageType::File,
            max_age_secs: 0,
            nak_delay_secs: 0,
        }
    }
}

impl NatsConfig {
    /// Subjects bound to the stream when the provider creates it
    pub fn stream_subjects(&self) -> Vec<String> {
        vec![self.subject.clone()]
    }
}
