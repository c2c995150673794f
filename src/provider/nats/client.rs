//! NATS JetStream client: connect, bind the audit stream, publish, subscribe

use super::config::{NatsConfig, StorageType};
use super::subscriber::NatsSubscription;
use crate::error::{AuditError, Result};
use crate::types::ConsumerOptions;
use async_nats::jetstream;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// NATS JetStream client
///
/// Owns the connection and the handle of the stream that backs the audit
/// queue.
pub struct NatsClient {
    /// NATS client connection
    client: async_nats::Client,

    /// JetStream context
    jetstream: jetstream::Context,

    /// JetStream stream handle (Mutex for methods requiring &mut self)
    stream: Mutex<jetstream::stream::Stream>,

    /// Configuration
    config: Arc<NatsConfig>,
}

impl NatsClient {
    /// Connect to NATS and bind the audit stream
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let connect_opts = build_connect_options(&config);

        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| AuditError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let jetstream = jetstream::new(client.clone());
        let stream = if config.create_stream {
            ensure_stream(&jetstream, &config).await?
        } else {
            bind_stream(&jetstream, &config).await?
        };

        Ok(Self {
            client,
            jetstream,
            stream: Mutex::new(stream),
            config: Arc::new(config),
        })
    }

    /// Publish a raw envelope, returning the JetStream sequence number
    ///
    /// With `msg_id`, the `Nats-Msg-Id` header lets the stream drop
    /// repeated publishes inside its duplicate window.
    pub async fn publish(&self, payload: Bytes, msg_id: Option<&str>) -> Result<u64> {
        let subject = self.config.subject.clone();

        let ack_fut = match msg_id {
            Some(id) => {
                let mut headers = async_nats::HeaderMap::new();
                headers.insert("Nats-Msg-Id", id);
                self.jetstream
                    .publish_with_headers(subject.clone(), headers, payload)
                    .await
            }
            None => self.jetstream.publish(subject.clone(), payload).await,
        }
        .map_err(|e| AuditError::Publish {
            subject: subject.clone(),
            reason: e.to_string(),
        })?;

        let ack = ack_fut.await.map_err(|e| AuditError::Publish {
            subject: subject.clone(),
            reason: format!("ack failed: {}", e),
        })?;

        tracing::debug!(
            subject = %subject,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Audit envelope published"
        );

        Ok(ack.sequence)
    }

    /// Create (or bind to) a durable pull consumer and return a subscription
    pub async fn subscribe_durable(
        &self,
        consumer_name: &str,
        opts: &ConsumerOptions,
    ) -> Result<NatsSubscription> {
        let config = build_consumer_config(consumer_name, &self.config.subject, opts);

        let consumer = self
            .stream
            .lock()
            .await
            .get_or_create_consumer(consumer_name, config)
            .await
            .map_err(|e| {
                AuditError::Consumer(format!(
                    "Failed to create durable consumer '{}': {}",
                    consumer_name, e
                ))
            })?;

        let messages = consumer.messages().await.map_err(|e| AuditError::Subscribe {
            queue: self.config.stream_name.clone(),
            reason: e.to_string(),
        })?;

        tracing::info!(
            consumer = consumer_name,
            stream = %self.config.stream_name,
            max_deliver = ?opts.max_deliver,
            max_ack_pending = ?opts.max_ack_pending,
            "Durable subscription created"
        );

        let nak_delay = (self.config.nak_delay_secs > 0)
            .then(|| Duration::from_secs(self.config.nak_delay_secs));

        Ok(NatsSubscription::new(
            messages,
            self.config.stream_name.clone(),
            nak_delay,
        ))
    }

    /// Get stream info
    pub async fn stream_info(&self) -> Result<StreamInfo> {
        let mut stream = self.stream.lock().await;
        let info = stream
            .info()
            .await
            .map_err(|e| AuditError::Stream(format!("Failed to get stream info: {}", e)))?;

        Ok(StreamInfo {
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_sequence: info.state.first_sequence,
            last_sequence: info.state.last_sequence,
            consumer_count: info.state.consumer_count,
        })
    }

    /// Get the underlying NATS client
    pub fn nats_client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }
}

/// Summary of stream state
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub messages: u64,
    pub bytes: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub consumer_count: usize,
}

/// Build a JetStream pull consumer config from `ConsumerOptions`
fn build_consumer_config(
    consumer_name: &str,
    filter_subject: &str,
    opts: &ConsumerOptions,
) -> jetstream::consumer::pull::Config {
    let backoff: Vec<Duration> = opts
        .backoff_secs
        .iter()
        .map(|s| Duration::from_secs(*s))
        .collect();

    jetstream::consumer::pull::Config {
        durable_name: Some(consumer_name.to_string()),
        filter_subject: filter_subject.to_string(),
        ack_policy: jetstream::consumer::AckPolicy::Explicit,
        deliver_policy: jetstream::consumer::DeliverPolicy::All,
        max_deliver: opts.max_deliver.unwrap_or(0),
        max_ack_pending: opts.max_ack_pending.unwrap_or(0),
        ack_wait: opts
            .ack_wait_secs
            .map(Duration::from_secs)
            .unwrap_or_default(),
        backoff,
        ..Default::default()
    }
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

/// Look up a stream provisioned outside this process
async fn bind_stream(
    js: &jetstream::Context,
    config: &NatsConfig,
) -> Result<jetstream::stream::Stream> {
    let stream = js.get_stream(&config.stream_name).await.map_err(|e| {
        AuditError::Stream(format!(
            "Audit stream '{}' is not available: {}",
            config.stream_name, e
        ))
    })?;

    tracing::info!(stream = %config.stream_name, "Bound to JetStream stream");
    Ok(stream)
}

/// Declare the stream if missing, as a durable work queue
async fn ensure_stream(
    js: &jetstream::Context,
    config: &NatsConfig,
) -> Result<jetstream::stream::Stream> {
    let stream = js
        .get_or_create_stream(stream_config(config))
        .await
        .map_err(|e| {
            AuditError::Stream(format!(
                "Failed to create/get stream '{}': {}",
                config.stream_name, e
            ))
        })?;

    tracing::info!(
        stream = %config.stream_name,
        subjects = ?config.stream_subjects(),
        "JetStream stream ready"
    );

    Ok(stream)
}

fn stream_config(config: &NatsConfig) -> jetstream::stream::Config {
    let storage = match config.storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    };

    jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: config.stream_subjects(),
        storage,
        max_age: Duration::from_secs(config.max_age_secs),
        retention: jetstream::stream::RetentionPolicy::WorkQueue,
        ..Default::default()
    }
}
