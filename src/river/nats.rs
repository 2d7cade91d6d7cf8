//! JetStream-backed River.
//!
//! Grounded on the teacher's `provider/nats/client.rs`: `ensure_stream`,
//! `build_consumer_config`, and the pull-consumer `messages()` loop are the
//! same shape, retargeted at raw `river.>` ingress instead of typed events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, consumer::AckPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{Mutex, Notify};

use crate::config::{BrokerConfig, StorageType as CoreStorageType};
use crate::error::{CoreError, Result};
use crate::lifecycle::{Consumer, Handle};
use crate::metrics::Metrics;
use crate::river::{River, RiverHandler, RiverRecord};

/// NATS JetStream-backed River, bound to the stream named by
/// `BrokerConfig::river_stream` (`RIVER` by default).
pub struct NatsRiver {
    jetstream: jetstream::Context,
    stream: Mutex<jetstream::stream::Stream>,
    config: Arc<BrokerConfig>,
    metrics: Arc<Metrics>,
}

impl NatsRiver {
    /// Materialize the `RIVER` stream on an existing JetStream context,
    /// sharing the broker connection with the rest of the runtime.
    pub async fn new(jetstream: jetstream::Context, config: Arc<BrokerConfig>, metrics: Arc<Metrics>) -> Result<Self> {
        let storage = match config.storage {
            CoreStorageType::File => jetstream::stream::StorageType::File,
            CoreStorageType::Memory => jetstream::stream::StorageType::Memory,
        };
        let max_age = if config.max_age_secs > 0 {
            Duration::from_secs(config.max_age_secs)
        } else {
            Duration::ZERO
        };

        let stream_config = jetstream::stream::Config {
            name: config.river_stream.clone(),
            subjects: config.river_subjects(),
            storage,
            max_messages: config.max_messages,
            max_age,
            max_bytes: config.max_bytes,
            retention: jetstream::stream::RetentionPolicy::Limits,
            ..Default::default()
        };

        let stream = jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| CoreError::TransportError(format!("create stream '{}': {e}", config.river_stream)))?;

        tracing::info!(stream = %config.river_stream, "river stream ready");

        Ok(Self {
            jetstream,
            stream: Mutex::new(stream),
            config,
            metrics,
        })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn run_consumer(
        consumer: jetstream::consumer::PullConsumer,
        handler: RiverHandler,
        stopped: Arc<AtomicBool>,
        notify: Arc<Notify>,
    ) {
        let messages = match consumer.messages().await {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "failed to open river consumer message stream");
                return;
            }
        };
        let mut messages = std::pin::pin!(messages);

        loop {
            tokio::select! {
                _ = notify.notified() => return,
                msg = messages.next() => {
                    let Some(msg) = msg else { return };
                    if stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    let Ok(msg) = msg else { continue };
                    let info = match msg.info() {
                        Ok(info) => info,
                        Err(_) => continue,
                    };
                    let record = RiverRecord {
                        subject: msg.subject.to_string(),
                        data: Bytes::copy_from_slice(&msg.payload),
                        stream_sequence: info.stream_sequence,
                    };

                    match handler(record).await {
                        Ok(()) => {
                            let _ = msg.ack().await;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "river handler failed, nacking for redelivery");
                            let _ = msg.ack_with(jetstream::AckKind::Nak(None)).await;
                        }
                    }
                }
            }
        }
    }

    async fn subscribe(
        &self,
        pattern: &str,
        durable_name: Option<&str>,
        handler: RiverHandler,
    ) -> Result<Consumer> {
        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: durable_name.map(|s| s.to_string()),
            filter_subject: pattern.to_string(),
            ack_policy: AckPolicy::Explicit,
            ack_wait: Duration::from_secs(self.config.ack_wait_secs),
            ..Default::default()
        };

        let consumer = if let Some(name) = durable_name {
            self.stream
                .lock()
                .await
                .get_or_create_consumer(name, consumer_config)
                .await
        } else {
            self.stream.lock().await.create_consumer(consumer_config).await
        }
        .map_err(|e| CoreError::TransportError(format!("create river consumer: {e}")))?;

        let stopped = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let task = tokio::spawn(Self::run_consumer(consumer, handler, stopped.clone(), notify.clone()));

        tracing::info!(filter = pattern, durable = ?durable_name, "river observer created");
        Ok(Handle::new(task, stopped, notify))
    }
}

#[async_trait]
impl River for NatsRiver {
    async fn flow(&self, subject: &str, data: Bytes) -> Result<u64> {
        if !subject.starts_with("river.") {
            return Err(CoreError::InvalidInput(format!(
                "river subject '{subject}' must start with 'river.'"
            )));
        }

        let ack = self
            .jetstream
            .publish(subject.to_string(), data)
            .await
            .map_err(|e| CoreError::TransportError(format!("flow {subject}: {e}")))?
            .await
            .map_err(|e| CoreError::TransportError(format!("flow ack {subject}: {e}")))?;

        self.metrics.record_river_flow();
        tracing::debug!(subject, sequence = ack.sequence, "river flow accepted");
        Ok(ack.sequence)
    }

    async fn observe(&self, pattern: &str, handler: RiverHandler) -> Result<Consumer> {
        self.subscribe(pattern, None, handler).await
    }

    async fn observe_with_consumer(
        &self,
        pattern: &str,
        name: &str,
        handler: RiverHandler,
    ) -> Result<Consumer> {
        self.subscribe(pattern, Some(name), handler).await
    }
}
