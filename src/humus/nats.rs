//! JetStream-backed Humus — same stream-wiring idiom as `river::nats`, a
//! second stream instance (`HUMUS`) whose payload is the serialized Compost.

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
use crate::humus::{Compost, CompostAction, CompostHandler, Humus};
use crate::leaf::now_millis;
use crate::lifecycle::{Consumer, Handle};
use crate::metrics::Metrics;

pub struct NatsHumus {
    jetstream: jetstream::Context,
    stream: Mutex<jetstream::stream::Stream>,
    config: Arc<BrokerConfig>,
    metrics: Arc<Metrics>,
}

impl NatsHumus {
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
            name: config.humus_stream.clone(),
            subjects: config.humus_subjects(),
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
            .map_err(|e| CoreError::TransportError(format!("create stream '{}': {e}", config.humus_stream)))?;

        tracing::info!(stream = %config.humus_stream, "humus stream ready");

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
        handler: CompostHandler,
        stopped: Arc<AtomicBool>,
        notify: Arc<Notify>,
    ) {
        let messages = match consumer.messages().await {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, "failed to open humus consumer message stream");
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
                    let Ok(mut compost) = serde_json::from_slice::<Compost>(&msg.payload) else {
                        tracing::warn!("dropped compost record that failed to deserialize");
                        let _ = msg.ack().await;
                        continue;
                    };
                    // The stored `slot` is a placeholder written before the
                    // publish ack was known; the stream sequence is the
                    // real, globally-ordered slot.
                    if let Ok(info) = msg.info() {
                        compost.slot = info.stream_sequence;
                    }

                    match handler(compost).await {
                        Ok(()) => {
                            let _ = msg.ack().await;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "humus handler failed, nacking for redelivery");
                            let _ = msg.ack_with(jetstream::AckKind::Nak(None)).await;
                        }
                    }
                }
            }
        }
    }

    async fn subscribe(&self, durable_name: Option<&str>, handler: CompostHandler) -> Result<Consumer> {
        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: durable_name.map(|s| s.to_string()),
            filter_subject: "humus.>".to_string(),
            ack_policy: AckPolicy::Explicit,
            ack_wait: Duration::from_secs(self.config.ack_wait_secs),
            ..Default::default()
        };

        let consumer = if let Some(name) = durable_name {
            self.stream.lock().await.get_or_create_consumer(name, consumer_config).await
        } else {
            self.stream.lock().await.create_consumer(consumer_config).await
        }
        .map_err(|e| CoreError::TransportError(format!("create humus consumer: {e}")))?;

        let stopped = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let task = tokio::spawn(Self::run_consumer(consumer, handler, stopped.clone(), notify.clone()));

        tracing::info!(durable = ?durable_name, "humus decompose consumer created");
        Ok(Handle::new(task, stopped, notify))
    }
}

#[async_trait]
impl Humus for NatsHumus {
    async fn add(&self, nim: &str, entity: &str, action: CompostAction, data: Bytes) -> Result<u64> {
        let record = Compost {
            nim: nim.to_string(),
            entity: entity.to_string(),
            action,
            data,
            slot: 0,
            timestamp: now_millis(),
        };
        record.validate()?;

        let subject = format!("humus.{nim}");
        let payload = serde_json::to_vec(&record)?;

        let ack = self
            .jetstream
            .publish(subject.clone(), Bytes::from(payload))
            .await
            .map_err(|e| CoreError::TransportError(format!("add {subject}: {e}")))?
            .await
            .map_err(|e| CoreError::TransportError(format!("add ack {subject}: {e}")))?;

        self.metrics.record_humus_compost();
        tracing::debug!(nim, entity, slot = ack.sequence, "compost appended");
        Ok(ack.sequence)
    }

    async fn decompose(&self, handler: CompostHandler) -> Result<Consumer> {
        self.subscribe(None, handler).await
    }

    async fn decompose_with_consumer(&self, name: &str, handler: CompostHandler) -> Result<Consumer> {
        self.subscribe(Some(name), handler).await
    }
}
