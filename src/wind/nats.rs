//! NATS core pub/sub Wind backend.
//!
//! Grounded on the teacher's `NatsClient`/`NatsProvider` layering
//! (`src/provider/nats/{client,mod}.rs`): a thin struct wrapping a
//! connection, delegating the trait to plain methods. Wind rides NATS core
//! pub/sub (not JetStream) because spec §4.2 is explicitly best-effort,
//! at-most-once, not persisted — exactly what core NATS subjects provide.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Notify;

use crate::error::{CoreError, Result};
use crate::leaf::Leaf;
use crate::lifecycle::{Handle, Subscription};
use crate::metrics::Metrics;
use crate::wind::{LeafHandler, Wind};

/// NATS-backed Wind.
pub struct NatsWind {
    client: async_nats::Client,
    metrics: Arc<Metrics>,
}

impl NatsWind {
    /// Connect to the broker at `url`.
    pub async fn connect(url: &str, metrics: Arc<Metrics>) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| CoreError::TransportError(format!("connect {url}: {e}")))?;
        tracing::info!(url, "wind connected");
        Ok(Self { client, metrics })
    }

    /// Wrap an already-connected client, sharing the connection with other
    /// components (spec §5: "the broker connection is process-wide and
    /// shared by all components").
    pub fn from_client(client: async_nats::Client, metrics: Arc<Metrics>) -> Self {
        Self { client, metrics }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn run_subscriber(
        mut subscriber: async_nats::Subscriber,
        handler: LeafHandler,
        stopped: Arc<AtomicBool>,
        notify: Arc<Notify>,
        metrics: Arc<Metrics>,
    ) {
        loop {
            tokio::select! {
                _ = notify.notified() => break,
                msg = subscriber.next() => {
                    match msg {
                        Some(msg) => {
                            if stopped.load(Ordering::SeqCst) {
                                break;
                            }
                            match Leaf::from_bytes(&msg.payload) {
                                Ok(leaf) => {
                                    tokio::spawn((handler)(leaf));
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "dropped leaf that failed to deserialize");
                                    metrics.record_leaf_undeserializable();
                                }
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Wind for NatsWind {
    async fn drop_leaf(&self, leaf: Leaf) -> Result<()> {
        leaf.validate()?;
        let subject = leaf.subject.clone();
        let payload = leaf.to_bytes()?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| CoreError::TransportError(format!("publish {subject}: {e}")))?;

        self.metrics.record_leaf_published();
        tracing::debug!(subject = %subject, "leaf dropped on wind");
        Ok(())
    }

    async fn catch(&self, pattern: &str, handler: LeafHandler) -> Result<Subscription> {
        let subscriber = self
            .client
            .subscribe(pattern.to_string())
            .await
            .map_err(|e| CoreError::TransportError(format!("subscribe {pattern}: {e}")))?;

        let stopped = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let stopped_task = stopped.clone();
        let notify_task = notify.clone();
        let task = tokio::spawn(Self::run_subscriber(
            subscriber,
            handler,
            stopped_task,
            notify_task,
            self.metrics.clone(),
        ));

        Ok(Handle::new(task, stopped, notify).with_grace_period(Duration::from_secs(5)))
    }

    async fn catch_group(
        &self,
        pattern: &str,
        group: &str,
        handler: LeafHandler,
    ) -> Result<Subscription> {
        let subscriber = self
            .client
            .queue_subscribe(pattern.to_string(), group.to_string())
            .await
            .map_err(|e| CoreError::TransportError(format!("queue_subscribe {pattern}/{group}: {e}")))?;

        let stopped = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let stopped_task = stopped.clone();
        let notify_task = notify.clone();
        let task = tokio::spawn(Self::run_subscriber(
            subscriber,
            handler,
            stopped_task,
            notify_task,
            self.metrics.clone(),
        ));

        Ok(Handle::new(task, stopped, notify).with_grace_period(Duration::from_secs(5)))
    }
}
