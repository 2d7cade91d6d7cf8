//! JetStream KV-backed Soil.
//!
//! The teacher never uses JetStream's KV bucket — `async-nats`'s own
//! `jetstream::kv` module is the grounding here: the crate is already a
//! teacher dependency, and its KV `Store` maps directly onto spec §4.4's
//! `Dig`/`Bury`/`Put`/`Delete`/`Watch`/`Keys` contract (`create`/`update`
//! taking an expected revision is exactly compare-and-swap).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_nats::jetstream::kv;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::Notify;

use crate::config::BrokerConfig;
use crate::error::{CoreError, Result};
use crate::lifecycle::{Consumer as Watcher, Handle};
use crate::metrics::Metrics;
use crate::soil::{Soil, SoilChange, SoilEntry, SoilOp, WatchHandler};

/// NATS JetStream KV-backed Soil, bound to the bucket named by
/// `BrokerConfig::soil_bucket` (`SOIL` by default).
pub struct NatsSoil {
    store: kv::Store,
    metrics: Arc<Metrics>,
}

impl NatsSoil {
    /// Materialize the Soil KV bucket on an existing JetStream context.
    pub async fn new(jetstream: async_nats::jetstream::Context, config: &BrokerConfig, metrics: Arc<Metrics>) -> Result<Self> {
        let store = jetstream
            .create_key_value(kv::Config {
                bucket: config.soil_bucket.clone(),
                history: config.soil_history.max(1) as i64,
                ..Default::default()
            })
            .await
            .map_err(|e| CoreError::TransportError(format!("create kv bucket '{}': {e}", config.soil_bucket)))?;

        tracing::info!(bucket = %config.soil_bucket, "soil bucket ready");

        Ok(Self { store, metrics })
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[async_trait]
impl Soil for NatsSoil {
    async fn dig(&self, entity: &str) -> Result<SoilEntry> {
        let entry = self
            .store
            .entry(entity)
            .await
            .map_err(|e| CoreError::TransportError(format!("dig {entity}: {e}")))?
            .ok_or_else(|| CoreError::NotFound(entity.to_string()))?;

        if matches!(entry.operation, kv::Operation::Delete | kv::Operation::Purge) {
            return Err(CoreError::NotFound(entity.to_string()));
        }

        Ok(SoilEntry {
            data: entry.value,
            revision: entry.revision,
        })
    }

    async fn bury(&self, entity: &str, data: Bytes, expected_revision: u64) -> Result<u64> {
        let result = if expected_revision == 0 {
            self.store.create(entity, data).await
        } else {
            self.store.update(entity, data, expected_revision).await
        };

        match result {
            Ok(revision) => {
                tracing::debug!(entity, revision, "soil bury succeeded");
                Ok(revision)
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("wrong last sequence") || message.contains("already exists") {
                    self.metrics.record_soil_cas_conflict();
                    let actual = self.dig(entity).await.map(|entry| entry.revision).unwrap_or(0);
                    Err(CoreError::RevisionMismatch {
                        entity: entity.to_string(),
                        expected: expected_revision,
                        actual,
                    })
                } else if message.contains("not found") {
                    Err(CoreError::NotFound(entity.to_string()))
                } else {
                    Err(CoreError::TransportError(format!("bury {entity}: {message}")))
                }
            }
        }
    }

    async fn put(&self, entity: &str, data: Bytes) -> Result<u64> {
        self.store
            .put(entity, data)
            .await
            .map_err(|e| CoreError::TransportError(format!("put {entity}: {e}")))
    }

    async fn delete(&self, entity: &str) -> Result<()> {
        self.store
            .delete(entity)
            .await
            .map_err(|e| CoreError::TransportError(format!("delete {entity}: {e}")))
    }

    async fn watch(&self, pattern: &str, handler: WatchHandler) -> Result<Watcher> {
        let mut watch = self
            .store
            .watch(pattern)
            .await
            .map_err(|e| CoreError::TransportError(format!("watch {pattern}: {e}")))?;

        let stopped = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let stopped_task = stopped.clone();
        let notify_task = notify.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = notify_task.notified() => return,
                    entry = watch.next() => {
                        let Some(Ok(entry)) = entry else { return };
                        if stopped_task.load(Ordering::SeqCst) {
                            return;
                        }
                        let op = match entry.operation {
                            kv::Operation::Put => SoilOp::Put,
                            _ => SoilOp::Delete,
                        };
                        let change = SoilChange {
                            entity: entry.key,
                            data: entry.value,
                            revision: entry.revision,
                            op,
                        };
                        tokio::spawn(handler(change));
                    }
                }
            }
        });

        Ok(Handle::new(task, stopped, notify))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = self
            .store
            .keys()
            .await
            .map_err(|e| CoreError::TransportError(format!("keys: {e}")))?;

        let mut out = Vec::new();
        while let Some(Ok(key)) = keys.next().await {
            out.push(key);
        }
        Ok(out)
    }
}
