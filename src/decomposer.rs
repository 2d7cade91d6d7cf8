//! Decomposer — applies Compost records to Soil in slot order (spec §4.8).

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::error::{CoreError, Result};
use crate::humus::{Compost, CompostAction, Humus};
use crate::lifecycle::{Consumer, DecomposerState};
use crate::metrics::Metrics;
use crate::soil::{Soil, SoilEntry};

/// A single Decomposer instance applies Humus records strictly in slot
/// order, materializing Soil as a projection of Humus. Run more than one
/// under distinct durable consumer names only if cross-entity ordering is
/// not required (spec §4.8 ordering guarantee).
pub struct Decomposer {
    humus: Arc<dyn Humus>,
    soil: Arc<dyn Soil>,
    metrics: Arc<Metrics>,
    consumer_name: String,
    retries: u32,
    backoff: Duration,
    handle: Mutex<Option<Consumer>>,
    state: Mutex<DecomposerState>,
}

impl Decomposer {
    pub fn new(
        consumer_name: impl Into<String>,
        humus: Arc<dyn Humus>,
        soil: Arc<dyn Soil>,
        metrics: Arc<Metrics>,
        retries: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            humus,
            soil,
            metrics,
            consumer_name: consumer_name.into(),
            retries,
            backoff,
            handle: Mutex::new(None),
            state: Mutex::new(DecomposerState::Idle),
        }
    }

    /// Idle → Running.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != DecomposerState::Idle {
            return Ok(());
        }

        let soil = self.soil.clone();
        let metrics = self.metrics.clone();
        let retries = self.retries;
        let backoff = self.backoff;

        let handler = Arc::new(move |record: Compost| {
            let soil = soil.clone();
            let metrics = metrics.clone();
            Box::pin(apply_record(soil, metrics, retries, backoff, record))
                as futures::future::BoxFuture<'static, Result<()>>
        });

        let consumer = self.humus.decompose_with_consumer(&self.consumer_name, handler).await?;
        *self.handle.lock().await = Some(consumer);
        *state = DecomposerState::Running;
        tracing::info!(consumer = %self.consumer_name, "decomposer started");
        Ok(())
    }

    /// Running → Stopping → Idle after the in-flight record is acked or
    /// re-queued.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if *state != DecomposerState::Running {
            return;
        }
        *state = DecomposerState::Stopping;

        if let Some(mut consumer) = self.handle.lock().await.take() {
            consumer.stop().await;
        }

        *state = DecomposerState::Idle;
        tracing::info!(consumer = %self.consumer_name, "decomposer stopped");
    }
}

async fn apply_record(
    soil: Arc<dyn Soil>,
    metrics: Arc<Metrics>,
    retries: u32,
    backoff: Duration,
    record: Compost,
) -> Result<()> {
    match record.action {
        CompostAction::Create => {
            match soil.bury(&record.entity, record.data.clone(), 0).await {
                Ok(_) => {
                    metrics.record_decomposer_applied();
                    Ok(())
                }
                // An existing entity on `create` is an idempotent no-op,
                // not a failure (spec §8 boundary behavior).
                Err(CoreError::RevisionMismatch { .. }) => {
                    metrics.record_decomposer_applied();
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        CompostAction::Update => {
            let mut attempt = 0u32;
            loop {
                let current = match soil.dig(&record.entity).await {
                    Ok(entry) => entry,
                    Err(CoreError::NotFound(_)) => SoilEntry { data: Bytes::new(), revision: 0 },
                    Err(e) => return Err(e),
                };

                match soil.bury(&record.entity, record.data.clone(), current.revision).await {
                    Ok(_) => {
                        metrics.record_decomposer_applied();
                        return Ok(());
                    }
                    Err(CoreError::RevisionMismatch { .. }) => {
                        attempt += 1;
                        if attempt >= retries {
                            tracing::warn!(
                                entity = %record.entity,
                                slot = record.slot,
                                "decomposer exhausted cas retries, skipping record"
                            );
                            metrics.record_decomposer_skipped();
                            return Ok(());
                        }
                        tokio::time::sleep(backoff * 2u32.pow(attempt - 1)).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        CompostAction::Delete => match soil.delete(&record.entity).await {
            Ok(()) => {
                metrics.record_decomposer_applied();
                Ok(())
            }
            Err(e) => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humus::memory::MemoryHumus;
    use crate::soil::memory::MemorySoil;

    #[tokio::test]
    async fn create_materializes_soil_entry() {
        let humus = Arc::new(MemoryHumus::new(Arc::new(Metrics::new())));
        let soil = Arc::new(MemorySoil::new(Arc::new(Metrics::new())));
        let decomposer = Decomposer::new(
            "decomposer-1",
            humus.clone(),
            soil.clone(),
            Arc::new(Metrics::new()),
            5,
            Duration::from_millis(5),
        );

        decomposer.start().await.unwrap();
        humus.add("payment-nim", "task:1", CompostAction::Create, Bytes::from_static(b"{}")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        decomposer.stop().await;

        let entry = soil.dig("task:1").await.unwrap();
        assert_eq!(entry.revision, 1);
    }

    #[tokio::test]
    async fn duplicate_create_is_idempotent_ack() {
        let humus = Arc::new(MemoryHumus::new(Arc::new(Metrics::new())));
        let soil = Arc::new(MemorySoil::new(Arc::new(Metrics::new())));
        soil.bury("task:1", Bytes::from_static(b"existing"), 0).await.unwrap();

        let decomposer = Decomposer::new(
            "decomposer-2",
            humus.clone(),
            soil.clone(),
            Arc::new(Metrics::new()),
            5,
            Duration::from_millis(5),
        );
        decomposer.start().await.unwrap();
        humus.add("payment-nim", "task:1", CompostAction::Create, Bytes::from_static(b"new")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        decomposer.stop().await;

        // Original value untouched — the duplicate create was a no-op ack.
        let entry = soil.dig("task:1").await.unwrap();
        assert_eq!(entry.data, Bytes::from_static(b"existing"));
    }

    #[tokio::test]
    async fn update_retries_on_conflict_and_converges() {
        let humus = Arc::new(MemoryHumus::new(Arc::new(Metrics::new())));
        let soil = Arc::new(MemorySoil::new(Arc::new(Metrics::new())));
        soil.bury("task:1", Bytes::from_static(b"v0"), 0).await.unwrap();

        let decomposer = Decomposer::new(
            "decomposer-3",
            humus.clone(),
            soil.clone(),
            Arc::new(Metrics::new()),
            5,
            Duration::from_millis(5),
        );
        decomposer.start().await.unwrap();

        humus.add("payment-nim", "task:1", CompostAction::Update, Bytes::from_static(b"v1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        // Concurrent external bump to simulate another writer racing the
        // Decomposer's read-then-CAS.
        let _ = soil.bury("task:1", Bytes::from_static(b"race"), 1).await;
        humus.add("payment-nim", "task:1", CompostAction::Update, Bytes::from_static(b"v2")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        decomposer.stop().await;

        let entry = soil.dig("task:1").await.unwrap();
        assert_eq!(entry.data, Bytes::from_static(b"v2"));
    }

    #[tokio::test]
    async fn delete_missing_entity_is_success() {
        let humus = Arc::new(MemoryHumus::new(Arc::new(Metrics::new())));
        let soil = Arc::new(MemorySoil::new(Arc::new(Metrics::new())));
        let decomposer = Decomposer::new(
            "decomposer-4",
            humus.clone(),
            soil.clone(),
            Arc::new(Metrics::new()),
            5,
            Duration::from_millis(5),
        );
        decomposer.start().await.unwrap();

        humus.add("payment-nim", "task:never-existed", CompostAction::Delete, Bytes::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        decomposer.stop().await;

        assert!(soil.dig("task:never-existed").await.is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let humus = Arc::new(MemoryHumus::new(Arc::new(Metrics::new())));
        let soil = Arc::new(MemorySoil::new(Arc::new(Metrics::new())));
        let decomposer = Decomposer::new(
            "decomposer-5",
            humus,
            soil,
            Arc::new(Metrics::new()),
            5,
            Duration::from_millis(5),
        );
        decomposer.start().await.unwrap();
        decomposer.stop().await;
        decomposer.stop().await;
    }
}
