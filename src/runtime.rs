//! Composition root: wires Wind, River, Humus, Soil, the Decomposer, and
//! registered Trees/Nims onto one broker connection and one shared
//! `Metrics` set (spec §5 "shared resources", §9 bring-up/teardown order).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::BrokerConfig;
use crate::decomposer::Decomposer;
use crate::error::{CoreError, Result};
use crate::humus::memory::MemoryHumus;
use crate::humus::nats::NatsHumus;
use crate::humus::Humus;
use crate::metrics::Metrics;
use crate::nim::{NimLogic, NimRuntime};
use crate::river::memory::MemoryRiver;
use crate::river::nats::NatsRiver;
use crate::river::River;
use crate::soil::memory::MemorySoil;
use crate::soil::nats::NatsSoil;
use crate::soil::Soil;
use crate::tree::{TreeLogic, TreeRuntime};
use crate::wind::memory::MemoryWind;
use crate::wind::nats::NatsWind;
use crate::wind::Wind;

#[async_trait]
trait Stoppable: Send + Sync {
    async fn stop(&self);
}

#[async_trait]
impl<T: TreeLogic + 'static> Stoppable for TreeRuntime<T> {
    async fn stop(&self) {
        TreeRuntime::stop(self).await
    }
}

#[async_trait]
impl<T: NimLogic + 'static> Stoppable for NimRuntime<T> {
    async fn stop(&self) {
        NimRuntime::stop(self).await
    }
}

/// Owns one instance of each component plus the Decomposer, and tracks
/// every Tree/Nim spawned against them so `shutdown` can tear everything
/// down in the reverse of the spec's bring-up order.
pub struct Runtime {
    pub wind: Arc<dyn Wind>,
    pub river: Arc<dyn River>,
    pub humus: Arc<dyn Humus>,
    pub soil: Arc<dyn Soil>,
    metrics: Arc<Metrics>,
    decomposer: Decomposer,
    trees: Mutex<Vec<Arc<dyn Stoppable>>>,
    nims: Mutex<Vec<Arc<dyn Stoppable>>>,
}

impl Runtime {
    /// Single-process stack backed by the in-memory components. Useful for
    /// tests and for hosts that don't need durability across restarts.
    pub fn in_memory() -> Self {
        Self::in_memory_with_config(BrokerConfig::default())
    }

    pub fn in_memory_with_config(config: BrokerConfig) -> Self {
        let metrics = Arc::new(Metrics::new());
        let wind: Arc<dyn Wind> = Arc::new(MemoryWind::new(metrics.clone()));
        let river: Arc<dyn River> = Arc::new(MemoryRiver::new(metrics.clone()));
        let humus: Arc<dyn Humus> = Arc::new(MemoryHumus::new(metrics.clone()));
        let soil: Arc<dyn Soil> = Arc::new(MemorySoil::new(metrics.clone()));

        let decomposer = Decomposer::new(
            "decomposer",
            humus.clone(),
            soil.clone(),
            metrics.clone(),
            config.decomposer_retries,
            config.decomposer_backoff,
        );

        Self {
            wind,
            river,
            humus,
            soil,
            metrics,
            decomposer,
            trees: Mutex::new(Vec::new()),
            nims: Mutex::new(Vec::new()),
        }
    }

    /// NATS-backed stack: one connection and one JetStream context shared
    /// by Wind, River, Humus, and Soil (spec §5).
    pub async fn connect_nats(config: BrokerConfig) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let config = Arc::new(config);

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| CoreError::TransportError(format!("connect {}: {e}", config.url)))?;
        let jetstream = async_nats::jetstream::new(client.clone());

        let wind: Arc<dyn Wind> = Arc::new(NatsWind::from_client(client, metrics.clone()));
        let river: Arc<dyn River> =
            Arc::new(NatsRiver::new(jetstream.clone(), config.clone(), metrics.clone()).await?);
        let humus: Arc<dyn Humus> =
            Arc::new(NatsHumus::new(jetstream.clone(), config.clone(), metrics.clone()).await?);
        let soil: Arc<dyn Soil> = Arc::new(NatsSoil::new(jetstream, &config, metrics.clone()).await?);

        let decomposer = Decomposer::new(
            "decomposer",
            humus.clone(),
            soil.clone(),
            metrics.clone(),
            config.decomposer_retries,
            config.decomposer_backoff,
        );

        tracing::info!(url = %config.url, "runtime connected to broker");

        Ok(Self {
            wind,
            river,
            humus,
            soil,
            metrics,
            decomposer,
            trees: Mutex::new(Vec::new()),
            nims: Mutex::new(Vec::new()),
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Starts the Decomposer. Trees and Nims start individually when
    /// `spawn_tree`/`spawn_nim` register them (spec §9 bring-up order:
    /// Wind/River/Humus/Soil are ready as soon as `Runtime` is constructed,
    /// Decomposer next, Trees and Nims last).
    pub async fn start(&self) -> Result<()> {
        self.decomposer.start().await
    }

    pub async fn spawn_tree<T: TreeLogic + 'static>(&self, logic: T) -> Result<Arc<TreeRuntime<T>>> {
        let runtime = Arc::new(TreeRuntime::new(logic, self.river.clone(), self.wind.clone(), self.metrics.clone()));
        runtime.start().await?;
        self.trees.lock().await.push(runtime.clone());
        Ok(runtime)
    }

    pub async fn spawn_nim<T: NimLogic + 'static>(&self, logic: T) -> Result<Arc<NimRuntime<T>>> {
        let runtime = Arc::new(NimRuntime::new(
            logic,
            self.wind.clone(),
            self.humus.clone(),
            self.soil.clone(),
            self.metrics.clone(),
        ));
        runtime.start().await?;
        self.nims.lock().await.push(runtime.clone());
        Ok(runtime)
    }

    /// Tears down in the reverse of the bring-up order: Nims, then Trees,
    /// then the Decomposer. Wind/River/Humus/Soil have no broker-side
    /// teardown beyond dropping the connection.
    pub async fn shutdown(&self) {
        for nim in self.nims.lock().await.drain(..) {
            nim.stop().await;
        }
        for tree in self.trees.lock().await.drain(..) {
            tree.stop().await;
        }
        self.decomposer.stop().await;
        tracing::info!("runtime shut down");
    }
}
