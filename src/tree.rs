//! Tree — stateless River-to-Leaf parser (spec §4.6).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::leaf::Leaf;
use crate::lifecycle::{Consumer, RunState};
use crate::metrics::Metrics;
use crate::river::{River, RiverRecord};
use crate::wind::Wind;

/// Capability set every Tree implements (spec §4.6). `parse` is stateless:
/// idempotency of the whole pipeline follows from `parse` being
/// deterministic in the record alone.
#[async_trait]
pub trait TreeLogic: Send + Sync {
    fn name(&self) -> &str;

    /// River subject patterns this Tree watches.
    fn patterns(&self) -> Vec<String>;

    /// Parse one River record. `Ok(None)` is a deliberate no-op for
    /// unknown or uninteresting subtypes; it is not an error.
    fn parse(&self, record: &RiverRecord) -> Result<Option<Leaf>>;
}

/// Base runtime shared by every Tree: registers a River observer per
/// pattern, drives `Parse` → `Drop` per spec §4.6, and owns the resulting
/// consumer handles. Composition over inheritance (spec §9): a concrete
/// Tree implements `TreeLogic` and is wrapped in a `TreeRuntime`, it does
/// not subclass one.
pub struct TreeRuntime<T: TreeLogic> {
    logic: Arc<T>,
    river: Arc<dyn River>,
    wind: Arc<dyn Wind>,
    metrics: Arc<Metrics>,
    handles: Mutex<Vec<Consumer>>,
    state: Mutex<RunState>,
}

impl<T: TreeLogic + 'static> TreeRuntime<T> {
    pub fn new(logic: T, river: Arc<dyn River>, wind: Arc<dyn Wind>, metrics: Arc<Metrics>) -> Self {
        Self {
            logic: Arc::new(logic),
            river,
            wind,
            metrics,
            handles: Mutex::new(Vec::new()),
            state: Mutex::new(RunState::Stopped),
        }
    }

    /// Registers a River observer for each declared pattern. No-op if
    /// already running (spec §4.7 applies the same no-op rule to Trees).
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == RunState::Running {
            return Ok(());
        }

        let mut handles = self.handles.lock().await;
        for pattern in self.logic.patterns() {
            let logic = self.logic.clone();
            let wind = self.wind.clone();
            let metrics = self.metrics.clone();
            let name = self.logic.name().to_string();

            let handler = Arc::new(move |record: RiverRecord| {
                let logic = logic.clone();
                let wind = wind.clone();
                let metrics = metrics.clone();
                let name = name.clone();
                Box::pin(async move { handle_record(logic, wind, metrics, &name, record).await })
                    as futures::future::BoxFuture<'static, Result<()>>
            });

            let consumer = self
                .river
                .observe_with_consumer(&pattern, self.logic.name(), handler)
                .await?;
            handles.push(consumer);
        }

        *state = RunState::Running;
        tracing::info!(tree = self.logic.name(), "tree started");
        Ok(())
    }

    /// Releases all observers. Idempotent and safe from any state.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if *state == RunState::Stopped {
            return;
        }

        let mut handles = self.handles.lock().await;
        for handle in handles.iter_mut() {
            handle.stop().await;
        }
        handles.clear();
        *state = RunState::Stopped;
        tracing::info!(tree = self.logic.name(), "tree stopped");
    }
}

async fn handle_record<T: TreeLogic>(
    logic: Arc<T>,
    wind: Arc<dyn Wind>,
    metrics: Arc<Metrics>,
    tree_name: &str,
    record: RiverRecord,
) -> Result<()> {
    let parsed = match logic.parse(&record) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::error!(tree = tree_name, subject = %record.subject, error = %e, "parse failed, record will be redelivered");
            return Err(e);
        }
    };

    let Some(leaf) = parsed else {
        return Ok(());
    };

    if let Err(e) = leaf.validate() {
        tracing::error!(tree = tree_name, error = %e, "tree produced an invalid leaf, dropping");
        return Ok(());
    }

    match wind.drop_leaf(leaf).await {
        Ok(()) => Ok(()),
        Err(e) => {
            // Publish failures are logged as lost, not redelivered: the
            // record is still considered handled (spec §4.6).
            tracing::error!(tree = tree_name, error = %e, "leaf publish failed, parsed record is lost");
            metrics.record_leaf_publish_failed();
            Ok(())
        }
    }
}
