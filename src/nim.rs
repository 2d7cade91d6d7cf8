//! Nim — business-logic processor consuming Leaves on Wind (spec §4.7).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::humus::{CompostAction, Humus};
use crate::leaf::Leaf;
use crate::lifecycle::{RunState, Subscription};
use crate::metrics::Metrics;
use crate::soil::Soil;
use crate::wind::Wind;

/// Helpers available to every Nim's `handle` body (spec §4.7 base
/// implementation helpers).
pub struct NimContext {
    name: String,
    wind: Arc<dyn Wind>,
    humus: Arc<dyn Humus>,
    soil: Arc<dyn Soil>,
}

impl NimContext {
    pub fn new(name: impl Into<String>, wind: Arc<dyn Wind>, humus: Arc<dyn Humus>, soil: Arc<dyn Soil>) -> Self {
        Self { name: name.into(), wind, humus, soil }
    }

    /// `EmitLeaf(subject, data)`.
    pub async fn emit_leaf(&self, subject: &str, data: impl Into<Bytes>) -> Result<()> {
        self.wind.drop_leaf(Leaf::new(subject, data.into(), self.name.clone())).await
    }

    /// `Compost(entity, action, data) -> slot`.
    pub async fn compost(&self, entity: &str, action: CompostAction, data: impl Into<Bytes>) -> Result<u64> {
        self.humus.add(&self.name, entity, action, data.into()).await
    }

    /// `ReadState(entity) -> (data, revision)`.
    pub async fn read_state(&self, entity: &str) -> Result<(Bytes, u64)> {
        let entry = self.soil.dig(entity).await?;
        Ok((entry.data, entry.revision))
    }

    /// `WriteState(entity, data, revision)`.
    ///
    /// Spec §4.7 lists this helper in the same breath as "must not write
    /// Soil directly; all state mutations flow through Humus" — so this is
    /// sugar over `compost`, not a Soil write. It returns the Humus slot
    /// the proposal landed at, not a Soil revision; the caller's `revision`
    /// selects `create` (0) vs `update` (nonzero), matching `Bury`'s own
    /// convention.
    pub async fn write_state(&self, entity: &str, data: impl Into<Bytes>, revision: u64) -> Result<u64> {
        let action = if revision == 0 { CompostAction::Create } else { CompostAction::Update };
        self.compost(entity, action, data).await
    }
}

/// Capability set every Nim implements (spec §4.7).
#[async_trait]
pub trait NimLogic: Send + Sync {
    fn name(&self) -> &str;

    /// Wind subject patterns to catch.
    fn subjects(&self) -> Vec<String>;

    /// Load-balanced group name. Default `None` — spec §9 open question 3
    /// permits it optionally, default off.
    fn group(&self) -> Option<String> {
        None
    }

    async fn handle(&self, ctx: &NimContext, leaf: Leaf) -> Result<()>;
}

/// Base runtime shared by every Nim: subscribes to each declared subject
/// (optionally load-balanced), drives `Handle` per Leaf, and tracks the
/// trivial `{Stopped, Running}` state machine.
pub struct NimRuntime<T: NimLogic> {
    logic: Arc<T>,
    wind: Arc<dyn Wind>,
    context: Arc<NimContext>,
    metrics: Arc<Metrics>,
    handles: Mutex<Vec<Subscription>>,
    state: Mutex<RunState>,
}

impl<T: NimLogic + 'static> NimRuntime<T> {
    pub fn new(
        logic: T,
        wind: Arc<dyn Wind>,
        humus: Arc<dyn Humus>,
        soil: Arc<dyn Soil>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let context = Arc::new(NimContext::new(logic.name().to_string(), wind.clone(), humus, soil));
        Self {
            logic: Arc::new(logic),
            wind,
            context,
            metrics,
            handles: Mutex::new(Vec::new()),
            state: Mutex::new(RunState::Stopped),
        }
    }

    /// Starting an already-running Nim is a no-op (spec §4.7).
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == RunState::Running {
            return Ok(());
        }

        let mut handles = self.handles.lock().await;
        for subject in self.logic.subjects() {
            let logic = self.logic.clone();
            let context = self.context.clone();
            let metrics = self.metrics.clone();
            let name = self.logic.name().to_string();

            let handler = Arc::new(move |leaf: Leaf| {
                let logic = logic.clone();
                let context = context.clone();
                let metrics = metrics.clone();
                let name = name.clone();
                Box::pin(async move {
                    if let Err(e) = logic.handle(&context, leaf).await {
                        // Wind is at-most-once; there is no automatic
                        // retry, so a handler error is logged and dropped
                        // (spec §4.7 failure policy).
                        tracing::error!(nim = name, error = %e, "nim handler failed, leaf dropped");
                        metrics.record_handler_error();
                    }
                }) as futures::future::BoxFuture<'static, ()>
            });

            let subscription = match self.logic.group() {
                Some(group) => self.wind.catch_group(&subject, &group, handler).await?,
                None => self.wind.catch(&subject, handler).await?,
            };
            handles.push(subscription);
        }

        *state = RunState::Running;
        tracing::info!(nim = self.logic.name(), "nim started");
        Ok(())
    }

    /// Releases all subscriptions; pending handler invocations are allowed
    /// to complete within the grace period. Stopping a stopped Nim is a
    /// no-op.
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
        tracing::info!(nim = self.logic.name(), "nim stopped");
    }
}
