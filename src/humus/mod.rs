//! Humus — durable, strictly-ordered append-only log of state-change
//! proposals (Compost records).

pub mod memory;
pub mod nats;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::lifecycle::Consumer;

/// The action a Compost record proposes against a Soil entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompostAction {
    Create,
    Update,
    Delete,
}

/// One Humus record (spec §3 HumusEntry). `slot` is assigned on append and
/// strictly increasing across the whole stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compost {
    pub nim: String,
    pub entity: String,
    pub action: CompostAction,
    pub data: Bytes,
    pub slot: u64,
    pub timestamp: u64,
}

impl Compost {
    /// `Add` to Humus with `action = delete` and non-empty `data` is
    /// `InvalidInput` (spec §8 boundary behavior).
    pub fn validate(&self) -> Result<()> {
        if self.action == CompostAction::Delete && !self.data.is_empty() {
            return Err(CoreError::InvalidInput(
                "compost delete action must carry empty data".into(),
            ));
        }
        if self.entity.is_empty() {
            return Err(CoreError::InvalidInput("compost entity must not be empty".into()));
        }
        Ok(())
    }
}

/// Invoked once per Compost record in strict slot order. Returning `Ok`
/// acknowledges the record; `Err` re-queues it (spec §4.5).
pub type CompostHandler = Arc<dyn Fn(Compost) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Core Humus contract (spec §4.5).
#[async_trait]
pub trait Humus: Send + Sync {
    /// Appends a Compost record. Returns the assigned monotonic slot on
    /// durable acceptance.
    async fn add(&self, nim: &str, entity: &str, action: CompostAction, data: Bytes) -> Result<u64>;

    /// Creates a consumer invoking `handler` for each record in stream
    /// order, starting from the earliest unacknowledged position.
    async fn decompose(&self, handler: CompostHandler) -> Result<Consumer>;

    /// Durable-named variant; restart resumes at the last acknowledged slot.
    async fn decompose_with_consumer(&self, name: &str, handler: CompostHandler) -> Result<Consumer>;
}
