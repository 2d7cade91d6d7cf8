//! Soil — key/value store of current state with per-key optimistic
//! concurrency.

pub mod memory;
pub mod nats;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lifecycle::Consumer as Watcher;

/// Current value and revision for one Soil key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoilEntry {
    pub data: Bytes,
    pub revision: u64,
}

/// Kind of change a Watch handler observes (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SoilOp {
    Put,
    Delete,
}

/// One Watch notification: the new value (empty for `Delete`), its
/// revision, and the operation kind.
#[derive(Debug, Clone)]
pub struct SoilChange {
    pub entity: String,
    pub data: Bytes,
    pub revision: u64,
    pub op: SoilOp,
}

pub type WatchHandler = Arc<dyn Fn(SoilChange) -> BoxFuture<'static, ()> + Send + Sync>;

/// Core Soil contract (spec §4.4).
#[async_trait]
pub trait Soil: Send + Sync {
    /// Returns the current value and revision, or `NotFound`.
    async fn dig(&self, entity: &str) -> Result<SoilEntry>;

    /// Compare-and-swap write. Succeeds iff the current revision equals
    /// `expected_revision`; `expected_revision = 0` means "create if
    /// absent". On success the new entry has revision `expected_revision+1`.
    async fn bury(&self, entity: &str, data: Bytes, expected_revision: u64) -> Result<u64>;

    /// Unconditional write; last-writer-wins. Use only where that's
    /// explicitly acceptable.
    async fn put(&self, entity: &str, data: Bytes) -> Result<u64>;

    /// Removes the entry; subsequent `dig` calls return `NotFound`.
    async fn delete(&self, entity: &str) -> Result<()>;

    /// Invokes `handler` for every change matching `pattern`. Emits an
    /// initial snapshot of current matching keys before streaming live
    /// changes (spec §4.4).
    async fn watch(&self, pattern: &str, handler: WatchHandler) -> Result<Watcher>;

    /// Snapshot of current keys.
    async fn keys(&self) -> Result<Vec<String>>;
}
