//! River — durable, replayable ingress stream of raw payloads.

pub mod memory;
pub mod nats;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::lifecycle::Consumer;

/// One raw ingress item (spec §3). `stream_sequence` is assigned by River
/// on acceptance, never by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiverRecord {
    pub subject: String,
    pub data: Bytes,
    pub stream_sequence: u64,
}

/// Invoked once per River record whose subject matches an observer's
/// pattern. Returning `Ok` acknowledges the record; returning `Err` causes
/// the broker to redeliver it (spec §4.3: "an error re-queues the record
/// subject to broker retry/backoff").
pub type RiverHandler = Arc<dyn Fn(RiverRecord) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Core River contract (spec §4.3).
#[async_trait]
pub trait River: Send + Sync {
    /// Append `data` under `subject` (must lie under the reserved ingress
    /// namespace `river.>`). Returns the assigned `stream_sequence` on
    /// durable acceptance.
    async fn flow(&self, subject: &str, data: Bytes) -> Result<u64>;

    /// Create or bind an ephemeral durable consumer invoking `handler` for
    /// each record whose subject matches `pattern`.
    async fn observe(&self, pattern: &str, handler: RiverHandler) -> Result<Consumer>;

    /// Like `observe`, but with an explicit durable consumer name so
    /// restarts resume from the last acknowledged position.
    async fn observe_with_consumer(
        &self,
        pattern: &str,
        name: &str,
        handler: RiverHandler,
    ) -> Result<Consumer>;
}
