//! Wind — ephemeral, wildcard-capable pub/sub of Leaves. At-most-once.

pub mod memory;
pub mod nats;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::leaf::Leaf;
use crate::lifecycle::Subscription;

/// Invoked once per inbound Leaf whose subject matches the subscription's
/// pattern. Leaves that fail deserialization never reach a handler (spec
/// §4.2): that filtering happens before the handler is called, so the
/// handler only ever sees well-formed Leaves.
pub type LeafHandler = Arc<dyn Fn(Leaf) -> BoxFuture<'static, ()> + Send + Sync>;

/// Core Wind contract (spec §4.2).
#[async_trait]
pub trait Wind: Send + Sync {
    /// Validate, serialize, and publish `leaf` under `leaf.subject`.
    /// Fire-and-forget: no delivery confirmation to any subscriber.
    async fn drop_leaf(&self, leaf: Leaf) -> Result<()>;

    /// Subscribe to a subject pattern (`*` single-token, `>` multi-token
    /// suffix). `handler` is invoked for each matching Leaf.
    async fn catch(&self, pattern: &str, handler: LeafHandler) -> Result<Subscription>;

    /// Like `catch`, but among subscribers sharing `group` the broker
    /// delivers each message to exactly one of them.
    async fn catch_group(
        &self,
        pattern: &str,
        group: &str,
        handler: LeafHandler,
    ) -> Result<Subscription>;
}
