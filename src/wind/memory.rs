//! In-process Wind backend.
//!
//! Grounded on the teacher's implied `MemoryProvider` (referenced throughout
//! `tests/memory_integration.rs` but not present in the retrieved source):
//! in-process state behind a provider-shaped API so the crate's own test
//! suite runs without a live broker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::Result;
use crate::leaf::Leaf;
use crate::lifecycle::{Handle, Subscription};
use crate::metrics::Metrics;
use crate::subject;
use crate::wind::{LeafHandler, Wind};

struct SubEntry {
    id: u64,
    pattern: String,
    group: Option<String>,
    handler: LeafHandler,
}

#[derive(Default)]
struct Inner {
    subscribers: Vec<SubEntry>,
    group_cursors: HashMap<String, usize>,
}

/// In-memory, single-process Wind: best-effort at-most-once delivery with
/// the same wildcard and load-balanced-group semantics as the NATS backend.
pub struct MemoryWind {
    inner: Arc<Mutex<Inner>>,
    next_id: AtomicU64,
    metrics: Arc<Metrics>,
}

impl MemoryWind {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            next_id: AtomicU64::new(1),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn subscribe_inner(&self, pattern: &str, group: Option<String>, handler: LeafHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut inner = self.inner.lock().await;
            inner.subscribers.push(SubEntry {
                id,
                pattern: pattern.to_string(),
                group,
                handler,
            });
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let registry = self.inner.clone();
        let notify_wait = notify.clone();
        let task = tokio::spawn(async move {
            notify_wait.notified().await;
            let mut inner = registry.lock().await;
            inner.subscribers.retain(|s| s.id != id);
        });

        Handle::new(task, stopped, notify)
    }
}

#[async_trait]
impl Wind for MemoryWind {
    async fn drop_leaf(&self, leaf: Leaf) -> Result<()> {
        leaf.validate()?;

        let inner = self.inner.lock().await;
        let matching: Vec<&SubEntry> = inner
            .subscribers
            .iter()
            .filter(|s| subject::matches(&s.pattern, &leaf.subject))
            .collect();

        // Ungrouped subscribers all receive the Leaf; grouped subscribers
        // compete, one winner per group (spec §4.2 CatchGroup).
        let mut by_group: HashMap<String, Vec<&SubEntry>> = HashMap::new();
        for entry in &matching {
            match &entry.group {
                None => {
                    tokio::spawn((entry.handler)(leaf.clone()));
                }
                Some(group) => {
                    by_group.entry(group.clone()).or_default().push(entry);
                }
            }
        }

        drop(inner);
        if !by_group.is_empty() {
            let mut inner = self.inner.lock().await;
            for (group, entries) in by_group {
                let cursor = inner.group_cursors.entry(group).or_insert(0);
                let winner = entries[*cursor % entries.len()];
                *cursor = cursor.wrapping_add(1);
                tokio::spawn((winner.handler)(leaf.clone()));
            }
        }

        self.metrics.record_leaf_published();
        tracing::debug!(subject = %leaf.subject, "leaf dropped on wind");
        Ok(())
    }

    async fn catch(&self, pattern: &str, handler: LeafHandler) -> Result<Subscription> {
        Ok(self.subscribe_inner(pattern, None, handler).await)
    }

    async fn catch_group(
        &self,
        pattern: &str,
        group: &str,
        handler: LeafHandler,
    ) -> Result<Subscription> {
        Ok(self.subscribe_inner(pattern, Some(group.to_string()), handler).await)
    }
}
