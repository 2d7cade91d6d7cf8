//! In-process Soil backend: a `HashMap` plus a monotonic per-key revision
//! counter and a bounded audit history, matching spec §4.4's invariant that
//! "history depth is finite."

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

use crate::error::{CoreError, Result};
use crate::lifecycle::{Consumer as Watcher, Handle};
use crate::metrics::Metrics;
use crate::soil::{Soil, SoilChange, SoilEntry, SoilOp, WatchHandler};
use crate::subject;

const DEFAULT_HISTORY_DEPTH: usize = 10;

struct WatcherEntry {
    id: u64,
    pattern: String,
    handler: WatchHandler,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, SoilEntry>,
    history: HashMap<String, VecDeque<SoilEntry>>,
    watchers: Vec<WatcherEntry>,
}

pub struct MemorySoil {
    inner: Arc<Mutex<Inner>>,
    next_watcher_id: AtomicU64,
    history_depth: usize,
    metrics: Arc<Metrics>,
}

impl MemorySoil {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self::with_history_depth(DEFAULT_HISTORY_DEPTH, metrics)
    }

    pub fn with_history_depth(history_depth: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            next_watcher_id: AtomicU64::new(1),
            history_depth,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Bounded audit trail for a key, oldest first, most recent last.
    pub async fn history(&self, entity: &str) -> Vec<SoilEntry> {
        self.inner
            .lock()
            .await
            .history
            .get(entity)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn record_and_notify(inner: &mut Inner, history_depth: usize, entity: &str, entry: SoilEntry, op: SoilOp) {
        let history = inner.history.entry(entity.to_string()).or_default();
        history.push_back(entry.clone());
        while history.len() > history_depth {
            history.pop_front();
        }

        let change = SoilChange {
            entity: entity.to_string(),
            data: entry.data.clone(),
            revision: entry.revision,
            op,
        };

        for watcher in inner.watchers.iter().filter(|w| subject::matches(&w.pattern, entity)) {
            tokio::spawn((watcher.handler)(change.clone()));
        }
    }
}

#[async_trait]
impl Soil for MemorySoil {
    async fn dig(&self, entity: &str) -> Result<SoilEntry> {
        self.inner
            .lock()
            .await
            .entries
            .get(entity)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(entity.to_string()))
    }

    async fn bury(&self, entity: &str, data: Bytes, expected_revision: u64) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let current = inner.entries.get(entity).cloned();

        let new_revision = match current {
            None => {
                if expected_revision != 0 {
                    return Err(CoreError::NotFound(entity.to_string()));
                }
                1
            }
            Some(ref existing) => {
                if existing.revision != expected_revision {
                    self.metrics.record_soil_cas_conflict();
                    return Err(CoreError::RevisionMismatch {
                        entity: entity.to_string(),
                        expected: expected_revision,
                        actual: existing.revision,
                    });
                }
                existing.revision + 1
            }
        };

        let entry = SoilEntry { data, revision: new_revision };
        inner.entries.insert(entity.to_string(), entry.clone());
        Self::record_and_notify(&mut inner, self.history_depth, entity, entry, SoilOp::Put).await;

        tracing::debug!(entity, revision = new_revision, "soil bury succeeded");
        Ok(new_revision)
    }

    async fn put(&self, entity: &str, data: Bytes) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let new_revision = inner.entries.get(entity).map(|e| e.revision + 1).unwrap_or(1);
        let entry = SoilEntry { data, revision: new_revision };
        inner.entries.insert(entity.to_string(), entry.clone());
        Self::record_and_notify(&mut inner, self.history_depth, entity, entry, SoilOp::Put).await;
        Ok(new_revision)
    }

    async fn delete(&self, entity: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.entries.remove(entity) {
            let tombstone = SoilEntry {
                data: Bytes::new(),
                revision: existing.revision + 1,
            };
            Self::record_and_notify(&mut inner, self.history_depth, entity, tombstone, SoilOp::Delete).await;
        }
        Ok(())
    }

    async fn watch(&self, pattern: &str, handler: WatchHandler) -> Result<Watcher> {
        let id = self.next_watcher_id.fetch_add(1, Ordering::SeqCst);

        {
            let inner = self.inner.lock().await;
            for (entity, entry) in inner.entries.iter().filter(|(k, _)| subject::matches(pattern, k)) {
                let change = SoilChange {
                    entity: entity.clone(),
                    data: entry.data.clone(),
                    revision: entry.revision,
                    op: SoilOp::Put,
                };
                tokio::spawn((handler)(change));
            }
        }

        {
            let mut inner = self.inner.lock().await;
            inner.watchers.push(WatcherEntry {
                id,
                pattern: pattern.to_string(),
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
            inner.watchers.retain(|w| w.id != id);
        });

        Ok(Handle::new(task, stopped, notify))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().await.entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soil() -> MemorySoil {
        MemorySoil::new(Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn bury_with_zero_creates_new_key() {
        let soil = soil();
        let rev = soil.bury("task:1", Bytes::from_static(b"{}"), 0).await.unwrap();
        assert_eq!(rev, 1);
    }

    #[tokio::test]
    async fn bury_on_existing_key_with_zero_is_mismatch() {
        let soil = soil();
        soil.bury("task:1", Bytes::from_static(b"{}"), 0).await.unwrap();
        let err = soil.bury("task:1", Bytes::from_static(b"{}"), 0).await.unwrap_err();
        assert!(matches!(err, CoreError::RevisionMismatch { .. }));
    }

    #[tokio::test]
    async fn bury_advances_revision_by_one() {
        let soil = soil();
        let rev1 = soil.bury("task:1", Bytes::from_static(b"a"), 0).await.unwrap();
        let rev2 = soil.bury("task:1", Bytes::from_static(b"b"), rev1).await.unwrap();
        assert_eq!(rev2, rev1 + 1);
    }

    #[tokio::test]
    async fn concurrent_bury_exactly_one_wins() {
        let soil = Arc::new(soil());
        soil.bury("task:1", Bytes::from_static(b"a"), 0).await.unwrap();

        let soil_a = soil.clone();
        let soil_b = soil.clone();
        let (ra, rb) = tokio::join!(
            soil_a.bury("task:1", Bytes::from_static(b"b"), 1),
            soil_b.bury("task:1", Bytes::from_static(b"c"), 1),
        );

        let successes = [ra.is_ok(), rb.is_ok()].iter().filter(|&&x| x).count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn dig_missing_key_is_not_found() {
        let soil = soil();
        assert!(matches!(soil.dig("missing").await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_then_dig_is_not_found() {
        let soil = soil();
        soil.bury("task:1", Bytes::from_static(b"a"), 0).await.unwrap();
        soil.delete("task:1").await.unwrap();
        assert!(matches!(soil.dig("task:1").await, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_missing_key_is_success() {
        let soil = soil();
        assert!(soil.delete("never-existed").await.is_ok());
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let soil = MemorySoil::with_history_depth(2, Arc::new(Metrics::new()));
        let mut rev = soil.bury("task:1", Bytes::from_static(b"a"), 0).await.unwrap();
        for i in 0..5 {
            rev = soil.bury("task:1", Bytes::from(i.to_string()), rev).await.unwrap();
        }
        assert_eq!(soil.history("task:1").await.len(), 2);
    }
}
