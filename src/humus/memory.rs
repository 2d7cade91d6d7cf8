//! In-process Humus backend: a Vec-backed log with strict append order and
//! named-consumer cursors, mirroring `river::memory` but without subject
//! filtering — Humus has no per-entity sub-ordering, only the single
//! global slot order (spec §4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

use crate::error::Result;
use crate::humus::{Compost, CompostAction, CompostHandler, Humus};
use crate::leaf::now_millis;
use crate::lifecycle::{Consumer, Handle};
use crate::metrics::Metrics;

#[derive(Default)]
struct Inner {
    records: Vec<Compost>,
    cursors: HashMap<String, u64>,
}

pub struct MemoryHumus {
    inner: Arc<Mutex<Inner>>,
    next_slot: AtomicU64,
    new_record: Arc<Notify>,
    anon_consumer_id: AtomicU64,
    metrics: Arc<Metrics>,
}

impl MemoryHumus {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            next_slot: AtomicU64::new(1),
            new_record: Arc::new(Notify::new()),
            anon_consumer_id: AtomicU64::new(1),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn run_consumer(
        inner: Arc<Mutex<Inner>>,
        new_record: Arc<Notify>,
        name: String,
        handler: CompostHandler,
        stopped: Arc<AtomicBool>,
        stop_notify: Arc<Notify>,
    ) {
        loop {
            if stopped.load(Ordering::SeqCst) {
                return;
            }

            let next = {
                let guard = inner.lock().await;
                let cursor = *guard.cursors.get(&name).unwrap_or(&0);
                guard.records.iter().find(|r| r.slot > cursor).cloned()
            };

            match next {
                Some(record) => {
                    let slot = record.slot;
                    match handler(record).await {
                        Ok(()) => {
                            let mut guard = inner.lock().await;
                            guard.cursors.insert(name.clone(), slot);
                        }
                        Err(e) => {
                            tracing::warn!(consumer = %name, error = %e, "humus handler failed, will redeliver");
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = stop_notify.notified() => return,
                        _ = new_record.notified() => {}
                        _ = tokio::time::sleep(Duration::from_millis(25)) => {}
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Humus for MemoryHumus {
    async fn add(&self, nim: &str, entity: &str, action: CompostAction, data: Bytes) -> Result<u64> {
        let slot = self.next_slot.fetch_add(1, Ordering::SeqCst);
        let record = Compost {
            nim: nim.to_string(),
            entity: entity.to_string(),
            action,
            data,
            slot,
            timestamp: now_millis(),
        };
        record.validate()?;

        self.inner.lock().await.records.push(record);
        self.new_record.notify_waiters();
        self.metrics.record_humus_compost();
        tracing::debug!(nim, entity, slot, "compost appended");
        Ok(slot)
    }

    async fn decompose(&self, handler: CompostHandler) -> Result<Consumer> {
        let id = self.anon_consumer_id.fetch_add(1, Ordering::SeqCst);
        self.decompose_with_consumer(&format!("__ephemeral_{id}"), handler).await
    }

    async fn decompose_with_consumer(&self, name: &str, handler: CompostHandler) -> Result<Consumer> {
        let stopped = Arc::new(AtomicBool::new(false));
        let stop_notify = Arc::new(Notify::new());
        let task = tokio::spawn(Self::run_consumer(
            self.inner.clone(),
            self.new_record.clone(),
            name.to_string(),
            handler,
            stopped.clone(),
            stop_notify.clone(),
        ));

        tracing::info!(consumer = name, "humus decompose consumer created");
        Ok(Handle::new(task, stopped, stop_notify))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as TokioMutex;

    fn humus() -> MemoryHumus {
        MemoryHumus::new(Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn add_rejects_delete_with_data() {
        let humus = humus();
        let err = humus
            .add("payment-nim", "task:1", CompostAction::Delete, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn slots_increase_strictly() {
        let humus = humus();
        let s1 = humus.add("payment-nim", "task:1", CompostAction::Create, Bytes::new()).await.unwrap();
        let s2 = humus.add("payment-nim", "task:2", CompostAction::Create, Bytes::new()).await.unwrap();
        assert!(s2 > s1);
    }

    #[tokio::test]
    async fn decompose_observes_strict_slot_order() {
        let humus = Arc::new(humus());
        for i in 0..5u32 {
            humus
                .add("payment-nim", &format!("task:{i}"), CompostAction::Create, Bytes::new())
                .await
                .unwrap();
        }

        let seen = Arc::new(TokioMutex::new(Vec::new()));
        let seen2 = seen.clone();
        let handler: CompostHandler = Arc::new(move |record| {
            let seen = seen2.clone();
            Box::pin(async move {
                seen.lock().await.push(record.slot);
                Ok(())
            })
        });

        let mut consumer = humus.decompose_with_consumer("applier", handler).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        consumer.stop().await;

        assert_eq!(*seen.lock().await, vec![1, 2, 3, 4, 5]);
    }
}
