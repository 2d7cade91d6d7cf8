//! In-process River backend: a Vec-backed log with named-consumer cursors.
//!
//! Grounded on the teacher's implied `MemoryProvider` plus spec §8 scenario
//! S6 (replay after restart with a durable consumer name) — the cursor map
//! is keyed by consumer name and survives for the lifetime of the
//! `MemoryRiver` value, so handing the same `Arc<MemoryRiver>` to a new
//! `Consumer` after a previous one stopped resumes from the last ack.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

use crate::error::Result;
use crate::lifecycle::{Consumer, Handle};
use crate::metrics::Metrics;
use crate::river::{River, RiverHandler, RiverRecord};
use crate::subject;

#[derive(Default)]
struct Inner {
    records: Vec<RiverRecord>,
    cursors: HashMap<String, u64>,
}

pub struct MemoryRiver {
    inner: Arc<Mutex<Inner>>,
    next_seq: AtomicU64,
    new_record: Arc<Notify>,
    anon_consumer_id: AtomicU64,
    metrics: Arc<Metrics>,
}

impl MemoryRiver {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            next_seq: AtomicU64::new(1),
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
        pattern: String,
        name: String,
        handler: RiverHandler,
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
                guard
                    .records
                    .iter()
                    .find(|r| r.stream_sequence > cursor && subject::matches(&pattern, &r.subject))
                    .cloned()
            };

            match next {
                Some(record) => {
                    let seq = record.stream_sequence;
                    match handler(record).await {
                        Ok(()) => {
                            let mut guard = inner.lock().await;
                            guard.cursors.insert(name.clone(), seq);
                        }
                        Err(e) => {
                            tracing::warn!(consumer = %name, error = %e, "river handler failed, will redeliver");
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
impl River for MemoryRiver {
    async fn flow(&self, subject: &str, data: Bytes) -> Result<u64> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let record = RiverRecord {
            subject: subject.to_string(),
            data,
            stream_sequence: seq,
        };
        self.inner.lock().await.records.push(record);
        self.new_record.notify_waiters();
        self.metrics.record_river_flow();
        tracing::debug!(subject, sequence = seq, "river flow accepted");
        Ok(seq)
    }

    async fn observe(&self, pattern: &str, handler: RiverHandler) -> Result<Consumer> {
        let id = self.anon_consumer_id.fetch_add(1, Ordering::SeqCst);
        self.observe_with_consumer(pattern, &format!("__ephemeral_{id}"), handler).await
    }

    async fn observe_with_consumer(
        &self,
        pattern: &str,
        name: &str,
        handler: RiverHandler,
    ) -> Result<Consumer> {
        let stopped = Arc::new(AtomicBool::new(false));
        let stop_notify = Arc::new(Notify::new());
        let task = tokio::spawn(Self::run_consumer(
            self.inner.clone(),
            self.new_record.clone(),
            pattern.to_string(),
            name.to_string(),
            handler,
            stopped.clone(),
            stop_notify.clone(),
        ));

        tracing::info!(consumer = name, filter = pattern, "river consumer created");
        Ok(Handle::new(task, stopped, stop_notify))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as TokioMutex;

    fn river() -> MemoryRiver {
        MemoryRiver::new(Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn flow_assigns_increasing_sequences() {
        let river = river();
        let s1 = river.flow("river.stripe.webhook", Bytes::from_static(b"a")).await.unwrap();
        let s2 = river.flow("river.stripe.webhook", Bytes::from_static(b"b")).await.unwrap();
        assert!(s2 > s1);
    }

    #[tokio::test]
    async fn observer_sees_record_at_least_once() {
        let river = Arc::new(river());
        let seen = Arc::new(TokioMutex::new(Vec::new()));
        let seen2 = seen.clone();

        let handler: RiverHandler = Arc::new(move |record| {
            let seen = seen2.clone();
            Box::pin(async move {
                seen.lock().await.push(record.stream_sequence);
                Ok(())
            })
        });

        let mut consumer = river.observe_with_consumer("river.>", "test-consumer", handler).await.unwrap();
        river.flow("river.stripe.webhook", Bytes::from_static(b"x")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        consumer.stop().await;
        assert_eq!(*seen.lock().await, vec![1]);
    }

    #[tokio::test]
    async fn restart_resumes_from_last_ack() {
        let river = Arc::new(river());
        for i in 0..5u32 {
            river.flow("river.stripe.webhook", Bytes::from(i.to_string())).await.unwrap();
        }

        let applied = Arc::new(AtomicUsize::new(0));
        let applied2 = applied.clone();
        let handler: RiverHandler = Arc::new(move |_record| {
            let applied = applied2.clone();
            Box::pin(async move {
                let n = applied.fetch_add(1, Ordering::SeqCst);
                // Stop after the third record by erroring on later ones so
                // cursor halts at 3.
                if n >= 2 {
                    return Err(crate::error::CoreError::Cancelled);
                }
                Ok(())
            })
        });

        let mut consumer = river.observe_with_consumer("river.>", "restartable", handler).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        consumer.stop().await;

        let cursor = *river.inner.lock().await.cursors.get("restartable").unwrap();
        assert_eq!(cursor, 2);

        let remaining = Arc::new(TokioMutex::new(Vec::new()));
        let remaining2 = remaining.clone();
        let handler2: RiverHandler = Arc::new(move |record| {
            let remaining = remaining2.clone();
            Box::pin(async move {
                remaining.lock().await.push(record.stream_sequence);
                Ok(())
            })
        });

        let mut consumer2 = river.observe_with_consumer("river.>", "restartable", handler2).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        consumer2.stop().await;

        assert_eq!(*remaining.lock().await, vec![3, 4, 5]);
    }
}
