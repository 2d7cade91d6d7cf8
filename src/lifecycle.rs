//! Shared lifecycle plumbing for Wind subscriptions and River/Humus consumers.
//!
//! Spec §3 describes a Wind `Subscription` and separately River/Humus
//! `Consumer`s with the same shape: an owned binding, backed by a background
//! worker, released idempotently by `Stop`/`Unsubscribe`. Both are the same
//! `Handle` here so the idempotency and grace-period logic lives once,
//! mirroring how the teacher centralizes ack/nak callbacks in one
//! `PendingEvent` type instead of duplicating them per provider.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Default grace period components wait for an in-flight handler to finish
/// before abandoning it on `Stop` (spec §9 retry-budget defaults).
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A released, idempotent handle to a background worker.
///
/// Used as both Wind's `Subscription` and River/Humus's `Consumer` — spec §3
/// gives them identical lifecycle semantics, so one type serves both roles.
pub struct Handle {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
    task: Option<JoinHandle<()>>,
    grace_period: Duration,
}

/// Alias used at Wind call sites.
pub type Subscription = Handle;
/// Alias used at River/Humus call sites.
pub type Consumer = Handle;

impl Handle {
    /// Wrap a spawned worker task. `stopped` is the flag the worker's loop
    /// polls between units of work (spec §5's cooperative cancellation);
    /// `notify` wakes a worker blocked waiting for the next unit of work so
    /// it can observe `stopped` promptly instead of on its next broker poll.
    pub fn new(task: JoinHandle<()>, stopped: Arc<AtomicBool>, notify: Arc<Notify>) -> Self {
        Self {
            stopped,
            notify,
            task: Some(task),
            grace_period: DEFAULT_STOP_GRACE_PERIOD,
        }
    }

    /// Override the default grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Idempotent: calling `stop` twice has the same observable effect as
    /// calling it once (spec §8 property 5).
    pub async fn stop(&mut self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();

        if let Some(task) = self.task.take() {
            match tokio::time::timeout(self.grace_period, task).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("worker did not stop within grace period, aborting");
                }
            }
        }
    }

    /// True once `stop` has completed (or a redundant `stop` was called).
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Run state shared by Tree and Nim base implementations (spec §4.6/§4.7:
/// `{Stopped, Running}`, start/stop on an already-transitioned instance is
/// a no-op).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

/// Decomposer's three-state machine (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecomposerState {
    Idle,
    Running,
    Stopping,
}
