//! Job queue contract and a local, in-process implementation.
//!
//! Delivery is at-least-once and unordered: the scheduler never relies on a
//! task running exactly once, or before or after any other task.

use crate::error::{QueueError, QueueResult};
use crate::stage::StageTask;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Fire-and-forget dispatch of stage tasks
#[async_trait]
pub trait JobQueue: Send + Sync + std::fmt::Debug {
    /// Schedule `task`, optionally no earlier than `delay` from now
    async fn enqueue(&self, task: StageTask, delay: Option<Duration>) -> QueueResult<()>;
}

/// A task waiting in a [`MemoryJobQueue`]
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTask {
    pub task: StageTask,
    pub delay: Option<Duration>,
    pub not_before: Instant,
}

/// Queue held in process memory.
///
/// Workers pull due tasks with [`MemoryJobQueue::wait_next`]; tests usually
/// inspect and replay tasks with [`MemoryJobQueue::drain_all`] instead.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    pending: Mutex<VecDeque<QueuedTask>>,
    notify: Notify,
    closed: AtomicBool,
    enqueued_total: AtomicU64,
    failing_enqueues: AtomicUsize,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting, due or not
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn enqueued_total(&self) -> u64 {
        self.enqueued_total.load(Ordering::Relaxed)
    }

    /// Remove every pending task regardless of its delay
    pub async fn drain_all(&self) -> Vec<QueuedTask> {
        self.pending.lock().await.drain(..).collect()
    }

    /// Pop the earliest-enqueued task that is due, if any
    pub async fn next_ready(&self) -> Option<StageTask> {
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        let index = pending.iter().position(|t| t.not_before <= now)?;
        pending.remove(index).map(|t| t.task)
    }

    /// Wait until a task is due and pop it. Returns `None` once the queue is
    /// closed.
    pub async fn wait_next(&self) -> Option<StageTask> {
        loop {
            // Register interest before looking so an enqueue or close between
            // the check and the await is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            let earliest = {
                let now = Instant::now();
                let mut pending = self.pending.lock().await;
                if let Some(index) = pending.iter().position(|t| t.not_before <= now) {
                    return pending.remove(index).map(|t| t.task);
                }
                pending.iter().map(|t| t.not_before).min()
            };

            match earliest {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Stop accepting tasks and release every waiting worker
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Make the next `count` enqueues fail with a transient error
    pub fn fail_next_enqueues(&self, count: usize) {
        self.failing_enqueues.store(count, Ordering::Release);
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_enqueues
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, task: StageTask, delay: Option<Duration>) -> QueueResult<()> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        if self.take_injected_failure() {
            warn!(stage = task.stage.name(), "Injected queue failure");
            return Err(QueueError::Unavailable("injected failure".to_string()));
        }
        debug!(layer = %task.layer_id, stage = task.stage.name(), ?delay, "Enqueued task");
        let not_before = Instant::now() + delay.unwrap_or_default();
        self.pending.lock().await.push_back(QueuedTask {
            task,
            delay,
            not_before,
        });
        self.enqueued_total.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(())
    }
}
