//! Workers that pull stage tasks from a [`MemoryJobQueue`] and run them.

use crate::queue::MemoryJobQueue;
use crate::scheduler::BakeScheduler;
use crate::stage::StageOutcome;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Tasks handled by one worker (or one drain) before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub tasks_run: u64,
    pub tasks_failed: u64,
    /// Tasks that were rescheduled rather than finished
    pub tasks_rescheduled: u64,
}

impl WorkerStats {
    fn record(&mut self, result: &Result<StageOutcome, crate::error::BakeError>) {
        self.tasks_run += 1;
        match result {
            Ok(StageOutcome::Completed) => {}
            Ok(_) => self.tasks_rescheduled += 1,
            Err(_) => self.tasks_failed += 1,
        }
    }

    pub fn merge(&mut self, other: WorkerStats) {
        self.tasks_run += other.tasks_run;
        self.tasks_failed += other.tasks_failed;
        self.tasks_rescheduled += other.tasks_rescheduled;
    }
}

/// Runs due tasks until the queue closes or `shutdown` flips to `true`.
///
/// A failed task is logged and dropped; the scheduler has already scheduled
/// whatever retry it could.
pub async fn run_worker(
    id: usize,
    scheduler: Arc<BakeScheduler>,
    queue: Arc<MemoryJobQueue>,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    info!(worker = id, "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        let task = tokio::select! {
            task = queue.wait_next() => match task {
                Some(task) => task,
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        let result = scheduler.run_task(&task).await;
        match &result {
            Ok(outcome) => {
                debug!(worker = id, layer = %task.layer_id, stage = %task.stage, ?outcome, "Task finished")
            }
            Err(error) => {
                error!(worker = id, layer = %task.layer_id, stage = %task.stage, %error, "Task failed")
            }
        }
        stats.record(&result);
    }

    info!(worker = id, tasks = stats.tasks_run, failed = stats.tasks_failed, "Worker stopped");
    stats
}

/// Runs every pending task, delayed or not, including the ones they
/// schedule, until the queue is empty or `max_tasks` have run.
///
/// Ignoring delays makes this a deterministic driver for tests and batch
/// runs.
pub async fn run_until_idle(scheduler: &BakeScheduler, queue: &MemoryJobQueue, max_tasks: u64) -> WorkerStats {
    let mut stats = WorkerStats::default();
    loop {
        let batch = queue.drain_all().await;
        if batch.is_empty() {
            break;
        }
        for queued in batch {
            if stats.tasks_run >= max_tasks {
                error!(max_tasks, "Task limit reached with work still pending");
                return stats;
            }
            let result = scheduler.run_task(&queued.task).await;
            if let Err(error) = &result {
                error!(layer = %queued.task.layer_id, stage = %queued.task.stage, %error, "Task failed");
            }
            stats.record(&result);
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BakerSettings;
    use crate::geo::GeoPoint;
    use crate::model::{Entity, Layer};
    use crate::queue::JobQueue;
    use crate::stage::{StageTask, SubdivideParams};
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn setup(count: usize) -> (Arc<MemoryStore>, Arc<MemoryJobQueue>, Arc<BakeScheduler>, Layer) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let layer = Layer::auto_managed("peaks").with_division_size(5);
        store.insert_layer(layer.clone());
        store.insert_entities((0..count).map(|i| {
            Entity::new(
                layer.id,
                format!("peak {}", i),
                (i % 17) as f64,
                GeoPoint::new(-60.0 + (i % 120) as f64, -179.0 + (i * 13 % 358) as f64),
            )
        }));
        let settings = BakerSettings {
            monitor_delay_secs: 0,
            ..BakerSettings::default()
        };
        let scheduler = Arc::new(BakeScheduler::new(store.clone(), queue.clone(), settings));
        (store, queue, scheduler, layer)
    }

    #[tokio::test]
    async fn test_run_until_idle_finishes_a_bake() {
        let (store, queue, scheduler, layer) = setup(50);
        scheduler.start_bake(layer.id).await.unwrap();

        let stats = run_until_idle(&scheduler, &queue, 10_000).await;
        assert_eq!(stats.tasks_failed, 0);
        assert!(stats.tasks_run > 3);

        let layer = store.layer(layer.id).unwrap();
        assert!(layer.baked);
        assert!(!layer.busy);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_workers_bake_and_stop_on_shutdown() {
        let (store, queue, scheduler, layer) = setup(80);
        let (tx, rx) = watch::channel(false);
        let workers: Vec<_> = (0..3)
            .map(|id| tokio::spawn(run_worker(id, scheduler.clone(), queue.clone(), rx.clone())))
            .collect();

        scheduler.start_bake(layer.id).await.unwrap();
        tokio::time::timeout(Duration::from_secs(10), async {
            while !store.layer(layer.id).map(|l| l.baked).unwrap_or(false) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tx.send(true).unwrap();
        let mut total = WorkerStats::default();
        for worker in workers {
            total.merge(worker.await.unwrap());
        }
        assert_eq!(total.tasks_failed, 0);
        assert!(total.tasks_run > 0);
    }

    #[tokio::test]
    async fn test_worker_exits_when_queue_closes() {
        let (_store, queue, scheduler, _layer) = setup(0);
        let (_tx, rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(0, scheduler, queue.clone(), rx));
        queue.close();
        let stats = worker.await.unwrap();
        assert_eq!(stats, WorkerStats::default());
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let (_store, queue, scheduler, layer) = setup(0);
        let mut params = SubdivideParams::root();
        params.checkpoint_division_id = Some(crate::model::DivisionId::new());
        queue.enqueue(StageTask::subdivide(layer.id, params), None).await.unwrap();
        queue.enqueue(StageTask::monitor(layer.id), None).await.unwrap();

        let stats = run_until_idle(&scheduler, &queue, 10).await;
        assert_eq!(stats.tasks_run, 2);
        assert_eq!(stats.tasks_failed, 1);
    }
}
