//! Bakery: bakes a synthetic auto-managed layer end to end.
//!
//! Seeds an in-memory store, starts a bake and lets a pool of local workers
//! drain the job queue until the layer is baked or a shutdown signal
//! arrives. A second signal while the workers drain abandons them.

mod cli;
mod config;
mod demo;
mod logging;
mod signals;

use cli::CliArgs;
use config::AppConfig;
use signals::{Shutdown, ShutdownSignals};
use futures::future::join_all;
use layer_baker::{run_worker, BakeScheduler, BakeState, Layer, MemoryJobQueue, MemoryStore, WorkerStats};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How often the driver checks whether the bake finished
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

pub struct Application {
    config: AppConfig,
    list_documents: bool,
    store: Arc<MemoryStore>,
    queue: Arc<MemoryJobQueue>,
    scheduler: Arc<BakeScheduler>,
}

impl Application {
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_overrides(&args);

        if let Err(e) = config.validate() {
            anyhow::bail!("Configuration validation failed: {}", e);
        }

        logging::setup_logging(&config.logging)?;
        info!("📂 Config: {}", args.config_path.display());

        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let scheduler = Arc::new(BakeScheduler::new(
            store.clone(),
            queue.clone(),
            config.baker.clone(),
        ));

        Ok(Self {
            config,
            list_documents: args.list_documents,
            store,
            queue,
            scheduler,
        })
    }

    /// Seeds the synthetic layer and returns it
    fn seed(&self) -> Layer {
        let layer = demo::synthetic_layer(&self.config.demo);
        let entities = demo::synthetic_entities(layer.id, &self.config.demo);
        info!(
            layer = %layer.id,
            name = %layer.name,
            entities = entities.len(),
            seed = self.config.demo.seed,
            "🌱 Seeded synthetic layer"
        );
        self.store.insert_layer(layer.clone());
        self.store.insert_entities(entities);
        layer
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let mut signals = ShutdownSignals::install()?;
        let layer = self.seed();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let workers: Vec<_> = (0..self.config.worker.workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    self.scheduler.clone(),
                    self.queue.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();
        info!("👷 Started {} workers", workers.len());

        let started = Instant::now();
        self.scheduler.start_bake(layer.id).await?;
        info!(layer = %layer.id, "🔥 Baking '{}'", layer.name);

        let finished = tokio::select! {
            _ = self.wait_until_baked(&layer) => true,
            request = signals.next() => {
                let (name, _) = request?;
                warn!(signal = name, "🛑 Stopping before '{}' finished baking; signal again to abort", layer.name);
                false
            }
        };

        // Stop the workers and release any of them waiting on the queue
        let _ = shutdown_tx.send(true);
        self.queue.close();
        let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();
        let drained = join_all(workers);
        tokio::pin!(drained);
        let results = loop {
            tokio::select! {
                results = &mut drained => break results,
                request = signals.next() => {
                    let (name, action) = request?;
                    if action == Shutdown::Abort {
                        warn!(signal = name, "💥 Abandoning running tasks");
                        aborts.iter().for_each(|a| a.abort());
                    }
                }
            }
        };

        let mut totals = WorkerStats::default();
        for result in results {
            match result {
                Ok(stats) => totals.merge(stats),
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!("❌ Worker panicked: {}", e),
            }
        }
        info!(
            tasks = totals.tasks_run,
            rescheduled = totals.tasks_rescheduled,
            failed = totals.tasks_failed,
            pending = self.queue.pending_len().await,
            "📊 Queue statistics"
        );

        if !finished {
            return Ok(());
        }

        let layer = self
            .store
            .layer(layer.id)
            .ok_or_else(|| anyhow::anyhow!("layer {} disappeared", layer.id))?;
        let report = demo::summarize(&self.store, &layer, self.list_documents).await?;
        info!(
            divisions = report.divisions,
            leaves = report.leaves,
            depth = report.depth,
            largest = report.largest_division,
            entities = report.assigned_entities,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "✅ Layer baked"
        );
        for url in &report.documents {
            info!("  {}", url);
        }
        Ok(())
    }

    async fn wait_until_baked(&self, layer: &Layer) {
        let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
        loop {
            interval.tick().await;
            let state = self.store.layer(layer.id).map(|l| BakeState::of(&l));
            if state == Some(BakeState::Baked) {
                return;
            }
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
