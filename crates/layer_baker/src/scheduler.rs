//! The bake state machine.
//!
//! A layer moves through Setup → Subdivide* → Monitor → Baked. No stage ever
//! waits on another: each does a bounded amount of work, records its progress
//! in the store, and hands whatever remains to the job queue. Any task may run
//! more than once, so every step is either idempotent or guarded.

use crate::config::BakerSettings;
use crate::document;
use crate::error::{BakeError, BakeResult, StoreError};
use crate::geo::SpatialBox;
use crate::model::{DivisionId, EntityId, Layer, LayerFlags, LayerId, NewDivision};
use crate::partition;
use crate::queue::JobQueue;
use crate::stage::{
    SetupCursor, SetupPhase, Stage, StageOutcome, StageTask, SubdivideCheckpoint, SubdivideParams,
};
use crate::store::{BakeStore, DivisionStore, EntityStore, LayerStore};
use futures::future::try_join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Wall-clock budget of a single task
#[derive(Debug, Clone, Copy)]
struct Deadline {
    expires: Instant,
}

impl Deadline {
    fn after(budget: Duration) -> Self {
        Self {
            expires: Instant::now() + budget,
        }
    }

    fn check(&self) -> BakeResult<()> {
        if Instant::now() >= self.expires {
            Err(BakeError::DeadlineExceeded)
        } else {
            Ok(())
        }
    }
}

/// A division that has been persisted and still needs finishing
#[derive(Debug, Clone)]
struct DivisionPlan {
    layer: Layer,
    region: SpatialBox,
    parent: Option<DivisionId>,
    division_id: DivisionId,
    entity_ids: Vec<EntityId>,
    has_more: bool,
}

impl DivisionPlan {
    fn checkpoint(&self) -> SubdivideCheckpoint {
        SubdivideCheckpoint {
            division_id: self.division_id,
            entity_ids: self.entity_ids.clone(),
            has_more: self.has_more,
        }
    }
}

/// Turns a transient failure into `outcome` and lets everything else through
/// as fatal.
fn recover(error: impl Into<BakeError>, outcome: StageOutcome) -> BakeResult<StageOutcome> {
    let error = error.into();
    if error.is_transient() {
        warn!(%error, ?outcome, "Transient failure, rescheduling");
        Ok(outcome)
    } else {
        Err(error)
    }
}

/// Drives layers through the bake stages against injected collaborators
#[derive(Debug, Clone)]
pub struct BakeScheduler {
    store: Arc<dyn BakeStore>,
    queue: Arc<dyn JobQueue>,
    settings: BakerSettings,
}

impl BakeScheduler {
    pub fn new(store: Arc<dyn BakeStore>, queue: Arc<dyn JobQueue>, settings: BakerSettings) -> Self {
        Self {
            store,
            queue,
            settings,
        }
    }

    pub fn settings(&self) -> &BakerSettings {
        &self.settings
    }

    /// Starts (or restarts) a bake of an auto-managed layer.
    #[instrument(skip(self))]
    pub async fn start_bake(&self, layer_id: LayerId) -> BakeResult<()> {
        let layer = self
            .store
            .get_layer(layer_id)
            .await?
            .ok_or(BakeError::LayerNotFound(layer_id))?;
        if !layer.auto_managed {
            return Err(BakeError::InvalidState(
                "Only auto-managed layers can be baked".to_string(),
            ));
        }
        if layer.busy {
            return Err(BakeError::InvalidState("Layer is busy".to_string()));
        }

        self.store
            .set_layer_flags(
                layer_id,
                LayerFlags {
                    baked: false,
                    busy: true,
                },
            )
            .await?;
        self.queue.enqueue(StageTask::setup(layer_id, None), None).await?;
        info!(layer = %layer_id, name = %layer.name, "Bake started");
        Ok(())
    }

    /// Runs a stage task identified by name, as delivered by an external
    /// queue.
    pub async fn handle_stage_task(
        &self,
        layer_id: LayerId,
        stage_name: &str,
        params: Value,
    ) -> BakeResult<StageOutcome> {
        let stage = Stage::parse(stage_name, params)?;
        self.run_task(&StageTask { layer_id, stage }).await
    }

    /// Runs a stage task and schedules whatever follow-up its outcome asks
    /// for. The outcome is returned for observability only; the follow-up has
    /// already been enqueued.
    pub async fn run_task(&self, task: &StageTask) -> BakeResult<StageOutcome> {
        let outcome = self.run_stage(task).await?;
        match &outcome {
            StageOutcome::Completed => {}
            StageOutcome::Redeliver => {
                let delay = match task.stage {
                    Stage::Monitor => Some(self.settings.monitor_delay()),
                    _ => None,
                };
                self.queue.enqueue(task.clone(), delay).await?;
            }
            StageOutcome::RetryWithCheckpoint(checkpoint) => {
                let retry = Self::checkpointed_retry(task, checkpoint.clone())?;
                self.queue.enqueue(retry, None).await?;
            }
            StageOutcome::Continue(cursor) => {
                self.queue
                    .enqueue(StageTask::setup(task.layer_id, Some(*cursor)), None)
                    .await?;
            }
        }
        Ok(outcome)
    }

    async fn run_stage(&self, task: &StageTask) -> BakeResult<StageOutcome> {
        match &task.stage {
            Stage::Setup(params) => self.setup(task.layer_id, params.cursor.unwrap_or_default()).await,
            Stage::Subdivide(params) => self.subdivide(task.layer_id, params).await,
            Stage::Monitor => self.monitor(task.layer_id).await,
        }
    }

    fn checkpointed_retry(task: &StageTask, checkpoint: SubdivideCheckpoint) -> BakeResult<StageTask> {
        match &task.stage {
            Stage::Subdivide(params) => Ok(StageTask::subdivide(
                task.layer_id,
                SubdivideParams::child(params.region, params.parent_division_id)
                    .with_checkpoint(checkpoint),
            )),
            other => Err(BakeError::InvalidState(format!(
                "{} tasks cannot resume from a subdivide checkpoint",
                other
            ))),
        }
    }

    // ------------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------------

    /// Deletes the previous division tree and clears every entity flag, one
    /// page at a time, then schedules the root subdivide and the monitor.
    #[instrument(skip(self), fields(layer = %layer_id))]
    async fn setup(&self, layer_id: LayerId, mut cursor: SetupCursor) -> BakeResult<StageOutcome> {
        let deadline = Deadline::after(self.settings.task_budget());
        let page_size = self.settings.setup_page_size;

        loop {
            if deadline.check().is_err() {
                info!(?cursor, "Setup out of time, continuing in a new task");
                return Ok(StageOutcome::Continue(cursor));
            }
            let page = match cursor.phase {
                SetupPhase::Divisions => self.store.delete_divisions_page(layer_id, page_size).await,
                SetupPhase::Entities => self.store.reset_baked_page(layer_id, page_size).await,
            };
            match page {
                Ok(0) => match cursor.phase {
                    SetupPhase::Divisions => cursor.phase = SetupPhase::Entities,
                    SetupPhase::Entities => break,
                },
                Ok(count) => {
                    cursor.pages_done += 1;
                    debug!(phase = ?cursor.phase, count, pages = cursor.pages_done, "Setup page done");
                }
                Err(e) => return recover(e, StageOutcome::Continue(cursor)),
            }
        }

        // Nothing has been scheduled yet, so a failed root enqueue can simply
        // run the (now trivial) setup again
        let root = StageTask::subdivide(layer_id, SubdivideParams::root());
        if let Err(e) = self.queue.enqueue(root, None).await {
            return recover(e, StageOutcome::Continue(cursor));
        }
        self.queue
            .enqueue(StageTask::monitor(layer_id), Some(self.settings.monitor_delay()))
            .await?;
        info!(pages = cursor.pages_done, "Setup finished, subdivision scheduled");
        Ok(StageOutcome::Completed)
    }

    // ------------------------------------------------------------------------
    // Subdivide
    // ------------------------------------------------------------------------

    /// Creates the division for one box and schedules its children.
    #[instrument(skip(self, params), fields(layer = %layer_id, region = %params.region))]
    async fn subdivide(&self, layer_id: LayerId, params: &SubdivideParams) -> BakeResult<StageOutcome> {
        let checkpoint = params.checkpoint()?;
        let deadline = Deadline::after(self.settings.task_budget());

        // Until the division is persisted nothing durable has happened and
        // the task can be delivered again as is
        let plan = match self.plan_division(layer_id, params, checkpoint, &deadline).await {
            Ok(Some(plan)) => plan,
            Ok(None) => return Ok(StageOutcome::Completed),
            Err(e) => return recover(e, StageOutcome::Redeliver),
        };

        match self.finish_division(&plan, &deadline).await {
            Ok(()) => Ok(StageOutcome::Completed),
            Err(e) if e.is_transient() => {
                warn!(error = %e, division = %plan.division_id, "Subdivide interrupted, checkpointing");
                Ok(StageOutcome::RetryWithCheckpoint(plan.checkpoint()))
            }
            Err(e) => {
                error!(error = %e, division = %plan.division_id, "Subdivide failed after the division was persisted");
                let retry = StageTask::subdivide(
                    layer_id,
                    SubdivideParams::child(plan.region, plan.parent).with_checkpoint(plan.checkpoint()),
                );
                if let Err(queue_error) = self.queue.enqueue(retry, None).await {
                    error!(error = %queue_error, "Could not schedule checkpointed retry");
                }
                Err(e)
            }
        }
    }

    /// Steps 1 to 4: guard against reruns, select entities, persist the
    /// division. `None` means there is nothing to do.
    async fn plan_division(
        &self,
        layer_id: LayerId,
        params: &SubdivideParams,
        checkpoint: Option<SubdivideCheckpoint>,
        deadline: &Deadline,
    ) -> BakeResult<Option<DivisionPlan>> {
        let Some(layer) = self.store.get_layer(layer_id).await? else {
            warn!("Layer no longer exists, dropping subdivide");
            return Ok(None);
        };
        if !layer.busy {
            info!("Layer is no longer being baked, dropping subdivide");
            return Ok(None);
        }

        let division_size = layer.division_size_or(self.settings.default_division_size);
        let existing = self.store.find_division_by_box(layer_id, &params.region).await?;
        let unfinished = match (existing, &checkpoint) {
            (Some(found), Some(cp)) if found.id == cp.division_id => {
                if found.baked {
                    // Children are scheduled before the division is marked
                    // baked, so this retry already ran to the end
                    debug!(division = %found.id, "Checkpointed division already baked, ignoring retry");
                    return Ok(None);
                }
                None
            }
            (Some(found), Some(_)) => {
                debug!(division = %found.id, "Box belongs to another division, dropping stale retry");
                return Ok(None);
            }
            (Some(found), None) if found.baked => {
                debug!(division = %found.id, "Box already baked, ignoring redelivered task");
                return Ok(None);
            }
            // Persisted by a run whose checkpoint never made it to the queue
            (Some(found), None) => Some(found),
            (None, Some(cp)) => {
                warn!(division = %cp.division_id, "Checkpointed division is gone, dropping stale retry");
                return Ok(None);
            }
            (None, None) => None,
        };

        if let Some(parent) = params.parent_division_id {
            if self.store.get_division(parent).await?.is_none() {
                warn!(%parent, "Parent division is gone, dropping stale subdivide");
                return Ok(None);
            }
        }

        if let Some(cp) = checkpoint {
            debug!(division = %cp.division_id, entities = cp.entity_ids.len(), "Resuming from checkpoint");
            return Ok(Some(DivisionPlan {
                layer,
                region: params.region,
                parent: params.parent_division_id,
                division_id: cp.division_id,
                entity_ids: cp.entity_ids,
                has_more: cp.has_more,
            }));
        }

        if let Some(division) = unfinished {
            // Only a split division is truncated to exactly the soft cap
            let has_more = division.entity_ids.len() == division_size as usize;
            debug!(division = %division.id, has_more, "Finishing a division left unfinished");
            return Ok(Some(DivisionPlan {
                layer,
                region: params.region,
                parent: params.parent_division_id,
                division_id: division.id,
                entity_ids: division.entity_ids,
                has_more,
            }));
        }

        deadline.check()?;
        let hard_max = layer.hard_max(
            self.settings.default_division_size,
            self.settings.division_growth_limit,
        );
        let mut entities = self
            .store
            .query_top_by_priority(layer_id, &params.region, hard_max)
            .await?;
        if entities.is_empty() {
            debug!("No unassigned entities in box");
            return Ok(None);
        }
        let has_more = partition::decide_split(entities.len(), hard_max);
        if has_more {
            // The rest stay unassigned and are picked up by the children
            entities.truncate(division_size as usize);
        }
        let entity_ids: Vec<EntityId> = entities.iter().map(|e| e.id).collect();

        deadline.check()?;
        let division_id = match self
            .store
            .create_division(NewDivision {
                layer_id,
                region: params.region,
                parent: params.parent_division_id,
                entity_ids: entity_ids.clone(),
            })
            .await
        {
            Ok(id) => id,
            Err(StoreError::Conflict(reason)) => {
                debug!(%reason, "Concurrent run created this division first");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        debug!(division = %division_id, entities = entity_ids.len(), has_more, "Division persisted");

        Ok(Some(DivisionPlan {
            layer,
            region: params.region,
            parent: params.parent_division_id,
            division_id,
            entity_ids,
            has_more,
        }))
    }

    /// Steps 5 to 8. Every step is safe to repeat. Children are enqueued
    /// before the division is marked baked, so a baked division always has
    /// its children scheduled.
    async fn finish_division(&self, plan: &DivisionPlan, deadline: &Deadline) -> BakeResult<()> {
        for entity in &plan.entity_ids {
            deadline.check()?;
            self.store.mark_entity_baked(*entity).await?;
        }

        if let Some(parent) = plan.parent {
            self.store.clear_document(parent).await?;
        }

        if plan.has_more {
            let children = partition::child_boxes(&plan.region);
            let count = children.len();
            try_join_all(children.into_iter().map(|region| {
                self.queue.enqueue(
                    StageTask::subdivide(
                        plan.layer.id,
                        SubdivideParams::child(region, Some(plan.division_id)),
                    ),
                    None,
                )
            }))
            .await?;
            debug!(division = %plan.division_id, children = count, "Children scheduled");
        }

        self.store.mark_division_baked(plan.division_id).await?;

        // Children clear their parent's copy as they finish, so only leaves
        // are cached eagerly; the rest are cached on first read
        if !plan.layer.uncacheable && !plan.has_more {
            let division = self
                .store
                .get_division(plan.division_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("division {}", plan.division_id)))?;
            document::division_document(self.store.as_ref(), &plan.layer, &division).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Monitor
    // ------------------------------------------------------------------------

    /// Polls until no entity of the layer is unassigned, then marks the layer
    /// baked and idle.
    #[instrument(skip(self), fields(layer = %layer_id))]
    async fn monitor(&self, layer_id: LayerId) -> BakeResult<StageOutcome> {
        let layer = match self.store.get_layer(layer_id).await {
            Ok(Some(layer)) => layer,
            Ok(None) => {
                warn!("Layer no longer exists, stopping monitor");
                return Ok(StageOutcome::Completed);
            }
            Err(e) => return recover(e, StageOutcome::Redeliver),
        };
        if !layer.busy {
            info!("Layer is no longer being baked, stopping monitor");
            return Ok(StageOutcome::Completed);
        }

        match self.store.has_unbaked(layer_id).await {
            Ok(true) => {
                debug!("Entities still unassigned, checking again later");
                self.queue
                    .enqueue(StageTask::monitor(layer_id), Some(self.settings.monitor_delay()))
                    .await?;
                Ok(StageOutcome::Completed)
            }
            Ok(false) => {
                let flags = LayerFlags {
                    baked: true,
                    busy: false,
                };
                if let Err(e) = self.store.set_layer_flags(layer_id, flags).await {
                    return recover(e, StageOutcome::Redeliver);
                }
                info!(name = %layer.name, "Layer baked");
                Ok(StageOutcome::Completed)
            }
            Err(e) => recover(e, StageOutcome::Redeliver),
        }
    }
}
