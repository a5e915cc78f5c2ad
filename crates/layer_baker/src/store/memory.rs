//! In-process store backed by concurrent maps.
//!
//! Behaves like a durable, read-your-writes store for a single process and
//! supports injecting failures per operation so the scheduler's retry paths
//! can be exercised.

use super::{DivisionStore, EntityStore, LayerStore};
use crate::error::{StoreError, StoreResult};
use crate::geo::SpatialBox;
use crate::model::{
    Division, DivisionId, Entity, EntityId, Layer, LayerFlags, LayerId, NewDivision,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, instrument, warn};

/// Store operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetLayer,
    SetLayerFlags,
    QueryTopByPriority,
    MarkEntityBaked,
    ResetBakedPage,
    HasUnbaked,
    GetEntities,
    UnbakedEntities,
    CreateDivision,
    FindDivisionByBox,
    GetDivision,
    ChildDivisions,
    RootDivision,
    ListDivisions,
    DeleteDivisionsPage,
    MarkDivisionBaked,
    StoreDocument,
    ClearDocument,
}

/// Call counters, useful for asserting which work a task actually did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub priority_queries: usize,
    pub divisions_created: usize,
    pub entity_marks: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    layers: DashMap<LayerId, Layer>,
    entities: DashMap<EntityId, Entity>,
    divisions: DashMap<DivisionId, Division>,
    /// Unique index: one division per box per layer
    division_boxes: DashMap<(LayerId, [u64; 4]), DivisionId>,
    faults: DashMap<StoreOp, VecDeque<StoreError>>,
    priority_queries: AtomicUsize,
    divisions_created: AtomicUsize,
    entity_marks: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_layer(&self, layer: Layer) {
        self.layers.insert(layer.id, layer);
    }

    pub fn insert_entity(&self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    pub fn insert_entities(&self, entities: impl IntoIterator<Item = Entity>) {
        for entity in entities {
            self.insert_entity(entity);
        }
    }

    /// Snapshot of a layer
    pub fn layer(&self, layer: LayerId) -> Option<Layer> {
        self.layers.get(&layer).map(|l| l.clone())
    }

    /// Snapshot of an entity
    pub fn entity(&self, entity: EntityId) -> Option<Entity> {
        self.entities.get(&entity).map(|e| e.clone())
    }

    /// Snapshot of every entity in a layer
    pub fn entities_of(&self, layer: LayerId) -> Vec<Entity> {
        self.entities
            .iter()
            .filter(|e| e.layer_id == layer)
            .map(|e| e.clone())
            .collect()
    }

    /// Snapshot of every division in a layer
    pub fn divisions_of(&self, layer: LayerId) -> Vec<Division> {
        self.divisions
            .iter()
            .filter(|d| d.layer_id == layer)
            .map(|d| d.clone())
            .collect()
    }

    /// Make the next call of `op` fail with `error`. Calls queue up, so
    /// injecting twice fails the next two calls.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.faults.entry(op).or_default().push_back(error);
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            priority_queries: self.priority_queries.load(Ordering::Relaxed),
            divisions_created: self.divisions_created.load(Ordering::Relaxed),
            entity_marks: self.entity_marks.load(Ordering::Relaxed),
        }
    }

    fn check(&self, op: StoreOp) -> StoreResult<()> {
        if let Some(mut queue) = self.faults.get_mut(&op) {
            if let Some(error) = queue.pop_front() {
                warn!(?op, %error, "Injected store failure");
                return Err(error);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LayerStore for MemoryStore {
    async fn get_layer(&self, layer: LayerId) -> StoreResult<Option<Layer>> {
        self.check(StoreOp::GetLayer)?;
        Ok(self.layer(layer))
    }

    #[instrument(skip(self))]
    async fn set_layer_flags(&self, layer: LayerId, flags: LayerFlags) -> StoreResult<()> {
        self.check(StoreOp::SetLayerFlags)?;
        let mut record = self
            .layers
            .get_mut(&layer)
            .ok_or_else(|| StoreError::NotFound(format!("layer {}", layer)))?;
        record.baked = flags.baked;
        record.busy = flags.busy;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    #[instrument(skip(self))]
    async fn query_top_by_priority(
        &self,
        layer: LayerId,
        region: &SpatialBox,
        limit: usize,
    ) -> StoreResult<Vec<Entity>> {
        self.check(StoreOp::QueryTopByPriority)?;
        self.priority_queries.fetch_add(1, Ordering::Relaxed);

        let mut matched: Vec<Entity> = self
            .entities
            .iter()
            .filter(|e| e.layer_id == layer && e.baked.is_none() && region.contains(&e.location))
            .map(|e| e.clone())
            .collect();
        // Ties broken by id so repeated queries agree on the selection
        matched.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matched.truncate(limit);
        debug!(matched = matched.len(), "Priority query finished");
        Ok(matched)
    }

    async fn mark_entity_baked(&self, entity: EntityId) -> StoreResult<()> {
        self.check(StoreOp::MarkEntityBaked)?;
        if let Some(mut record) = self.entities.get_mut(&entity) {
            record.baked = Some(true);
            self.entity_marks.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reset_baked_page(&self, layer: LayerId, limit: usize) -> StoreResult<usize> {
        self.check(StoreOp::ResetBakedPage)?;
        let page: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|e| e.layer_id == layer && e.baked.is_some())
            .take(limit)
            .map(|e| e.id)
            .collect();
        for id in &page {
            if let Some(mut record) = self.entities.get_mut(id) {
                record.baked = None;
            }
        }
        Ok(page.len())
    }

    async fn has_unbaked(&self, layer: LayerId) -> StoreResult<bool> {
        self.check(StoreOp::HasUnbaked)?;
        Ok(self
            .entities
            .iter()
            .any(|e| e.layer_id == layer && e.baked.is_none()))
    }

    async fn get_entities(&self, ids: &[EntityId]) -> StoreResult<Vec<Entity>> {
        self.check(StoreOp::GetEntities)?;
        Ok(ids.iter().filter_map(|id| self.entity(*id)).collect())
    }

    async fn unbaked_entities(&self, layer: LayerId) -> StoreResult<Vec<Entity>> {
        self.check(StoreOp::UnbakedEntities)?;
        Ok(self
            .entities
            .iter()
            .filter(|e| e.layer_id == layer && e.baked.is_none())
            .map(|e| e.clone())
            .collect())
    }
}

#[async_trait]
impl DivisionStore for MemoryStore {
    #[instrument(skip(self, division), fields(layer = %division.layer_id, region = %division.region))]
    async fn create_division(&self, division: NewDivision) -> StoreResult<DivisionId> {
        self.check(StoreOp::CreateDivision)?;
        let id = DivisionId::new();
        match self
            .division_boxes
            .entry((division.layer_id, division.region.key()))
        {
            Entry::Occupied(existing) => {
                return Err(StoreError::Conflict(format!(
                    "division {} already covers {}",
                    existing.get(),
                    division.region
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
        self.divisions.insert(
            id,
            Division {
                id,
                layer_id: division.layer_id,
                region: division.region,
                baked: false,
                entity_ids: division.entity_ids,
                parent: division.parent,
                document: None,
            },
        );
        self.divisions_created.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    async fn find_division_by_box(
        &self,
        layer: LayerId,
        region: &SpatialBox,
    ) -> StoreResult<Option<Division>> {
        self.check(StoreOp::FindDivisionByBox)?;
        let id = match self.division_boxes.get(&(layer, region.key())) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.divisions.get(&id).map(|d| d.clone()))
    }

    async fn get_division(&self, division: DivisionId) -> StoreResult<Option<Division>> {
        self.check(StoreOp::GetDivision)?;
        Ok(self.divisions.get(&division).map(|d| d.clone()))
    }

    async fn child_divisions(&self, division: DivisionId) -> StoreResult<Vec<Division>> {
        self.check(StoreOp::ChildDivisions)?;
        Ok(self
            .divisions
            .iter()
            .filter(|d| d.parent == Some(division))
            .map(|d| d.clone())
            .collect())
    }

    async fn root_division(&self, layer: LayerId) -> StoreResult<Option<Division>> {
        self.check(StoreOp::RootDivision)?;
        Ok(self
            .divisions
            .iter()
            .find(|d| d.layer_id == layer && d.parent.is_none())
            .map(|d| d.clone()))
    }

    async fn list_divisions(&self, layer: LayerId) -> StoreResult<Vec<Division>> {
        self.check(StoreOp::ListDivisions)?;
        Ok(self.divisions_of(layer))
    }

    #[instrument(skip(self))]
    async fn delete_divisions_page(&self, layer: LayerId, limit: usize) -> StoreResult<usize> {
        self.check(StoreOp::DeleteDivisionsPage)?;
        let page: Vec<(DivisionId, [u64; 4])> = self
            .divisions
            .iter()
            .filter(|d| d.layer_id == layer)
            .take(limit)
            .map(|d| (d.id, d.region.key()))
            .collect();
        for (id, key) in &page {
            self.divisions.remove(id);
            self.division_boxes.remove(&(layer, *key));
        }
        Ok(page.len())
    }

    async fn mark_division_baked(&self, division: DivisionId) -> StoreResult<()> {
        self.check(StoreOp::MarkDivisionBaked)?;
        let mut record = self
            .divisions
            .get_mut(&division)
            .ok_or_else(|| StoreError::NotFound(format!("division {}", division)))?;
        record.baked = true;
        Ok(())
    }

    async fn store_document(&self, division: DivisionId, document: String) -> StoreResult<()> {
        self.check(StoreOp::StoreDocument)?;
        let mut record = self
            .divisions
            .get_mut(&division)
            .ok_or_else(|| StoreError::NotFound(format!("division {}", division)))?;
        record.document = Some(document);
        Ok(())
    }

    async fn clear_document(&self, division: DivisionId) -> StoreResult<()> {
        self.check(StoreOp::ClearDocument)?;
        if let Some(mut record) = self.divisions.get_mut(&division) {
            record.document = None;
        }
        Ok(())
    }
}
