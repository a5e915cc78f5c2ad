//! Storage contracts consumed by the scheduler.
//!
//! The production store lives outside this crate. [`MemoryStore`] is a
//! complete in-process implementation used by the tests and the `bakery`
//! demo.

mod memory;

pub use memory::{MemoryStore, StoreOp, StoreStats};

use crate::error::StoreResult;
use crate::geo::SpatialBox;
use crate::model::{Division, DivisionId, Entity, EntityId, Layer, LayerFlags, LayerId, NewDivision};
use async_trait::async_trait;

/// Layer records
#[async_trait]
pub trait LayerStore: Send + Sync + std::fmt::Debug {
    /// Load a layer
    async fn get_layer(&self, layer: LayerId) -> StoreResult<Option<Layer>>;

    /// Write the bake flags of a layer
    async fn set_layer_flags(&self, layer: LayerId, flags: LayerFlags) -> StoreResult<()>;
}

/// Entity records
#[async_trait]
pub trait EntityStore: Send + Sync + std::fmt::Debug {
    /// Unassigned entities inside `region`, highest priority first, at most
    /// `limit` of them
    async fn query_top_by_priority(
        &self,
        layer: LayerId,
        region: &SpatialBox,
        limit: usize,
    ) -> StoreResult<Vec<Entity>>;

    /// Mark an entity as assigned. Idempotent; unknown ids are ignored.
    async fn mark_entity_baked(&self, entity: EntityId) -> StoreResult<()>;

    /// Clear the bake flag on up to `limit` assigned entities. Returns how
    /// many were cleared; zero means the layer is fully reset.
    async fn reset_baked_page(&self, layer: LayerId, limit: usize) -> StoreResult<usize>;

    /// Whether any entity in the layer is still unassigned
    async fn has_unbaked(&self, layer: LayerId) -> StoreResult<bool>;

    /// Load entities by id, skipping ids that no longer exist
    async fn get_entities(&self, ids: &[EntityId]) -> StoreResult<Vec<Entity>>;

    /// All unassigned entities in the layer
    async fn unbaked_entities(&self, layer: LayerId) -> StoreResult<Vec<Entity>>;
}

/// Division records
#[async_trait]
pub trait DivisionStore: Send + Sync + std::fmt::Debug {
    /// Persist a new, unbaked division
    async fn create_division(&self, division: NewDivision) -> StoreResult<DivisionId>;

    /// The division of `layer` covering exactly `region`, if any
    async fn find_division_by_box(
        &self,
        layer: LayerId,
        region: &SpatialBox,
    ) -> StoreResult<Option<Division>>;

    async fn get_division(&self, division: DivisionId) -> StoreResult<Option<Division>>;

    async fn child_divisions(&self, division: DivisionId) -> StoreResult<Vec<Division>>;

    async fn root_division(&self, layer: LayerId) -> StoreResult<Option<Division>>;

    async fn list_divisions(&self, layer: LayerId) -> StoreResult<Vec<Division>>;

    /// Delete up to `limit` divisions of the layer. Returns how many were
    /// deleted; zero means none are left.
    async fn delete_divisions_page(&self, layer: LayerId, limit: usize) -> StoreResult<usize>;

    async fn mark_division_baked(&self, division: DivisionId) -> StoreResult<()>;

    /// Cache a generated document on the division
    async fn store_document(&self, division: DivisionId, document: String) -> StoreResult<()>;

    /// Drop the cached document, e.g. after children were added below it
    async fn clear_document(&self, division: DivisionId) -> StoreResult<()>;
}

/// Everything the scheduler needs from the store
pub trait BakeStore: LayerStore + EntityStore + DivisionStore {}

impl<T> BakeStore for T where T: LayerStore + EntityStore + DivisionStore {}
