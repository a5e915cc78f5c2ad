//! Records the baking engine reads and writes.
//!
//! Layers and entities are owned by the surrounding CRUD layer; the engine
//! only flips their bake flags. Divisions are created exclusively by the
//! subdivide stage and deleted in bulk by setup.

use crate::geo::{GeoPoint, SpatialBox};
use crate::partition;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for divisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DivisionId(pub Uuid);

impl DivisionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DivisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DivisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Layer
// ============================================================================

/// Region activation settings copied into every link to a division.
///
/// Pixel counts are on-screen sizes; `-1` for `max_pixels` means "no upper
/// bound", matching KML `<Lod>` semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelOfDetail {
    pub min_pixels: i32,
    pub min_fade: i32,
    pub max_pixels: i32,
    pub max_fade: i32,
}

impl Default for LevelOfDetail {
    fn default() -> Self {
        Self {
            min_pixels: 128,
            min_fade: 0,
            max_pixels: -1,
            max_fade: 0,
        }
    }
}

/// The subset of a layer that matters for baking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    /// Only auto-managed layers may be baked
    pub auto_managed: bool,
    /// Set while a bake (or delete) is in flight
    pub busy: bool,
    /// Set once the division tree covers every entity
    pub baked: bool,
    /// Soft cap on entities per division; `None` uses the configured default
    pub division_size: Option<u32>,
    /// Leaf growth tolerance; `None` uses the configured default
    pub division_growth_limit: Option<f64>,
    /// Never cache generated documents for this layer
    pub uncacheable: bool,
    pub lod: LevelOfDetail,
}

impl Layer {
    /// An idle, auto-managed layer with default sizing.
    pub fn auto_managed(name: impl Into<String>) -> Self {
        Self {
            id: LayerId::new(),
            name: name.into(),
            auto_managed: true,
            busy: false,
            baked: false,
            division_size: None,
            division_growth_limit: None,
            uncacheable: false,
            lod: LevelOfDetail::default(),
        }
    }

    pub fn with_division_size(mut self, division_size: u32) -> Self {
        self.division_size = Some(division_size);
        self
    }

    pub fn division_size_or(&self, default: u32) -> u32 {
        self.division_size.unwrap_or(default)
    }

    pub fn growth_limit_or(&self, default: f64) -> f64 {
        self.division_growth_limit.unwrap_or(default)
    }

    /// Entities fetched per subdivide query for this layer
    pub fn hard_max(&self, default_size: u32, default_growth: f64) -> usize {
        partition::hard_max(
            self.division_size_or(default_size),
            self.growth_limit_or(default_growth),
        )
    }
}

/// Coarse bake state derived from a layer's flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakeState {
    /// Never baked, or baked and since modified
    Idle,
    /// Setup, subdivide or monitor tasks are in flight
    InProgress,
    Baked,
}

impl BakeState {
    pub fn of(layer: &Layer) -> Self {
        match (layer.busy, layer.baked) {
            (true, _) => BakeState::InProgress,
            (false, true) => BakeState::Baked,
            (false, false) => BakeState::Idle,
        }
    }
}

/// The flag pair written by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerFlags {
    pub baked: bool,
    pub busy: bool,
}

// ============================================================================
// Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub layer_id: LayerId,
    pub name: String,
    /// Higher priorities are selected into coarser divisions first
    pub priority: f64,
    /// `None` until a subdivide step assigns the entity to a division
    pub baked: Option<bool>,
    pub location: GeoPoint,
}

impl Entity {
    pub fn new(layer_id: LayerId, name: impl Into<String>, priority: f64, location: GeoPoint) -> Self {
        Self {
            id: EntityId::new(),
            layer_id,
            name: name.into(),
            priority,
            baked: None,
            location,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.baked.is_some()
    }
}

// ============================================================================
// Division
// ============================================================================

/// A persisted node of the spatial partition tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Division {
    pub id: DivisionId,
    pub layer_id: LayerId,
    pub region: SpatialBox,
    /// Set once this division's own content is finalized
    pub baked: bool,
    /// Directly contained entities, in selection order
    pub entity_ids: Vec<EntityId>,
    /// `None` for the root division
    pub parent: Option<DivisionId>,
    /// Cached serialized document
    pub document: Option<String>,
}

impl Division {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Everything needed to persist a fresh division
#[derive(Debug, Clone, PartialEq)]
pub struct NewDivision {
    pub layer_id: LayerId,
    pub region: SpatialBox,
    pub parent: Option<DivisionId>,
    pub entity_ids: Vec<EntityId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_defaults_and_hard_max() {
        let layer = Layer::auto_managed("craters");
        assert!(layer.auto_managed);
        assert!(!layer.busy);
        assert!(!layer.baked);
        assert_eq!(layer.division_size_or(100), 100);
        assert_eq!(layer.hard_max(100, 0.5), 151);

        let layer = layer.with_division_size(41);
        assert_eq!(layer.hard_max(100, 0.5), 62);
    }

    #[test]
    fn test_bake_state_from_flags() {
        let mut layer = Layer::auto_managed("craters");
        assert_eq!(BakeState::of(&layer), BakeState::Idle);
        layer.busy = true;
        assert_eq!(BakeState::of(&layer), BakeState::InProgress);
        layer.baked = true;
        assert_eq!(BakeState::of(&layer), BakeState::InProgress);
        layer.busy = false;
        assert_eq!(BakeState::of(&layer), BakeState::Baked);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let id = DivisionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.0));
        let back: DivisionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_new_entity_is_unassigned() {
        let layer = LayerId::new();
        let entity = Entity::new(layer, "crater", 3.5, GeoPoint::new(1.0, 2.0));
        assert!(!entity.is_assigned());
        assert_eq!(entity.layer_id, layer);
    }
}
