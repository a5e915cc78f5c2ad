//! # Layer Baker
//!
//! Bakes a layer of prioritized geo-located entities into a quad-tree of
//! spatial divisions. Each division holds at most a bounded number of
//! entities, the most important ones nearest the root, so a viewer can load
//! the root document first and fetch finer divisions as it zooms in.
//!
//! ## Architecture Overview
//!
//! A bake is a chain of short stage tasks carried by a [`JobQueue`]:
//!
//! 1. **Setup** clears the previous bake page by page.
//! 2. **Subdivide** takes one box, claims its top entities for a new
//!    division and schedules a subdivide for each quadrant when entities are
//!    left over.
//! 3. **Monitor** polls until every entity is assigned, then marks the layer
//!    baked.
//!
//! Tasks may be delivered more than once, out of order, and cut short by a
//! deadline. Each stage is idempotent or guarded, and interrupted work
//! resumes from the progress recorded in the task parameters.
//!
//! ## Quick Start Example
//!
//! ```rust
//! use layer_baker::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BakeError> {
//!     let store = Arc::new(MemoryStore::new());
//!     let queue = Arc::new(MemoryJobQueue::new());
//!
//!     let layer = Layer::auto_managed("lighthouses").with_division_size(50);
//!     store.insert_layer(layer.clone());
//!     store.insert_entity(Entity::new(layer.id, "Fastnet", 1.0, GeoPoint::new(51.39, -9.6)));
//!
//!     let scheduler = BakeScheduler::new(store.clone(), queue.clone(), BakerSettings::default());
//!     scheduler.start_bake(layer.id).await?;
//!     run_until_idle(&scheduler, &queue, 1_000).await;
//!
//!     assert!(store.layer(layer.id).map(|l| l.baked).unwrap_or(false));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod geo;
pub mod model;
pub mod partition;
pub mod queue;
pub mod scheduler;
pub mod stage;
pub mod store;
pub mod worker;

pub use config::BakerSettings;
pub use error::{BakeError, BakeResult, ConfigError, DocumentError, QueueError, StoreError};
pub use geo::{GeoPoint, SpatialBox};
pub use model::{BakeState, Division, DivisionId, Entity, EntityId, Layer, LayerFlags, LayerId, LevelOfDetail};
pub use queue::{JobQueue, MemoryJobQueue};
pub use scheduler::BakeScheduler;
pub use stage::{Stage, StageOutcome, StageTask};
pub use store::{BakeStore, DivisionStore, EntityStore, LayerStore, MemoryStore};
pub use worker::{run_until_idle, run_worker, WorkerStats};
