//! The data behind each served document.
//!
//! Every baked division is served on its own: its entities plus one link per
//! child division, each link carrying the child's region and the layer's
//! level-of-detail settings so a viewer only fetches it when it matters.
//! Markup is produced elsewhere; these types are what the markup is built
//! from, and the serialized [`DivisionDocument`] is what gets cached on the
//! division.

use crate::error::{DocumentError, DocumentResult};
use crate::geo::{GeoPoint, SpatialBox};
use crate::model::{Division, DivisionId, Entity, EntityId, Layer, LayerId, LevelOfDetail};
use crate::store::{BakeStore, DivisionStore, EntityStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// An entity as it appears in a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntity {
    pub id: EntityId,
    pub name: String,
    pub location: GeoPoint,
}

impl From<&Entity> for DocumentEntity {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            name: entity.name.clone(),
            location: entity.location,
        }
    }
}

/// A network link to a child division
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivisionLink {
    pub division_id: DivisionId,
    pub region: SpatialBox,
    pub lod: LevelOfDetail,
    pub href: String,
}

impl DivisionLink {
    pub fn to(division: &Division, lod: LevelOfDetail) -> Self {
        Self {
            division_id: division.id,
            region: division.region,
            lod,
            href: division_href(division.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivisionDocument {
    pub division_id: DivisionId,
    pub region: SpatialBox,
    pub entities: Vec<DocumentEntity>,
    pub links: Vec<DivisionLink>,
}

/// Root document of a baked, auto-managed layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDocument {
    pub layer_id: LayerId,
    pub name: String,
    /// Root division entities followed by entities added since the bake
    pub entities: Vec<DocumentEntity>,
    pub links: Vec<DivisionLink>,
}

pub fn division_href(division: DivisionId) -> String {
    format!("/serve/0/k{}.kml", division)
}

pub fn layer_href(layer: LayerId) -> String {
    format!("/serve/{}/root.kml", layer)
}

async fn child_links<S>(store: &S, layer: &Layer, division: DivisionId) -> DocumentResult<Vec<DivisionLink>>
where
    S: BakeStore + ?Sized,
{
    Ok(store
        .child_divisions(division)
        .await?
        .iter()
        .map(|child| DivisionLink::to(child, layer.lod))
        .collect())
}

/// Builds the document of a baked division from the store, bypassing the
/// cache.
pub async fn build_division_document<S>(
    store: &S,
    layer: &Layer,
    division: &Division,
) -> DocumentResult<DivisionDocument>
where
    S: BakeStore + ?Sized,
{
    if !division.baked {
        return Err(DocumentError::DivisionNotBaked(division.id));
    }
    let entities = store.get_entities(&division.entity_ids).await?;
    Ok(DivisionDocument {
        division_id: division.id,
        region: division.region,
        entities: entities.iter().map(DocumentEntity::from).collect(),
        links: child_links(store, layer, division.id).await?,
    })
}

/// Returns the serialized document of a division, generating and caching it
/// when there is no usable cached copy.
#[instrument(skip(store, layer, division), fields(division = %division.id))]
pub async fn division_document<S>(store: &S, layer: &Layer, division: &Division) -> DocumentResult<String>
where
    S: BakeStore + ?Sized,
{
    if !layer.uncacheable {
        if let Some(cached) = &division.document {
            return Ok(cached.clone());
        }
    }
    let document = build_division_document(store, layer, division).await?;
    let encoded = serde_json::to_string(&document)?;
    if !layer.uncacheable {
        store.store_document(division.id, encoded.clone()).await?;
        debug!(entities = document.entities.len(), links = document.links.len(), "Cached division document");
    }
    Ok(encoded)
}

/// Builds the root document of a baked auto-managed layer.
pub async fn layer_document<S>(store: &S, layer: &Layer) -> DocumentResult<LayerDocument>
where
    S: BakeStore + ?Sized,
{
    if !layer.auto_managed {
        return Err(DocumentError::NotAutoManaged(layer.id));
    }
    if !layer.baked {
        return Err(DocumentError::LayerNotBaked(layer.id));
    }
    let root = store
        .root_division(layer.id)
        .await?
        .ok_or(DocumentError::MissingRoot(layer.id))?;

    let mut entities: Vec<DocumentEntity> = store
        .get_entities(&root.entity_ids)
        .await?
        .iter()
        .map(DocumentEntity::from)
        .collect();
    // Entities created after the last bake are not in any division yet
    entities.extend(
        store
            .unbaked_entities(layer.id)
            .await?
            .iter()
            .map(DocumentEntity::from),
    );

    Ok(LayerDocument {
        layer_id: layer.id,
        name: layer.name.clone(),
        entities,
        links: child_links(store, layer, root.id).await?,
    })
}

/// Every document URL of a layer: the root first, then one per non-root
/// division.
pub async fn document_urls<S>(store: &S, layer: &Layer) -> DocumentResult<Vec<String>>
where
    S: BakeStore + ?Sized,
{
    let mut urls = vec![layer_href(layer.id)];
    if !layer.auto_managed {
        return Ok(urls);
    }
    if !layer.baked {
        return Err(DocumentError::LayerNotBaked(layer.id));
    }
    let mut divisions = store.list_divisions(layer.id).await?;
    divisions.retain(|d| !d.is_root());
    divisions.sort_by_key(|d| d.id);
    urls.extend(divisions.iter().map(|d| division_href(d.id)));
    Ok(urls)
}
