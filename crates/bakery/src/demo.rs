//! Synthetic layers for local bakes.
//!
//! Entities cluster around a handful of cities with a uniform scatter over
//! the rest of the globe, which gives the division tree both deep and
//! shallow branches.

use crate::config::DemoSettings;
use layer_baker::document::document_urls;
use layer_baker::{DivisionId, Entity, GeoPoint, Layer, LayerId, MemoryStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

const CITIES: [(&str, f64, f64); 8] = [
    ("Reykjavik", 64.15, -21.94),
    ("Nairobi", -1.29, 36.82),
    ("Lima", -12.05, -77.04),
    ("Osaka", 34.69, 135.50),
    ("Hobart", -42.88, 147.33),
    ("Anchorage", 61.22, -149.90),
    ("Marseille", 43.30, 5.37),
    ("Suva", -18.14, 178.44),
];

/// Share of entities placed near a city
const CLUSTERED_SHARE: f64 = 0.6;
/// Maximum distance from the city centre in degrees
const CLUSTER_SPREAD: f64 = 2.0;

pub fn synthetic_layer(settings: &DemoSettings) -> Layer {
    let layer = Layer::auto_managed(settings.layer_name.clone());
    match settings.division_size {
        Some(size) => layer.with_division_size(size),
        None => layer,
    }
}

/// Generates `settings.entity_count` entities. Locations, names and
/// priorities depend only on the seed.
pub fn synthetic_entities(layer: LayerId, settings: &DemoSettings) -> Vec<Entity> {
    let mut rng = StdRng::seed_from_u64(settings.seed);
    (0..settings.entity_count)
        .map(|i| {
            let priority = rng.random_range(0.0..100.0);
            if rng.random_bool(CLUSTERED_SHARE) {
                let (city, lat, lon) = CITIES[rng.random_range(0..CITIES.len())];
                let location = GeoPoint::new(
                    (lat + rng.random_range(-CLUSTER_SPREAD..=CLUSTER_SPREAD)).clamp(-90.0, 90.0),
                    (lon + rng.random_range(-CLUSTER_SPREAD..=CLUSTER_SPREAD)).clamp(-180.0, 180.0),
                );
                Entity::new(layer, format!("{} #{}", city, i), priority, location)
            } else {
                let location = GeoPoint::new(rng.random_range(-90.0..=90.0), rng.random_range(-180.0..=180.0));
                Entity::new(layer, format!("Landmark #{}", i), priority, location)
            }
        })
        .collect()
}

/// Shape of a baked division tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BakeReport {
    pub divisions: usize,
    pub leaves: usize,
    /// Levels below the root; a lone root has depth 0
    pub depth: usize,
    pub largest_division: usize,
    pub assigned_entities: usize,
    pub documents: Vec<String>,
}

/// Summarizes the division tree of a baked layer, optionally with every
/// document URL.
pub async fn summarize(store: &MemoryStore, layer: &Layer, list_documents: bool) -> anyhow::Result<BakeReport> {
    let divisions = store.divisions_of(layer.id);
    let parents: HashMap<DivisionId, Option<DivisionId>> = divisions.iter().map(|d| (d.id, d.parent)).collect();

    let mut report = BakeReport {
        divisions: divisions.len(),
        ..BakeReport::default()
    };
    for division in &divisions {
        if !divisions.iter().any(|d| d.parent == Some(division.id)) {
            report.leaves += 1;
        }
        report.largest_division = report.largest_division.max(division.entity_ids.len());
        report.assigned_entities += division.entity_ids.len();

        let mut depth = 0;
        let mut cursor = division.parent;
        while let Some(parent) = cursor {
            depth += 1;
            cursor = parents.get(&parent).copied().flatten();
        }
        report.depth = report.depth.max(depth);
    }

    if list_documents {
        report.documents = document_urls(store, layer).await?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use layer_baker::{run_until_idle, BakeScheduler, BakerSettings, MemoryJobQueue};
    use std::sync::Arc;

    fn settings(count: usize) -> DemoSettings {
        DemoSettings {
            entity_count: count,
            division_size: Some(10),
            ..DemoSettings::default()
        }
    }

    #[test]
    fn test_entities_depend_only_on_seed() {
        let layer = LayerId::new();
        let first = synthetic_entities(layer, &settings(200));
        let second = synthetic_entities(layer, &settings(200));
        assert_eq!(first.len(), 200);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.location, b.location);
            assert_eq!(a.priority, b.priority);
        }

        let other = synthetic_entities(layer, &DemoSettings { seed: 7, ..settings(200) });
        assert!(first.iter().zip(&other).any(|(a, b)| a.location != b.location));
    }

    #[test]
    fn test_entities_stay_on_the_globe() {
        for entity in synthetic_entities(LayerId::new(), &settings(2_000)) {
            assert!((-90.0..=90.0).contains(&entity.location.lat));
            assert!((-180.0..=180.0).contains(&entity.location.lon));
            assert!(entity.baked.is_none());
        }
    }

    #[test]
    fn test_layer_takes_configured_division_size() {
        assert_eq!(synthetic_layer(&settings(1)).division_size, Some(10));
        let layer = synthetic_layer(&DemoSettings::default());
        assert!(layer.auto_managed);
        assert_eq!(layer.division_size, None);
    }

    #[tokio::test]
    async fn test_summarize_a_small_bake() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let demo = settings(300);
        let layer = synthetic_layer(&demo);
        store.insert_layer(layer.clone());
        store.insert_entities(synthetic_entities(layer.id, &demo));

        let scheduler = BakeScheduler::new(store.clone(), queue.clone(), BakerSettings::default());
        scheduler.start_bake(layer.id).await.unwrap();
        run_until_idle(&scheduler, &queue, 10_000).await;

        let layer = store.layer(layer.id).unwrap();
        let report = summarize(&store, &layer, true).await.unwrap();
        assert_eq!(report.assigned_entities, 300);
        assert!(report.depth >= 1);
        assert!(report.leaves < report.divisions);
        assert!(report.largest_division <= layer_baker::partition::hard_max(10, 0.5));
        assert_eq!(report.documents.len(), report.divisions);
    }
}
