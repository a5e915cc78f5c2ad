//! Pure spatial partitioning rules.
//!
//! Nothing in here touches a store: given a box and how many entities a
//! query matched, these functions decide whether the box needs children and
//! what those children are.

use crate::geo::SpatialBox;

/// Absolute cap on entities fetched for one division.
///
/// `floor(division_size * (1 + growth_limit)) + 1`. Fetching one more than the
/// tolerated leaf size is what lets [`decide_split`] tell "exactly full" from
/// "there is more out there".
pub fn hard_max(division_size: u32, growth_limit: f64) -> usize {
    (f64::from(division_size) * (1.0 + growth_limit)).floor() as usize + 1
}

/// Returns true when the query came back full, i.e. more unassigned entities
/// most likely exist inside the box than the division may hold.
pub fn decide_split(matched_count: usize, hard_max: usize) -> bool {
    matched_count == hard_max
}

/// Splits a box at its latitude and longitude midpoints.
///
/// A box that touches exactly one pole keeps a single full-width cap on the
/// pole side and only halves the belt on the other side, because all
/// longitudes converge at the pole and quartering the cap would produce
/// nearly identical slivers. Boxes touching both poles or neither get the
/// standard four quadrants.
pub fn child_boxes(region: &SpatialBox) -> Vec<SpatialBox> {
    let SpatialBox {
        north,
        south,
        east,
        west,
    } = *region;
    let mid_lat = region.mid_latitude();
    let mid_lon = region.mid_longitude();

    if region.touches_north_pole() && !region.touches_south_pole() {
        vec![
            SpatialBox::new(north, mid_lat, east, west),
            SpatialBox::new(mid_lat, south, east, mid_lon),
            SpatialBox::new(mid_lat, south, mid_lon, west),
        ]
    } else if region.touches_south_pole() && !region.touches_north_pole() {
        vec![
            SpatialBox::new(north, mid_lat, east, mid_lon),
            SpatialBox::new(mid_lat, south, east, west),
            SpatialBox::new(north, mid_lat, mid_lon, west),
        ]
    } else {
        vec![
            // NE
            SpatialBox::new(north, mid_lat, east, mid_lon),
            // SE
            SpatialBox::new(mid_lat, south, east, mid_lon),
            // NW
            SpatialBox::new(north, mid_lat, mid_lon, west),
            // SW
            SpatialBox::new(mid_lat, south, mid_lon, west),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;

    fn assert_same_boxes(actual: Vec<SpatialBox>, expected: &[SpatialBox]) {
        assert_eq!(actual.len(), expected.len(), "child count differs");
        for region in expected {
            assert!(
                actual.contains(region),
                "missing child {} in {:?}",
                region,
                actual
            );
        }
    }

    #[test]
    fn test_hard_max_arithmetic() {
        assert_eq!(hard_max(41, 0.5), 62);
        assert_eq!(hard_max(100, 0.5), 151);
        assert_eq!(hard_max(10, 0.0), 11);
        assert_eq!(hard_max(1, 0.5), 2);
    }

    #[test]
    fn test_decide_split() {
        assert!(decide_split(62, 62));
        assert!(!decide_split(61, 62));
        assert!(!decide_split(0, 62));
    }

    #[test]
    fn test_split_touching_both_poles() {
        let children = child_boxes(&SpatialBox::new(90.0, -90.0, 40.0, -20.0));
        assert_same_boxes(
            children,
            &[
                SpatialBox::new(90.0, 0.0, 40.0, 10.0),
                SpatialBox::new(0.0, -90.0, 40.0, 10.0),
                SpatialBox::new(90.0, 0.0, 10.0, -20.0),
                SpatialBox::new(0.0, -90.0, 10.0, -20.0),
            ],
        );
    }

    #[test]
    fn test_split_touching_north_pole() {
        let children = child_boxes(&SpatialBox::new(90.0, 0.0, 40.0, -20.0));
        assert_same_boxes(
            children.clone(),
            &[
                SpatialBox::new(90.0, 45.0, 40.0, -20.0),
                SpatialBox::new(45.0, 0.0, 40.0, 10.0),
                SpatialBox::new(45.0, 0.0, 10.0, -20.0),
            ],
        );
        let caps: Vec<_> = children
            .iter()
            .filter(|c| c.west == -20.0 && c.east == 40.0)
            .collect();
        assert_eq!(caps.len(), 1);
        assert!(caps[0].touches_north_pole());
    }

    #[test]
    fn test_split_touching_south_pole() {
        let children = child_boxes(&SpatialBox::new(0.0, -90.0, 40.0, -20.0));
        assert_same_boxes(
            children,
            &[
                SpatialBox::new(0.0, -45.0, 40.0, 10.0),
                SpatialBox::new(-45.0, -90.0, 40.0, -20.0),
                SpatialBox::new(0.0, -45.0, 10.0, -20.0),
            ],
        );
    }

    #[test]
    fn test_split_touching_no_pole() {
        let children = child_boxes(&SpatialBox::new(40.0, -40.0, 180.0, 0.0));
        assert_same_boxes(
            children,
            &[
                SpatialBox::new(40.0, 0.0, 180.0, 90.0),
                SpatialBox::new(0.0, -40.0, 180.0, 90.0),
                SpatialBox::new(40.0, 0.0, 90.0, 0.0),
                SpatialBox::new(0.0, -40.0, 90.0, 0.0),
            ],
        );
    }

    #[test]
    fn test_children_partition_the_parent() {
        let parents = [
            SpatialBox::WORLD,
            SpatialBox::new(90.0, 0.0, 40.0, -20.0),
            SpatialBox::new(0.0, -90.0, 40.0, -20.0),
            SpatialBox::new(40.0, -40.0, 180.0, 0.0),
        ];
        let points = [
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(45.0, 10.0),
            GeoPoint::new(-45.0, 10.0),
            GeoPoint::new(89.9, 39.9),
            GeoPoint::new(-89.9, -19.9),
            GeoPoint::new(20.0, 120.0),
            GeoPoint::new(90.0, 180.0),
        ];
        for parent in &parents {
            let children = child_boxes(parent);
            for point in points.iter().filter(|p| parent.contains(p)) {
                let owners = children.iter().filter(|c| c.contains(point)).count();
                assert_eq!(owners, 1, "{:?} owned by {} children of {}", point, owners, parent);
            }
        }
    }
}
