//! Geographic primitives used by the partitioner and the stores.
//!
//! All coordinates are plain degrees. Latitude runs from -90 to 90, longitude
//! from -180 to 180.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Latitude of the north pole
pub const NORTH_POLE: f64 = 90.0;
/// Latitude of the south pole
pub const SOUTH_POLE: f64 = -90.0;
/// Easternmost longitude
pub const EAST_EDGE: f64 = 180.0;
/// Westernmost longitude
pub const WEST_EDGE: f64 = -180.0;

/// A point on the globe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// An immutable latitude/longitude rectangle.
///
/// The caller guarantees `south <= north` and `west <= east`; the box itself
/// never checks or normalizes its edges, so two boxes built from the same
/// midpoint arithmetic compare equal bit for bit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl SpatialBox {
    /// The whole globe. Every bake starts here.
    pub const WORLD: SpatialBox = SpatialBox {
        north: NORTH_POLE,
        south: SOUTH_POLE,
        east: EAST_EDGE,
        west: WEST_EDGE,
    };

    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    pub fn mid_latitude(&self) -> f64 {
        (self.north + self.south) / 2.0
    }

    pub fn mid_longitude(&self) -> f64 {
        (self.east + self.west) / 2.0
    }

    pub fn touches_north_pole(&self) -> bool {
        self.north == NORTH_POLE
    }

    pub fn touches_south_pole(&self) -> bool {
        self.south == SOUTH_POLE
    }

    /// Checks whether a point falls inside this box.
    ///
    /// Edges are half-open (south and west inclusive, north and east
    /// exclusive) so that the children of a split never share a point. The
    /// outer edges of the globe are inclusive, otherwise points sitting on
    /// the north pole or the antimeridian would belong to no box at all.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let north_ok = if self.north == NORTH_POLE {
            point.lat <= self.north
        } else {
            point.lat < self.north
        };
        let east_ok = if self.east == EAST_EDGE {
            point.lon <= self.east
        } else {
            point.lon < self.east
        };
        point.lat >= self.south && north_ok && point.lon >= self.west && east_ok
    }

    /// Bit-exact key for hashing boxes, since `f64` is not `Hash`.
    pub fn key(&self) -> [u64; 4] {
        [
            self.north.to_bits(),
            self.south.to_bits(),
            self.east.to_bits(),
            self.west.to_bits(),
        ]
    }
}

impl fmt::Display for SpatialBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[N {} S {} E {} W {}]",
            self.north, self.south, self.east, self.west
        )
    }
}
