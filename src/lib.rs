pub mod array;
pub mod config;
pub mod error;
pub mod graph;
pub mod routing;
pub mod spatial;

pub use config::{ContractionConfig, EngineConfig, GraphConfig, RouterConfig, SpatialConfig};
pub use error::{GraphError, Result};
pub use graph::{
    EdgeData, EdgeRef, Graph, GraphRead, LiveEdge, MemoryDirectedGraph, MemoryGraph, ShapeRef,
};
pub use routing::{
    CHEdgeData, CHRouter, ClosestEdge, Contractor, EdgeQuery, PathSegment, Route,
    RoutingDataSource, RoutingPoint,
};
pub use spatial::{search_hilbert, sort_hilbert, EdgeIndex, VertexIndex};

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// 1-based vertex id, 0 is never a valid vertex.
pub type VertexId = u32;

pub const NO_VERTEX: VertexId = 0;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f32,
    pub lon: f32,
}

impl Coordinate {
    pub fn new(lat: f32, lon: f32) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        use geo::{HaversineDistance, Point};

        let a = Point::new(self.lon as f64, self.lat as f64);
        let b = Point::new(other.lon as f64, other.lat as f64);
        a.haversine_distance(&b)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f32,
    pub min_lon: f32,
    pub max_lat: f32,
    pub max_lon: f32,
}

impl BoundingBox {
    pub fn new(a: Coordinate, b: Coordinate) -> Self {
        Self {
            min_lat: a.lat.min(b.lat),
            min_lon: a.lon.min(b.lon),
            max_lat: a.lat.max(b.lat),
            max_lon: a.lon.max(b.lon),
        }
    }

    /// Box of half-width `offset` degrees centered on `center`.
    pub fn around(center: Coordinate, offset: f32) -> Self {
        Self {
            min_lat: center.lat - offset,
            min_lon: center.lon - offset,
            max_lat: center.lat + offset,
            max_lon: center.lon + offset,
        }
    }

    pub fn contains(&self, coordinate: &Coordinate) -> bool {
        coordinate.lat >= self.min_lat
            && coordinate.lat <= self.max_lat
            && coordinate.lon >= self.min_lon
            && coordinate.lon <= self.max_lon
    }

    pub fn corners(&self) -> [Coordinate; 4] {
        [
            Coordinate::new(self.min_lat, self.min_lon),
            Coordinate::new(self.min_lat, self.max_lon),
            Coordinate::new(self.max_lat, self.min_lon),
            Coordinate::new(self.max_lat, self.max_lon),
        ]
    }
}
