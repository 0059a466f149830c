//! Graph stores: a vertex table of coordinates plus an edge table with a
//! fixed-size payload per edge and optional shape coordinates.

use std::fmt::Debug;

use bytemuck::{Pod, Zeroable};

use crate::{error::Result, Coordinate, VertexId};

mod directed;
mod io;
mod undirected;

pub use directed::{DirectedEdges, MemoryDirectedGraph};
pub use undirected::{MemoryGraph, UndirectedEdges};

pub(crate) const NO_EDGE: u32 = u32::MAX;

/// Fixed-size payload stored once per edge.
pub trait EdgeData: Pod + PartialEq + Debug {
    fn forward(&self) -> bool;

    fn tags(&self) -> u32;

    /// The same payload seen from the other endpoint.
    fn reverse(&self) -> Self;
}

/// Shape coordinates of an edge as seen from the vertex it was read from.
#[derive(Copy, Clone, Debug)]
pub struct ShapeRef<'a> {
    coordinates: &'a [Coordinate],
    reversed: bool,
}

impl<'a> ShapeRef<'a> {
    pub(crate) fn new(coordinates: &'a [Coordinate], reversed: bool) -> Self {
        Self {
            coordinates,
            reversed,
        }
    }

    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Coordinate> + 'a {
        let coordinates = self.coordinates;
        let reversed = self.reversed;
        (0..coordinates.len()).map(move |i| {
            if reversed {
                coordinates[coordinates.len() - 1 - i]
            } else {
                coordinates[i]
            }
        })
    }

    pub fn to_vec(&self) -> Vec<Coordinate> {
        self.iter().collect()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct EdgeRef<'a, E> {
    pub neighbour: VertexId,
    pub data: E,
    pub shape: Option<ShapeRef<'a>>,
}

/// Read side of a graph store.
pub trait GraphRead<E: EdgeData> {
    type Edges<'a>: Iterator<Item = EdgeRef<'a, E>>
    where
        Self: 'a;

    /// Number of vertices, valid ids are `1..=vertex_count()`.
    fn vertex_count(&self) -> u32;

    fn get_vertex(&self, vertex: VertexId) -> Option<Coordinate>;

    fn get_edges(&self, vertex: VertexId) -> Result<Self::Edges<'_>>;

    fn is_directed(&self) -> bool;

    fn can_have_duplicates(&self) -> bool;

    fn contains_edge(&self, from: VertexId, to: VertexId) -> Result<bool> {
        Ok(self.get_edges(from)?.any(|edge| edge.neighbour == to))
    }

    /// Payload of the edge `from -> to`, only defined on stores without duplicates.
    fn get_edge(&self, from: VertexId, to: VertexId) -> Result<Option<E>> {
        if self.can_have_duplicates() {
            return Err(crate::GraphError::InvalidOperation(
                "edge lookup by vertex pair on a store that allows duplicate edges",
            ));
        }
        Ok(self
            .get_edges(from)?
            .find(|edge| edge.neighbour == to)
            .map(|edge| edge.data))
    }

    fn get_edge_shape(&self, from: VertexId, to: VertexId) -> Result<Option<Vec<Coordinate>>> {
        if self.can_have_duplicates() {
            return Err(crate::GraphError::InvalidOperation(
                "shape lookup by vertex pair on a store that allows duplicate edges",
            ));
        }
        Ok(self
            .get_edges(from)?
            .find(|edge| edge.neighbour == to)
            .and_then(|edge| edge.shape.map(|shape| shape.to_vec())))
    }
}

/// Write side of a graph store.
pub trait Graph<E: EdgeData>: GraphRead<E> {
    fn add_vertex(&mut self, lat: f32, lon: f32) -> Result<VertexId>;

    fn set_vertex(&mut self, vertex: VertexId, lat: f32, lon: f32) -> Result<()>;

    fn add_edge(&mut self, from: VertexId, to: VertexId, data: E) -> Result<()> {
        self.add_edge_with_shape(from, to, data, None)
    }

    fn add_edge_with_shape(
        &mut self,
        from: VertexId,
        to: VertexId,
        data: E,
        shape: Option<Vec<Coordinate>>,
    ) -> Result<()>;

    /// Removes every edge between `from` and `to`, returns how many were removed.
    fn remove_edge(&mut self, from: VertexId, to: VertexId) -> Result<usize>;

    fn remove_edges(&mut self, vertex: VertexId) -> Result<usize>;

    /// Relocates edges to close the holes left by removals.
    fn compress(&mut self) -> Result<()>;

    /// Shrinks the backing arrays to the current element counts.
    fn trim(&mut self) -> Result<()>;

    fn resize(&mut self, vertex_estimate: u32, edge_estimate: u32) -> Result<()>;

    /// Exchanges the coordinates and adjacency of two vertices.
    fn switch(&mut self, vertex1: VertexId, vertex2: VertexId) -> Result<()>;
}

/// Plain road edge payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LiveEdge {
    pub tags: u32,
    pub distance: f32,
    forward: u8,
    _pad: [u8; 3],
}

impl LiveEdge {
    pub fn new(tags: u32, distance: f32, forward: bool) -> Self {
        Self {
            tags,
            distance,
            forward: forward as u8,
            _pad: [0; 3],
        }
    }
}

impl EdgeData for LiveEdge {
    fn forward(&self) -> bool {
        self.forward != 0
    }

    fn tags(&self) -> u32 {
        self.tags
    }

    fn reverse(&self) -> Self {
        Self::new(self.tags, self.distance, !self.forward())
    }
}

pub(crate) fn check_vertex(vertex: VertexId, count: u32) -> Result<()> {
    if vertex == 0 || vertex > count {
        return Err(crate::GraphError::out_of_range(vertex, count));
    }
    Ok(())
}

pub(crate) fn check_edge_endpoints(from: VertexId, to: VertexId, count: u32) -> Result<()> {
    if from == to {
        return Err(crate::GraphError::InvalidArgument(format!(
            "cannot add an edge from vertex {from} to itself"
        )));
    }
    check_vertex(from, count)?;
    check_vertex(to, count)
}
