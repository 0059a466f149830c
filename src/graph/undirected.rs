use std::{fs::File, io, path::Path};

use bytemuck::{Pod, Zeroable};

use super::{
    check_edge_endpoints, check_vertex,
    io::{
        read_coordinate, read_items, read_pod, read_shape, read_tag, read_u32, write_coordinate,
        write_pod, write_shape, write_u32, UNDIRECTED_TAG,
    },
    EdgeData, EdgeRef, Graph, GraphRead, ShapeRef, NO_EDGE,
};
use crate::{array::HugeArray, config::GraphConfig, error::Result, Coordinate, GraphError, VertexId};

/// One slot of the edge table. Each vertex owns a singly linked chain that
/// runs through `next1` where it is `vertex1` and through `next2` where it is
/// `vertex2`, so no per-vertex adjacency list is ever allocated.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
struct EdgeRecord {
    vertex1: VertexId,
    vertex2: VertexId,
    next1: u32,
    next2: u32,
}

impl EdgeRecord {
    const REMOVED: Self = Self {
        vertex1: 0,
        vertex2: 0,
        next1: NO_EDGE,
        next2: NO_EDGE,
    };

    fn next_for(&self, vertex: VertexId) -> u32 {
        if self.vertex1 == vertex {
            self.next1
        } else {
            self.next2
        }
    }

    fn other(&self, vertex: VertexId) -> VertexId {
        if self.vertex1 == vertex {
            self.vertex2
        } else {
            self.vertex1
        }
    }
}

/// Undirected graph store: adding `(u, v)` makes the edge visible from both
/// endpoints, the reverse side seeing the payload through `EdgeData::reverse`.
pub struct MemoryGraph<E: EdgeData> {
    coordinates: HugeArray<Coordinate>,
    vertices: HugeArray<u32>,
    edges: HugeArray<EdgeRecord>,
    edge_data: HugeArray<E>,
    // Stored in vertex1 -> vertex2 order.
    shapes: Vec<Option<Box<[Coordinate]>>>,
    next_vertex: u32,
    next_edge: u32,
    removed_edges: u32,
    config: GraphConfig,
}

impl<E: EdgeData> Default for MemoryGraph<E> {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}

impl<E: EdgeData> MemoryGraph<E> {
    pub fn new(config: GraphConfig) -> Self {
        let vertex_len = config.vertex_increment as usize + 1;
        let edge_len = config.edge_increment as usize;

        Self {
            coordinates: HugeArray::new(vertex_len),
            vertices: HugeArray::new(vertex_len),
            edges: HugeArray::new(edge_len),
            edge_data: HugeArray::new(edge_len),
            shapes: Vec::new(),
            next_vertex: 1,
            next_edge: 0,
            removed_edges: 0,
            config,
        }
    }

    /// Store whose fixed-stride tables are memory-mapped files inside `dir`.
    pub fn mapped(dir: impl AsRef<Path>, config: GraphConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let vertex_len = config.vertex_increment as usize + 1;
        let edge_len = config.edge_increment as usize;

        Ok(Self {
            coordinates: HugeArray::mapped(dir.join("coordinates.bin"), vertex_len)?,
            vertices: HugeArray::mapped(dir.join("vertices.bin"), vertex_len)?,
            edges: HugeArray::mapped(dir.join("edges.bin"), edge_len)?,
            edge_data: HugeArray::mapped(dir.join("edge_data.bin"), edge_len)?,
            shapes: Vec::new(),
            next_vertex: 1,
            next_edge: 0,
            removed_edges: 0,
            config,
        })
    }

    /// Number of occupied edge slots, removed edges included until `compress`.
    pub fn edge_slots(&self) -> u32 {
        self.next_edge
    }

    pub fn edge_count(&self) -> u32 {
        self.next_edge - self.removed_edges
    }

    pub fn flush(&self) -> Result<()> {
        self.coordinates.flush()?;
        self.vertices.flush()?;
        self.edges.flush()?;
        self.edge_data.flush()?;
        Ok(())
    }

    fn ensure_vertex_capacity(&mut self, required: usize) -> Result<()> {
        if required <= self.coordinates.len() {
            return Ok(());
        }
        let len = required.max(self.coordinates.len() + self.config.vertex_increment as usize);
        self.coordinates.resize(len)?;
        self.vertices.resize(len)?;
        Ok(())
    }

    fn ensure_edge_capacity(&mut self, required: usize) -> Result<()> {
        if required <= self.edges.len() {
            return Ok(());
        }
        let len = required.max(self.edges.len() + self.config.edge_increment as usize);
        self.edges.resize(len)?;
        self.edge_data.resize(len)?;
        Ok(())
    }

    fn chain(&self, vertex: VertexId) -> impl Iterator<Item = u32> + '_ {
        let mut current = self.vertices.get(vertex as usize);
        std::iter::from_fn(move || {
            if current == NO_EDGE {
                return None;
            }
            let id = current;
            current = self.edges.get(id as usize).next_for(vertex);
            Some(id)
        })
    }

    fn find_edge(&self, from: VertexId, to: VertexId) -> Option<u32> {
        self.chain(from)
            .find(|&id| self.edges.get(id as usize).other(from) == to)
    }

    fn unlink(&mut self, vertex: VertexId, id: u32) -> bool {
        let mut previous = NO_EDGE;
        let mut current = self.vertices.get(vertex as usize);

        while current != NO_EDGE {
            let next = self.edges.get(current as usize).next_for(vertex);

            if current == id {
                if previous == NO_EDGE {
                    self.vertices.set(vertex as usize, next);
                } else {
                    let mut record = self.edges.get(previous as usize);
                    if record.vertex1 == vertex {
                        record.next1 = next;
                    } else {
                        record.next2 = next;
                    }
                    self.edges.set(previous as usize, record);
                }
                return true;
            }

            previous = current;
            current = next;
        }

        false
    }

    fn remove_slot(&mut self, id: u32) {
        let record = self.edges.get(id as usize);
        let unlinked = self.unlink(record.vertex1, id) && self.unlink(record.vertex2, id);
        assert!(unlinked, "edge {id} missing from the chain of one of its endpoints");

        self.edges.set(id as usize, EdgeRecord::REMOVED);
        self.edge_data.set(id as usize, E::zeroed());
        self.shapes[id as usize] = None;
        self.removed_edges += 1;
    }

    pub fn serialize<W: io::Write>(
        &self,
        writer: &mut W,
        mut map: impl FnMut(&E, &mut dyn io::Write) -> io::Result<()>,
    ) -> Result<()> {
        write_u32(writer, UNDIRECTED_TAG)?;
        write_u32(writer, self.next_vertex)?;
        write_u32(writer, self.next_edge)?;

        for vertex in 0..self.next_vertex as usize {
            write_coordinate(writer, self.coordinates.get(vertex))?;
        }
        for vertex in 0..self.next_vertex as usize {
            write_u32(writer, self.vertices.get(vertex))?;
        }
        for id in 0..self.next_edge as usize {
            let record = self.edges.get(id);
            write_u32(writer, record.vertex1)?;
            write_u32(writer, record.vertex2)?;
            write_u32(writer, record.next1)?;
            write_u32(writer, record.next2)?;
        }
        for id in 0..self.next_edge as usize {
            map(&self.edge_data.get(id), &mut *writer)?;
        }
        for shape in &self.shapes {
            write_shape(writer, shape.as_deref())?;
        }

        Ok(())
    }

    pub fn deserialize<R: io::Read>(
        reader: &mut R,
        config: GraphConfig,
        mut map: impl FnMut(&mut dyn io::Read) -> io::Result<E>,
    ) -> Result<Self> {
        let mut buf = [0u8; 4];
        read_tag(&mut buf, reader, UNDIRECTED_TAG)?;

        let next_vertex = read_u32(&mut buf, reader)?;
        let next_edge = read_u32(&mut buf, reader)?;
        if next_vertex == 0 {
            return Err(GraphError::CorruptData(
                "vertex counter must start at 1".to_string(),
            ));
        }

        let coordinates = read_items(next_vertex, || read_coordinate(&mut buf, reader))?;
        let heads = read_items(next_vertex, || read_u32(&mut buf, reader))?;
        let records = read_items(next_edge, || {
            Ok(EdgeRecord {
                vertex1: read_u32(&mut buf, reader)?,
                vertex2: read_u32(&mut buf, reader)?,
                next1: read_u32(&mut buf, reader)?,
                next2: read_u32(&mut buf, reader)?,
            })
        })?;
        let data = read_items(next_edge, || map(&mut *reader))?;
        let shapes = read_items(next_edge, || read_shape(&mut buf, reader))?;

        // Every chain link must land on a live record holding the vertex
        // whose chain it continues.
        let links_to = |id: u32, vertex: VertexId| {
            id == NO_EDGE
                || records.get(id as usize).is_some_and(|record| {
                    record.vertex1 != 0 && (record.vertex1 == vertex || record.vertex2 == vertex)
                })
        };

        for (vertex, &head) in heads.iter().enumerate().skip(1) {
            if !links_to(head, vertex as VertexId) {
                return Err(GraphError::CorruptData(format!(
                    "vertex {vertex} starts its chain at invalid edge {head}"
                )));
            }
        }

        let mut removed_edges = 0;
        for (id, record) in records.iter().enumerate() {
            if record.vertex1 == 0 {
                removed_edges += 1;
                continue;
            }
            let known = |vertex: VertexId| vertex != 0 && vertex < next_vertex;
            if !known(record.vertex1) || !known(record.vertex2) || record.vertex1 == record.vertex2 {
                return Err(GraphError::CorruptData(format!(
                    "edge {id} references an unknown vertex"
                )));
            }
            if !links_to(record.next1, record.vertex1) || !links_to(record.next2, record.vertex2) {
                return Err(GraphError::CorruptData(format!(
                    "edge {id} links to an invalid edge"
                )));
            }
        }

        let mut graph = Self::new(config);
        graph.ensure_vertex_capacity(next_vertex as usize)?;
        graph.ensure_edge_capacity(next_edge as usize)?;

        for (vertex, (coordinate, head)) in coordinates.into_iter().zip(heads).enumerate() {
            graph.coordinates.set(vertex, coordinate);
            graph.vertices.set(vertex, head);
        }
        for (id, (record, data)) in records.into_iter().zip(data).enumerate() {
            graph.edges.set(id, record);
            graph.edge_data.set(id, data);
        }
        graph.shapes = shapes;

        graph.next_vertex = next_vertex;
        graph.next_edge = next_edge;
        graph.removed_edges = removed_edges;

        Ok(graph)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = io::BufWriter::new(File::create(path)?);
        self.serialize(&mut writer, write_pod)?;
        io::Write::flush(&mut writer)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>, config: GraphConfig) -> Result<Self> {
        Self::deserialize(&mut io::BufReader::new(File::open(path)?), config, read_pod)
    }
}

pub struct UndirectedEdges<'a, E: EdgeData> {
    graph: &'a MemoryGraph<E>,
    vertex: VertexId,
    first: u32,
    current: u32,
}

impl<E: EdgeData> UndirectedEdges<'_, E> {
    pub fn reset(&mut self) {
        self.current = self.first;
    }
}

impl<'a, E: EdgeData> Iterator for UndirectedEdges<'a, E> {
    type Item = EdgeRef<'a, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == NO_EDGE {
            return None;
        }

        let id = self.current as usize;
        let record = self.graph.edges.get(id);
        let data = self.graph.edge_data.get(id);
        let shape = self.graph.shapes[id].as_deref();

        if record.vertex1 == self.vertex {
            self.current = record.next1;
            Some(EdgeRef {
                neighbour: record.vertex2,
                data,
                shape: shape.map(|shape| ShapeRef::new(shape, false)),
            })
        } else {
            self.current = record.next2;
            Some(EdgeRef {
                neighbour: record.vertex1,
                data: data.reverse(),
                shape: shape.map(|shape| ShapeRef::new(shape, true)),
            })
        }
    }
}

impl<E: EdgeData> GraphRead<E> for MemoryGraph<E> {
    type Edges<'a> = UndirectedEdges<'a, E> where Self: 'a;

    fn vertex_count(&self) -> u32 {
        self.next_vertex - 1
    }

    fn get_vertex(&self, vertex: VertexId) -> Option<Coordinate> {
        check_vertex(vertex, self.vertex_count()).ok()?;
        Some(self.coordinates.get(vertex as usize))
    }

    fn get_edges(&self, vertex: VertexId) -> Result<UndirectedEdges<'_, E>> {
        check_vertex(vertex, self.vertex_count())?;
        let first = self.vertices.get(vertex as usize);
        Ok(UndirectedEdges {
            graph: self,
            vertex,
            first,
            current: first,
        })
    }

    fn is_directed(&self) -> bool {
        false
    }

    fn can_have_duplicates(&self) -> bool {
        false
    }
}

impl<E: EdgeData> Graph<E> for MemoryGraph<E> {
    fn add_vertex(&mut self, lat: f32, lon: f32) -> Result<VertexId> {
        let vertex = self.next_vertex;
        self.ensure_vertex_capacity(vertex as usize + 1)?;

        self.coordinates.set(vertex as usize, Coordinate { lat, lon });
        self.vertices.set(vertex as usize, NO_EDGE);
        self.next_vertex += 1;

        Ok(vertex)
    }

    fn set_vertex(&mut self, vertex: VertexId, lat: f32, lon: f32) -> Result<()> {
        check_vertex(vertex, self.vertex_count())?;
        self.coordinates.set(vertex as usize, Coordinate { lat, lon });
        Ok(())
    }

    fn add_edge_with_shape(
        &mut self,
        from: VertexId,
        to: VertexId,
        data: E,
        shape: Option<Vec<Coordinate>>,
    ) -> Result<()> {
        check_edge_endpoints(from, to, self.vertex_count())?;

        if let Some(id) = self.find_edge(from, to) {
            let record = self.edges.get(id as usize);
            let shape = if record.vertex1 == from {
                self.edge_data.set(id as usize, data);
                shape
            } else {
                self.edge_data.set(id as usize, data.reverse());
                shape.map(|mut shape| {
                    shape.reverse();
                    shape
                })
            };
            self.shapes[id as usize] = shape.map(Vec::into_boxed_slice);
            return Ok(());
        }

        let id = self.next_edge;
        self.ensure_edge_capacity(id as usize + 1)?;

        self.edges.set(
            id as usize,
            EdgeRecord {
                vertex1: from,
                vertex2: to,
                next1: self.vertices.get(from as usize),
                next2: self.vertices.get(to as usize),
            },
        );
        self.vertices.set(from as usize, id);
        self.vertices.set(to as usize, id);
        self.edge_data.set(id as usize, data);
        self.shapes.push(shape.map(Vec::into_boxed_slice));
        self.next_edge += 1;

        Ok(())
    }

    fn remove_edge(&mut self, from: VertexId, to: VertexId) -> Result<usize> {
        check_vertex(from, self.vertex_count())?;
        check_vertex(to, self.vertex_count())?;

        match self.find_edge(from, to) {
            Some(id) => {
                self.remove_slot(id);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn remove_edges(&mut self, vertex: VertexId) -> Result<usize> {
        check_vertex(vertex, self.vertex_count())?;

        let ids: Vec<u32> = self.chain(vertex).collect();
        for &id in &ids {
            self.remove_slot(id);
        }
        Ok(ids.len())
    }

    fn compress(&mut self) -> Result<()> {
        let mut relocated = vec![NO_EDGE; self.next_edge as usize];
        let mut live = 0u32;
        for id in 0..self.next_edge as usize {
            if self.edges.get(id).vertex1 != 0 {
                relocated[id] = live;
                live += 1;
            }
        }

        let remap = |id: u32| -> u32 {
            if id == NO_EDGE {
                return NO_EDGE;
            }
            let target = relocated[id as usize];
            assert!(target != NO_EDGE, "adjacency chain points at removed edge {id}");
            target
        };

        // Targets never exceed sources, so ascending order only ever
        // overwrites slots that were already read.
        for id in 0..self.next_edge as usize {
            let target = relocated[id];
            if target == NO_EDGE {
                continue;
            }
            let mut record = self.edges.get(id);
            record.next1 = remap(record.next1);
            record.next2 = remap(record.next2);
            self.edges.set(target as usize, record);
            self.edge_data.set(target as usize, self.edge_data.get(id));
            self.shapes.swap(target as usize, id);
        }

        for vertex in 1..self.next_vertex as usize {
            self.vertices.set(vertex, remap(self.vertices.get(vertex)));
        }

        tracing::debug!(
            removed = self.removed_edges,
            edges = live,
            "compressed undirected graph"
        );

        for id in live as usize..self.next_edge as usize {
            self.edges.set(id, EdgeRecord::REMOVED);
            self.edge_data.set(id, E::zeroed());
        }
        self.shapes.truncate(live as usize);
        self.next_edge = live;
        self.removed_edges = 0;

        self.coordinates.resize(self.next_vertex as usize)?;
        self.vertices.resize(self.next_vertex as usize)?;

        Ok(())
    }

    fn trim(&mut self) -> Result<()> {
        self.coordinates.resize(self.next_vertex as usize)?;
        self.vertices.resize(self.next_vertex as usize)?;
        self.edges.resize(self.next_edge as usize)?;
        self.edge_data.resize(self.next_edge as usize)?;
        self.shapes.shrink_to_fit();
        Ok(())
    }

    fn resize(&mut self, vertex_estimate: u32, edge_estimate: u32) -> Result<()> {
        let vertex_len = (vertex_estimate as usize + 1).max(self.next_vertex as usize);
        let edge_len = (edge_estimate as usize).max(self.next_edge as usize);

        self.coordinates.resize(vertex_len)?;
        self.vertices.resize(vertex_len)?;
        self.edges.resize(edge_len)?;
        self.edge_data.resize(edge_len)?;
        self.shapes.reserve(edge_len.saturating_sub(self.shapes.len()));
        Ok(())
    }

    fn switch(&mut self, vertex1: VertexId, vertex2: VertexId) -> Result<()> {
        check_vertex(vertex1, self.vertex_count())?;
        check_vertex(vertex2, self.vertex_count())?;
        if vertex1 == vertex2 {
            return Ok(());
        }

        let mut ids: Vec<u32> = self.chain(vertex1).chain(self.chain(vertex2)).collect();
        ids.sort_unstable();
        ids.dedup();

        let swap = |vertex: VertexId| {
            if vertex == vertex1 {
                vertex2
            } else if vertex == vertex2 {
                vertex1
            } else {
                vertex
            }
        };

        for id in ids {
            let mut record = self.edges.get(id as usize);
            record.vertex1 = swap(record.vertex1);
            record.vertex2 = swap(record.vertex2);
            self.edges.set(id as usize, record);
        }

        let (v1, v2) = (vertex1 as usize, vertex2 as usize);
        self.vertices.as_mut_slice().swap(v1, v2);
        self.coordinates.as_mut_slice().swap(v1, v2);

        Ok(())
    }
}
