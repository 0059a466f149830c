use std::{fs::File, io, path::Path};

use bytemuck::{Pod, Zeroable};

use super::{
    check_edge_endpoints, check_vertex,
    io::{
        read_coordinate, read_items, read_pod, read_shape, read_tag, read_u32, write_coordinate,
        write_pod, write_shape, write_u32, DIRECTED_TAG,
    },
    EdgeData, EdgeRef, Graph, GraphRead, ShapeRef,
};
use crate::{array::HugeArray, config::GraphConfig, error::Result, Coordinate, GraphError, VertexId};

/// A vertex's slice of the shared edge pool. Full blocks double their
/// capacity and move to the end of the pool.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
struct VertexBlock {
    first: u32,
    count: u32,
    capacity: u32,
}

impl VertexBlock {
    fn slots(&self) -> std::ops::Range<usize> {
        self.first as usize..(self.first + self.count) as usize
    }
}

/// Directed graph store: `(u, v)` is only visible from `u`, and repeated
/// edges between the same pair accumulate.
pub struct MemoryDirectedGraph<E: EdgeData> {
    coordinates: HugeArray<Coordinate>,
    vertices: HugeArray<VertexBlock>,
    neighbours: HugeArray<VertexId>,
    edge_data: HugeArray<E>,
    shapes: Vec<Option<Box<[Coordinate]>>>,
    next_vertex: u32,
    next_edge: u32,
    config: GraphConfig,
}

impl<E: EdgeData> Default for MemoryDirectedGraph<E> {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}

impl<E: EdgeData> MemoryDirectedGraph<E> {
    pub fn new(config: GraphConfig) -> Self {
        let vertex_len = config.vertex_increment as usize + 1;
        let edge_len = config.edge_increment as usize;

        Self {
            coordinates: HugeArray::new(vertex_len),
            vertices: HugeArray::new(vertex_len),
            neighbours: HugeArray::new(edge_len),
            edge_data: HugeArray::new(edge_len),
            shapes: Vec::new(),
            next_vertex: 1,
            next_edge: 0,
            config,
        }
    }

    pub fn mapped(dir: impl AsRef<Path>, config: GraphConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let vertex_len = config.vertex_increment as usize + 1;
        let edge_len = config.edge_increment as usize;

        Ok(Self {
            coordinates: HugeArray::mapped(dir.join("coordinates.bin"), vertex_len)?,
            vertices: HugeArray::mapped(dir.join("vertices.bin"), vertex_len)?,
            neighbours: HugeArray::mapped(dir.join("neighbours.bin"), edge_len)?,
            edge_data: HugeArray::mapped(dir.join("edge_data.bin"), edge_len)?,
            shapes: Vec::new(),
            next_vertex: 1,
            next_edge: 0,
            config,
        })
    }

    pub fn edge_count(&self) -> u32 {
        (1..self.next_vertex as usize)
            .map(|vertex| self.vertices.get(vertex).count)
            .sum()
    }

    /// Size of the edge pool including spare block capacity.
    pub fn edge_slots(&self) -> u32 {
        self.next_edge
    }

    pub fn flush(&self) -> Result<()> {
        self.coordinates.flush()?;
        self.vertices.flush()?;
        self.neighbours.flush()?;
        self.edge_data.flush()?;
        Ok(())
    }

    pub fn contains_edge_data(&self, from: VertexId, to: VertexId, data: &E) -> Result<bool> {
        Ok(self
            .get_edges(from)?
            .any(|edge| edge.neighbour == to && edge.data == *data))
    }

    /// Removes the first edge `from -> to` carrying exactly `data`; later
    /// edges of `from` keep their relative order.
    pub fn remove_edge_data(&mut self, from: VertexId, to: VertexId, data: &E) -> Result<bool> {
        check_vertex(from, self.vertex_count())?;
        check_vertex(to, self.vertex_count())?;

        let block = self.vertices.get(from as usize);
        let found = block.slots().find(|&slot| {
            self.neighbours.get(slot) == to && self.edge_data.get(slot) == *data
        });

        match found {
            Some(slot) => {
                self.remove_slots(from, |_, candidate| candidate == slot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // Keeps the entries for which `remove` is false, in order, and clears the tail.
    fn remove_slots(&mut self, vertex: VertexId, remove: impl Fn(&Self, usize) -> bool) -> usize {
        let mut block = self.vertices.get(vertex as usize);
        let mut write = block.first as usize;

        for slot in block.slots() {
            if remove(self, slot) {
                continue;
            }
            if write != slot {
                self.neighbours.set(write, self.neighbours.get(slot));
                self.edge_data.set(write, self.edge_data.get(slot));
                self.shapes.swap(write, slot);
            }
            write += 1;
        }

        let end = block.slots().end;
        for slot in write..end {
            self.clear_slot(slot);
        }

        let removed = end - write;
        block.count -= removed as u32;
        self.vertices.set(vertex as usize, block);
        removed
    }

    fn clear_slot(&mut self, slot: usize) {
        self.neighbours.set(slot, 0);
        self.edge_data.set(slot, E::zeroed());
        self.shapes[slot] = None;
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

    fn grow_pool(&mut self, end: u32) -> Result<()> {
        let required = end as usize;
        if required > self.neighbours.len() {
            let len = required.max(self.neighbours.len() + self.config.edge_increment as usize);
            self.neighbours.resize(len)?;
            self.edge_data.resize(len)?;
        }
        if required > self.shapes.len() {
            self.shapes.resize_with(required, || None);
        }
        self.next_edge = self.next_edge.max(end);
        Ok(())
    }

    fn grow_block(&mut self, mut block: VertexBlock) -> Result<VertexBlock> {
        let capacity = if block.capacity == 0 {
            1
        } else {
            block.capacity * 2
        };

        if block.capacity > 0 && block.first + block.capacity == self.next_edge {
            self.grow_pool(block.first + capacity)?;
        } else {
            let first = self.next_edge;
            self.grow_pool(first + capacity)?;

            for offset in 0..block.count as usize {
                let from = block.first as usize + offset;
                let to = first as usize + offset;
                self.neighbours.set(to, self.neighbours.get(from));
                self.edge_data.set(to, self.edge_data.get(from));
                self.shapes[to] = self.shapes[from].take();
                self.clear_slot(from);
            }
            block.first = first;
        }

        block.capacity = capacity;
        Ok(block)
    }

    pub fn serialize<W: io::Write>(
        &self,
        writer: &mut W,
        mut map: impl FnMut(&E, &mut dyn io::Write) -> io::Result<()>,
    ) -> Result<()> {
        write_u32(writer, DIRECTED_TAG)?;
        write_u32(writer, self.next_vertex)?;
        write_u32(writer, self.next_edge)?;

        for vertex in 0..self.next_vertex as usize {
            write_coordinate(writer, self.coordinates.get(vertex))?;
        }
        for vertex in 0..self.next_vertex as usize {
            let block = self.vertices.get(vertex);
            write_u32(writer, block.first)?;
            write_u32(writer, block.count)?;
            write_u32(writer, block.capacity)?;
        }
        for slot in 0..self.next_edge as usize {
            write_u32(writer, self.neighbours.get(slot))?;
        }
        for slot in 0..self.next_edge as usize {
            map(&self.edge_data.get(slot), &mut *writer)?;
        }
        for shape in &self.shapes[..self.next_edge as usize] {
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
        read_tag(&mut buf, reader, DIRECTED_TAG)?;

        let next_vertex = read_u32(&mut buf, reader)?;
        let next_edge = read_u32(&mut buf, reader)?;
        if next_vertex == 0 {
            return Err(GraphError::CorruptData(
                "vertex counter must start at 1".to_string(),
            ));
        }

        let coordinates = read_items(next_vertex, || read_coordinate(&mut buf, reader))?;
        let blocks = read_items(next_vertex, || {
            Ok(VertexBlock {
                first: read_u32(&mut buf, reader)?,
                count: read_u32(&mut buf, reader)?,
                capacity: read_u32(&mut buf, reader)?,
            })
        })?;
        let neighbours = read_items(next_edge, || read_u32(&mut buf, reader))?;
        let data = read_items(next_edge, || map(&mut *reader))?;
        let shapes = read_items(next_edge, || read_shape(&mut buf, reader))?;

        for (vertex, block) in blocks.iter().enumerate() {
            let end = block.first as u64 + block.capacity as u64;
            if block.count > block.capacity || (block.capacity > 0 && end > next_edge as u64) {
                return Err(GraphError::CorruptData(format!(
                    "edge block of vertex {vertex} lies outside the edge pool"
                )));
            }
            if block.slots().any(|slot| neighbours[slot] == 0 || neighbours[slot] >= next_vertex) {
                return Err(GraphError::CorruptData(format!(
                    "vertex {vertex} has an edge to an unknown vertex"
                )));
            }
        }

        let mut graph = Self::new(config);
        graph.ensure_vertex_capacity(next_vertex as usize)?;
        graph.grow_pool(next_edge)?;

        for (vertex, (coordinate, block)) in coordinates.into_iter().zip(blocks).enumerate() {
            graph.coordinates.set(vertex, coordinate);
            graph.vertices.set(vertex, block);
        }
        for (slot, (neighbour, data)) in neighbours.into_iter().zip(data).enumerate() {
            graph.neighbours.set(slot, neighbour);
            graph.edge_data.set(slot, data);
        }
        for (slot, shape) in shapes.into_iter().enumerate() {
            graph.shapes[slot] = shape;
        }

        graph.next_vertex = next_vertex;
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

pub struct DirectedEdges<'a, E: EdgeData> {
    graph: &'a MemoryDirectedGraph<E>,
    first: usize,
    end: usize,
    current: usize,
}

impl<E: EdgeData> DirectedEdges<'_, E> {
    pub fn reset(&mut self) {
        self.current = self.first;
    }
}

impl<'a, E: EdgeData> Iterator for DirectedEdges<'a, E> {
    type Item = EdgeRef<'a, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.end {
            return None;
        }

        let slot = self.current;
        self.current += 1;

        Some(EdgeRef {
            neighbour: self.graph.neighbours.get(slot),
            data: self.graph.edge_data.get(slot),
            shape: self.graph.shapes[slot]
                .as_deref()
                .map(|shape| ShapeRef::new(shape, false)),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.current;
        (remaining, Some(remaining))
    }
}

impl<E: EdgeData> GraphRead<E> for MemoryDirectedGraph<E> {
    type Edges<'a> = DirectedEdges<'a, E> where Self: 'a;

    fn vertex_count(&self) -> u32 {
        self.next_vertex - 1
    }

    fn get_vertex(&self, vertex: VertexId) -> Option<Coordinate> {
        check_vertex(vertex, self.vertex_count()).ok()?;
        Some(self.coordinates.get(vertex as usize))
    }

    fn get_edges(&self, vertex: VertexId) -> Result<DirectedEdges<'_, E>> {
        check_vertex(vertex, self.vertex_count())?;
        let slots = self.vertices.get(vertex as usize).slots();
        Ok(DirectedEdges {
            graph: self,
            first: slots.start,
            end: slots.end,
            current: slots.start,
        })
    }

    fn is_directed(&self) -> bool {
        true
    }

    fn can_have_duplicates(&self) -> bool {
        true
    }
}

impl<E: EdgeData> Graph<E> for MemoryDirectedGraph<E> {
    fn add_vertex(&mut self, lat: f32, lon: f32) -> Result<VertexId> {
        let vertex = self.next_vertex;
        self.ensure_vertex_capacity(vertex as usize + 1)?;

        self.coordinates.set(vertex as usize, Coordinate { lat, lon });
        self.vertices.set(vertex as usize, VertexBlock::default());
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

        let mut block = self.vertices.get(from as usize);
        if block.count == block.capacity {
            block = self.grow_block(block)?;
        }

        let slot = (block.first + block.count) as usize;
        self.neighbours.set(slot, to);
        self.edge_data.set(slot, data);
        self.shapes[slot] = shape.map(Vec::into_boxed_slice);

        block.count += 1;
        self.vertices.set(from as usize, block);

        Ok(())
    }

    fn remove_edge(&mut self, from: VertexId, to: VertexId) -> Result<usize> {
        check_vertex(from, self.vertex_count())?;
        check_vertex(to, self.vertex_count())?;

        Ok(self.remove_slots(from, |graph, slot| graph.neighbours.get(slot) == to))
    }

    fn remove_edges(&mut self, vertex: VertexId) -> Result<usize> {
        check_vertex(vertex, self.vertex_count())?;
        Ok(self.remove_slots(vertex, |_, _| true))
    }

    fn compress(&mut self) -> Result<()> {
        let mut neighbours = Vec::new();
        let mut edge_data = Vec::new();
        let mut shapes = Vec::new();

        for vertex in 1..self.next_vertex as usize {
            let block = self.vertices.get(vertex);
            let first = neighbours.len() as u32;
            for slot in block.slots() {
                neighbours.push(self.neighbours.get(slot));
                edge_data.push(self.edge_data.get(slot));
                shapes.push(self.shapes[slot].take());
            }
            self.vertices.set(
                vertex,
                VertexBlock {
                    first,
                    count: block.count,
                    capacity: block.count,
                },
            );
        }

        tracing::debug!(
            pool = self.next_edge,
            edges = neighbours.len(),
            "compressed directed graph"
        );

        for slot in 0..self.next_edge as usize {
            self.neighbours.set(slot, 0);
            self.edge_data.set(slot, E::zeroed());
        }
        for (slot, (neighbour, data)) in neighbours.into_iter().zip(edge_data).enumerate() {
            self.neighbours.set(slot, neighbour);
            self.edge_data.set(slot, data);
        }
        self.next_edge = shapes.len() as u32;
        self.shapes = shapes;

        self.coordinates.resize(self.next_vertex as usize)?;
        self.vertices.resize(self.next_vertex as usize)?;

        Ok(())
    }

    fn trim(&mut self) -> Result<()> {
        self.coordinates.resize(self.next_vertex as usize)?;
        self.vertices.resize(self.next_vertex as usize)?;
        self.neighbours.resize(self.next_edge as usize)?;
        self.edge_data.resize(self.next_edge as usize)?;
        self.shapes.truncate(self.next_edge as usize);
        self.shapes.shrink_to_fit();
        Ok(())
    }

    fn resize(&mut self, vertex_estimate: u32, edge_estimate: u32) -> Result<()> {
        let vertex_len = (vertex_estimate as usize + 1).max(self.next_vertex as usize);
        let edge_len = (edge_estimate as usize).max(self.next_edge as usize);

        self.coordinates.resize(vertex_len)?;
        self.vertices.resize(vertex_len)?;
        self.neighbours.resize(edge_len)?;
        self.edge_data.resize(edge_len)?;
        Ok(())
    }

    /// Costs a scan over every edge: incoming edges are not indexed.
    fn switch(&mut self, vertex1: VertexId, vertex2: VertexId) -> Result<()> {
        check_vertex(vertex1, self.vertex_count())?;
        check_vertex(vertex2, self.vertex_count())?;
        if vertex1 == vertex2 {
            return Ok(());
        }

        let (v1, v2) = (vertex1 as usize, vertex2 as usize);
        self.vertices.as_mut_slice().swap(v1, v2);
        self.coordinates.as_mut_slice().swap(v1, v2);

        for vertex in 1..self.next_vertex as usize {
            for slot in self.vertices.get(vertex).slots() {
                let neighbour = self.neighbours.get(slot);
                if neighbour == vertex1 {
                    self.neighbours.set(slot, vertex2);
                } else if neighbour == vertex2 {
                    self.neighbours.set(slot, vertex1);
                }
            }
        }

        Ok(())
    }
}
