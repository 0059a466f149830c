use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use super::CHEdgeData;
use crate::{
    config::{ContractionConfig, GraphConfig},
    error::Result,
    graph::{EdgeData, Graph, GraphRead, MemoryDirectedGraph},
    GraphError, VertexId, NO_VERTEX,
};

#[derive(Copy, Clone, Debug)]
struct Edge {
    to: VertexId,
    weight: f32,
    contracted_id: VertexId,
    tags: u32,
}

struct VertexImportance {
    vertex: VertexId,
    importance: i64,
}

impl Eq for VertexImportance {}
impl PartialEq for VertexImportance {
    fn eq(&self, other: &Self) -> bool {
        self.importance == other.importance && self.vertex == other.vertex
    }
}

impl PartialOrd for VertexImportance {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VertexImportance {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Inverted for min-heap
        other
            .importance
            .cmp(&self.importance)
            .then_with(|| other.vertex.cmp(&self.vertex))
    }
}

struct WitnessState {
    cost: f32,
    vertex: VertexId,
}

impl Eq for WitnessState {}
impl PartialEq for WitnessState {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl PartialOrd for WitnessState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WitnessState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.cost.total_cmp(&self.cost)
    }
}

/// Builds a contraction hierarchy out of a plain road graph.
///
/// Vertices are contracted in order of edge difference, re-evaluated lazily
/// when popped. The result is an upward graph: every vertex only keeps the
/// edges towards higher ranked neighbours, shortcuts carry the id of the
/// vertex they bypass.
#[derive(Debug, Clone, Default)]
pub struct Contractor {
    config: ContractionConfig,
}

impl Contractor {
    pub fn new(config: ContractionConfig) -> Self {
        Self { config }
    }

    /// Contracts `graph`. `weight` gives the cost of traversing an edge in
    /// the direction it was read, `None` when it cannot be traversed that way.
    pub fn contract<E, G, W>(&self, graph: &G, weight: W) -> Result<MemoryDirectedGraph<CHEdgeData>>
    where
        E: EdgeData,
        G: GraphRead<E>,
        W: Fn(&E) -> Option<f32>,
    {
        let mut hierarchy = Hierarchy::load(graph, weight)?;
        let ranks = hierarchy.contract(self.config.witness_settle_limit);
        hierarchy.build_upward(graph, &ranks)
    }
}

struct Hierarchy {
    forward_edges: Vec<Vec<Edge>>,
    backward_edges: Vec<Vec<Edge>>,
    contracted: Vec<bool>,
    shortcuts: usize,
}

impl Hierarchy {
    fn load<E, G, W>(graph: &G, weight: W) -> Result<Self>
    where
        E: EdgeData,
        G: GraphRead<E>,
        W: Fn(&E) -> Option<f32>,
    {
        let slots = graph.vertex_count() as usize + 1;
        let mut this = Self {
            forward_edges: vec![vec![]; slots],
            backward_edges: vec![vec![]; slots],
            contracted: vec![false; slots],
            shortcuts: 0,
        };

        for vertex in 1..=graph.vertex_count() {
            for edge in graph.get_edges(vertex)? {
                let Some(cost) = weight(&edge.data) else {
                    continue;
                };
                if !(cost >= 0.0) {
                    return Err(GraphError::InvalidArgument(format!(
                        "edge {vertex} -> {} has weight {cost}",
                        edge.neighbour
                    )));
                }

                this.insert_edge(
                    vertex,
                    Edge {
                        to: edge.neighbour,
                        weight: cost,
                        contracted_id: NO_VERTEX,
                        tags: edge.data.tags(),
                    },
                );
            }
        }

        Ok(this)
    }

    /// Contracts every vertex and returns the rank of each one.
    fn contract(&mut self, settle_limit: usize) -> Vec<u32> {
        let vertex_count = self.contracted.len() - 1;
        let mut ranks = vec![0; vertex_count + 1];

        let mut remaining: BinaryHeap<_> = (1..=vertex_count as VertexId)
            .map(|vertex| VertexImportance {
                importance: self.edge_difference(
                    vertex,
                    self.get_required_shortcuts(vertex, settle_limit).len(),
                ),
                vertex,
            })
            .collect();

        let mut next_rank = 1;

        while let Some(entry) = remaining.pop() {
            let vertex = entry.vertex;
            let required_shortcuts = self.get_required_shortcuts(vertex, settle_limit);
            let importance = self.edge_difference(vertex, required_shortcuts.len());

            if importance > entry.importance {
                remaining.push(VertexImportance { vertex, importance });
                continue;
            }

            ranks[vertex as usize] = next_rank;
            next_rank += 1;

            for (from, to, weight) in required_shortcuts {
                self.add_shortcut(from, to, vertex, weight);
            }

            self.contracted[vertex as usize] = true;

            if next_rank % 10_000 == 0 {
                tracing::debug!(
                    contracted = next_rank,
                    remaining = remaining.len(),
                    shortcuts = self.shortcuts,
                    "contraction progress"
                );
            }
        }

        ranks
    }

    /// Shortcuts needed minus edges removed when `vertex` is contracted now.
    fn edge_difference(&self, vertex: VertexId, shortcuts: usize) -> i64 {
        let live = |edges: &[Edge]| {
            edges
                .iter()
                .filter(|edge| !self.contracted[edge.to as usize])
                .count()
        };
        let removed = live(&self.forward_edges[vertex as usize])
            + live(&self.backward_edges[vertex as usize]);

        shortcuts as i64 - removed as i64
    }

    fn get_required_shortcuts(
        &self,
        vertex: VertexId,
        settle_limit: usize,
    ) -> Vec<(VertexId, VertexId, f32)> {
        let incoming = &self.backward_edges[vertex as usize];
        let outgoing = &self.forward_edges[vertex as usize];

        let mut pairs = FxHashMap::default();

        for in_edge in incoming {
            for out_edge in outgoing {
                if in_edge.to == out_edge.to
                    || self.contracted[in_edge.to as usize]
                    || self.contracted[out_edge.to as usize]
                {
                    continue;
                }

                let path_weight = in_edge.weight + out_edge.weight;
                let current = pairs
                    .entry((in_edge.to, out_edge.to))
                    .or_insert(path_weight);
                *current = current.min(path_weight);
            }
        }

        let mut required_shortcuts: Vec<_> = pairs
            .into_iter()
            .filter(|&((from, to), path_weight)| {
                !self.witness_path_exists(from, to, vertex, path_weight, settle_limit)
            })
            .map(|((from, to), path_weight)| (from, to, path_weight))
            .collect();
        required_shortcuts.sort_unstable_by_key(|&(from, to, _)| (from, to));

        required_shortcuts
    }

    /// Searches for a path `from -> to` avoiding `via` no longer than
    /// `max_weight`. Gives up, answering no, after `settle_limit` vertices.
    fn witness_path_exists(
        &self,
        from: VertexId,
        to: VertexId,
        via: VertexId,
        max_weight: f32,
        settle_limit: usize,
    ) -> bool {
        let mut distances = FxHashMap::default();
        let mut heap = BinaryHeap::new();
        let mut settled = 0;

        distances.insert(from, 0.0);
        heap.push(WitnessState {
            cost: 0.0,
            vertex: from,
        });

        while let Some(WitnessState { cost, vertex }) = heap.pop() {
            if distances.get(&vertex).is_some_and(|&best| cost > best) {
                continue;
            }

            if cost > max_weight {
                return false;
            }

            if vertex == to {
                return true;
            }

            settled += 1;
            if settled > settle_limit {
                return false;
            }

            for edge in &self.forward_edges[vertex as usize] {
                if edge.to == via || self.contracted[edge.to as usize] {
                    continue;
                }

                let cost = cost + edge.weight;
                let distance = distances.entry(edge.to).or_insert(f32::MAX);
                if cost < *distance {
                    *distance = cost;
                    heap.push(WitnessState {
                        cost,
                        vertex: edge.to,
                    });
                }
            }
        }

        false
    }

    fn add_shortcut(&mut self, from: VertexId, to: VertexId, via: VertexId, weight: f32) {
        if self.insert_edge(
            from,
            Edge {
                to,
                weight,
                contracted_id: via,
                tags: 0,
            },
        ) {
            self.shortcuts += 1;
        }
    }

    /// Adds `from -> edge.to` unless an edge at least as cheap exists already.
    fn insert_edge(&mut self, from: VertexId, edge: Edge) -> bool {
        let forward = &mut self.forward_edges[from as usize];
        match forward.iter_mut().find(|existing| existing.to == edge.to) {
            Some(existing) if existing.weight <= edge.weight => return false,
            Some(existing) => *existing = edge,
            None => forward.push(edge),
        }

        let reversed = Edge { to: from, ..edge };
        let backward = &mut self.backward_edges[edge.to as usize];
        match backward.iter_mut().find(|existing| existing.to == from) {
            Some(existing) => *existing = reversed,
            None => backward.push(reversed),
        }

        true
    }

    fn build_upward<E: EdgeData, G: GraphRead<E>>(
        &self,
        graph: &G,
        ranks: &[u32],
    ) -> Result<MemoryDirectedGraph<CHEdgeData>> {
        let mut upward_graph = MemoryDirectedGraph::new(GraphConfig::default());
        let edge_estimate: usize = self.forward_edges.iter().map(Vec::len).sum();
        upward_graph.resize(graph.vertex_count(), edge_estimate as u32)?;

        for vertex in 1..=graph.vertex_count() {
            let coordinate = graph.get_vertex(vertex).unwrap_or_default();
            upward_graph.add_vertex(coordinate.lat, coordinate.lon)?;
        }

        let mut edge_count = 0;
        let mut upward = vec![];

        for vertex in 1..=graph.vertex_count() {
            let rank = ranks[vertex as usize];
            upward.clear();

            for edge in &self.forward_edges[vertex as usize] {
                if ranks[edge.to as usize] > rank {
                    let data = CHEdgeData::shortcut(edge.weight, true, false, edge.contracted_id)
                        .with_tags(edge.tags);
                    merge_upward(&mut upward, edge.to, data);
                }
            }

            for edge in &self.backward_edges[vertex as usize] {
                if ranks[edge.to as usize] > rank {
                    let data = CHEdgeData::shortcut(edge.weight, false, true, edge.contracted_id)
                        .with_tags(edge.tags);
                    merge_upward(&mut upward, edge.to, data);
                }
            }

            for &(neighbour, data) in &upward {
                upward_graph.add_edge(vertex, neighbour, data)?;
                edge_count += 1;
            }
        }

        tracing::debug!(
            vertices = graph.vertex_count(),
            edges = edge_count,
            shortcuts = self.shortcuts,
            "built contracted graph"
        );

        Ok(upward_graph)
    }
}

/// Both directions of a symmetric pair share one edge, asymmetric pairs are
/// stored as two edges.
fn merge_upward(upward: &mut Vec<(VertexId, CHEdgeData)>, neighbour: VertexId, data: CHEdgeData) {
    let same = upward.iter_mut().find(|(to, existing)| {
        *to == neighbour
            && existing.weight == data.weight
            && existing.contracted_id == data.contracted_id
    });

    match same {
        Some((_, existing)) => existing.add_flags(data.flags()),
        None => upward.push((neighbour, data)),
    }
}
