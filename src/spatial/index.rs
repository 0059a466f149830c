use rstar::{primitives::GeomWithData, RTree, RTreeObject, AABB};

use crate::{
    error::Result,
    graph::{EdgeData, GraphRead},
    BoundingBox, Coordinate, VertexId,
};

fn point(coordinate: &Coordinate) -> [f64; 2] {
    [coordinate.lon as f64, coordinate.lat as f64]
}

fn envelope(bbox: &BoundingBox) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [bbox.min_lon as f64, bbox.min_lat as f64],
        [bbox.max_lon as f64, bbox.max_lat as f64],
    )
}

/// An edge with its full polyline, endpoints included.
#[derive(Clone, Debug)]
pub struct IndexedEdge<E> {
    pub from: VertexId,
    pub to: VertexId,
    pub data: E,
    pub geometry: Vec<Coordinate>,
    envelope: AABB<[f64; 2]>,
}

impl<E> RTreeObject for IndexedEdge<E> {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// R-tree over every edge of a graph, keyed by the envelope of its geometry.
pub struct EdgeIndex<E> {
    tree: RTree<IndexedEdge<E>>,
}

impl<E: EdgeData> EdgeIndex<E> {
    pub fn build<G: GraphRead<E>>(graph: &G) -> Result<Self> {
        let mut edges = vec![];

        for vertex in 1..=graph.vertex_count() {
            let Some(from) = graph.get_vertex(vertex) else {
                continue;
            };

            for edge in graph.get_edges(vertex)? {
                // Undirected stores yield every edge from both ends.
                if !graph.is_directed() && edge.neighbour < vertex {
                    continue;
                }
                let Some(to) = graph.get_vertex(edge.neighbour) else {
                    continue;
                };

                let mut geometry = vec![from];
                if let Some(shape) = edge.shape {
                    geometry.extend(shape.iter());
                }
                geometry.push(to);

                let points: Vec<_> = geometry.iter().map(point).collect();
                edges.push(IndexedEdge {
                    from: vertex,
                    to: edge.neighbour,
                    data: edge.data,
                    envelope: AABB::from_points(points.iter()),
                    geometry,
                });
            }
        }

        tracing::debug!(edges = edges.len(), "built edge index");

        Ok(Self {
            tree: RTree::bulk_load(edges),
        })
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn query(&self, bbox: &BoundingBox) -> impl Iterator<Item = &IndexedEdge<E>> {
        self.tree.locate_in_envelope_intersecting(&envelope(bbox))
    }
}

/// R-tree over vertex coordinates for radius queries.
pub struct VertexIndex {
    tree: RTree<GeomWithData<[f64; 2], VertexId>>,
}

impl VertexIndex {
    pub fn build<E: EdgeData, G: GraphRead<E>>(graph: &G) -> Self {
        let points = (1..=graph.vertex_count())
            .filter_map(|vertex| {
                graph
                    .get_vertex(vertex)
                    .map(|coordinate| GeomWithData::new(point(&coordinate), vertex))
            })
            .collect();

        Self {
            tree: RTree::bulk_load(points),
        }
    }

    /// Vertices within `radius` degrees of `center`, nearest first.
    pub fn within(&self, center: Coordinate, radius: f64) -> Vec<VertexId> {
        let center = point(&center);
        let mut found: Vec<_> = self
            .tree
            .locate_within_distance(center, radius * radius)
            .map(|entry| {
                let [x, y] = *entry.geom();
                let distance = (x - center[0]).powi(2) + (y - center[1]).powi(2);
                (distance, entry.data)
            })
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        found.into_iter().map(|(_, vertex)| vertex).collect()
    }

    pub fn nearest(&self, center: Coordinate) -> Option<VertexId> {
        self.tree
            .nearest_neighbor(&point(&center))
            .map(|entry| entry.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Graph, LiveEdge, MemoryDirectedGraph, MemoryGraph};

    fn grid() -> MemoryGraph<LiveEdge> {
        let mut graph = MemoryGraph::default();
        for i in 0..3 {
            for j in 0..3 {
                graph.add_vertex(i as f32, j as f32).unwrap();
            }
        }
        // Rows: 1-2-3, 4-5-6, 7-8-9.
        for row in 0..3 {
            let first = row * 3 + 1;
            graph.add_edge(first, first + 1, LiveEdge::new(row, 1.0, true)).unwrap();
            graph.add_edge(first + 1, first + 2, LiveEdge::new(row, 1.0, true)).unwrap();
        }
        graph
    }

    #[test]
    fn test_undirected_edges_indexed_once() {
        let graph = grid();
        let index = EdgeIndex::build(&graph).unwrap();
        assert_eq!(index.len(), 6);

        let bbox = BoundingBox::new(Coordinate::new(0.9, -0.1), Coordinate::new(1.1, 0.4));
        let found: Vec<_> = index.query(&bbox).map(|edge| (edge.from, edge.to)).collect();
        assert_eq!(found, vec![(4, 5)]);
    }

    #[test]
    fn test_shape_extends_envelope() {
        let mut graph = MemoryDirectedGraph::<LiveEdge>::default();
        graph.add_vertex(0.0, 0.0).unwrap();
        graph.add_vertex(0.0, 1.0).unwrap();
        graph
            .add_edge_with_shape(1, 2, LiveEdge::default(), Some(vec![Coordinate::new(5.0, 0.5)]))
            .unwrap();

        let index = EdgeIndex::build(&graph).unwrap();
        let bbox = BoundingBox::around(Coordinate::new(4.0, 0.5), 0.2);
        let found: Vec<_> = index.query(&bbox).collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].geometry.len(), 3);
    }

    #[test]
    fn test_vertices_within_radius() {
        let graph = grid();
        let index = VertexIndex::build(&graph);

        assert_eq!(index.within(Coordinate::new(1.0, 1.0), 0.5), vec![5]);
        let mut near = index.within(Coordinate::new(1.0, 1.0), 1.0);
        assert_eq!(near.remove(0), 5);
        near.sort_unstable();
        assert_eq!(near, vec![2, 4, 6, 8]);
        assert_eq!(index.nearest(Coordinate::new(2.2, 1.9)), Some(9));
    }
}
