use std::sync::OnceLock;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::Result,
    graph::{check_vertex, EdgeData, Graph, GraphRead},
    spatial::{EdgeIndex, IndexedEdge, VertexIndex},
    BoundingBox, Coordinate, GraphError, VertexId, NO_VERTEX,
};

/// Graphs that can answer bounding-box edge queries.
pub trait EdgeQuery<E: EdgeData>: GraphRead<E> {
    fn edges_in_box(&self, bbox: &BoundingBox) -> Result<Vec<&IndexedEdge<E>>>;
}

#[derive(Debug, Default)]
struct RestrictionTable {
    routes: Vec<Vec<VertexId>>,
    by_start: FxHashMap<VertexId, Vec<usize>>,
    by_end: FxHashMap<VertexId, Vec<usize>>,
}

impl RestrictionTable {
    fn add(&mut self, route: Vec<VertexId>) {
        let idx = self.routes.len();
        if let (Some(&first), Some(&last)) = (route.first(), route.last()) {
            self.by_start.entry(first).or_default().push(idx);
            self.by_end.entry(last).or_default().push(idx);
        }
        self.routes.push(route);
    }

    /// Relabels `vertex1` as `vertex2` and back in every route.
    fn switch(&mut self, vertex1: VertexId, vertex2: VertexId) {
        let routes = std::mem::take(&mut self.routes);
        self.by_start.clear();
        self.by_end.clear();

        for mut route in routes {
            for vertex in &mut route {
                if *vertex == vertex1 {
                    *vertex = vertex2;
                } else if *vertex == vertex2 {
                    *vertex = vertex1;
                }
            }
            self.add(route);
        }
    }

    fn gather<'a>(
        &'a self,
        index: &FxHashMap<VertexId, Vec<usize>>,
        vertex: VertexId,
        found: &mut Vec<&'a [VertexId]>,
    ) {
        if let Some(routes) = index.get(&vertex) {
            found.extend(routes.iter().map(|&idx| self.routes[idx].as_slice()));
        }
    }
}

/// A graph together with what routing needs around it: lazily built spatial
/// indexes, the supported vehicle profiles and the turn restrictions.
///
/// Any mutation through [`Graph`] drops the indexes, they are rebuilt on the
/// next query.
pub struct RoutingDataSource<G, E> {
    graph: G,
    edge_index: OnceLock<EdgeIndex<E>>,
    vertex_index: OnceLock<VertexIndex>,
    profiles: FxHashSet<String>,
    restrictions: RestrictionTable,
    vehicle_restrictions: FxHashMap<String, RestrictionTable>,
}

impl<G: GraphRead<E>, E: EdgeData> RoutingDataSource<G, E> {
    pub fn new(graph: G) -> Self {
        Self {
            graph,
            edge_index: OnceLock::new(),
            vertex_index: OnceLock::new(),
            profiles: FxHashSet::default(),
            restrictions: RestrictionTable::default(),
            vehicle_restrictions: FxHashMap::default(),
        }
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn into_inner(self) -> G {
        self.graph
    }

    fn edge_index(&self) -> Result<&EdgeIndex<E>> {
        if let Some(index) = self.edge_index.get() {
            return Ok(index);
        }
        let index = EdgeIndex::build(&self.graph)?;
        Ok(self.edge_index.get_or_init(|| index))
    }

    fn vertex_index(&self) -> &VertexIndex {
        self.vertex_index
            .get_or_init(|| VertexIndex::build(&self.graph))
    }

    fn invalidate(&mut self) {
        let edges = self.edge_index.take().is_some();
        let vertices = self.vertex_index.take().is_some();
        if edges || vertices {
            tracing::trace!("dropped spatial indexes");
        }
    }

    /// Vertices within `radius` degrees of `center`, nearest first.
    pub fn vertices_within(&self, center: Coordinate, radius: f64) -> Vec<VertexId> {
        self.vertex_index().within(center, radius)
    }

    pub fn nearest_vertex(&self, center: Coordinate) -> Option<VertexId> {
        self.vertex_index().nearest(center)
    }

    pub fn add_supported_profile(&mut self, profile: impl Into<String>) {
        self.profiles.insert(profile.into());
    }

    pub fn supports_profile(&self, profile: &str) -> bool {
        self.profiles.contains(profile)
    }

    pub fn supported_profiles(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(String::as_str)
    }

    /// Forbids following `route` for every vehicle.
    pub fn add_restriction(&mut self, route: Vec<VertexId>) -> Result<()> {
        self.check_route(&route)?;
        self.restrictions.add(route);
        Ok(())
    }

    pub fn add_vehicle_restriction(&mut self, vehicle: &str, route: Vec<VertexId>) -> Result<()> {
        self.check_route(&route)?;
        self.vehicle_restrictions
            .entry(vehicle.to_owned())
            .or_default()
            .add(route);
        Ok(())
    }

    /// Restrictions starting at `vertex`, global ones first, then the ones
    /// registered for `vehicle`.
    pub fn try_get_restriction_as_start(
        &self,
        vehicle: Option<&str>,
        vertex: VertexId,
    ) -> Option<Vec<&[VertexId]>> {
        self.lookup_restrictions(vehicle, vertex, |table| &table.by_start)
    }

    /// Restrictions ending at `vertex`.
    pub fn try_get_restriction_as_end(
        &self,
        vehicle: Option<&str>,
        vertex: VertexId,
    ) -> Option<Vec<&[VertexId]>> {
        self.lookup_restrictions(vehicle, vertex, |table| &table.by_end)
    }

    fn lookup_restrictions<'a>(
        &'a self,
        vehicle: Option<&str>,
        vertex: VertexId,
        index: impl Fn(&'a RestrictionTable) -> &'a FxHashMap<VertexId, Vec<usize>>,
    ) -> Option<Vec<&'a [VertexId]>> {
        let mut found = vec![];
        self.restrictions
            .gather(index(&self.restrictions), vertex, &mut found);
        if let Some(table) = vehicle.and_then(|vehicle| self.vehicle_restrictions.get(vehicle)) {
            table.gather(index(table), vertex, &mut found);
        }

        (!found.is_empty()).then_some(found)
    }

    fn check_route(&self, route: &[VertexId]) -> Result<()> {
        if route.is_empty() {
            return Err(GraphError::InvalidArgument(
                "restriction route is empty".to_owned(),
            ));
        }
        if route.contains(&NO_VERTEX) {
            return Err(GraphError::InvalidArgument(
                "restriction route contains vertex 0".to_owned(),
            ));
        }
        route
            .iter()
            .try_for_each(|&vertex| check_vertex(vertex, self.graph.vertex_count()))
    }
}

impl<G: GraphRead<E>, E: EdgeData> EdgeQuery<E> for RoutingDataSource<G, E> {
    fn edges_in_box(&self, bbox: &BoundingBox) -> Result<Vec<&IndexedEdge<E>>> {
        Ok(self.edge_index()?.query(bbox).collect())
    }
}

impl<G: GraphRead<E>, E: EdgeData> GraphRead<E> for RoutingDataSource<G, E> {
    type Edges<'a> = G::Edges<'a> where Self: 'a;

    fn vertex_count(&self) -> u32 {
        self.graph.vertex_count()
    }

    fn get_vertex(&self, vertex: VertexId) -> Option<Coordinate> {
        self.graph.get_vertex(vertex)
    }

    fn get_edges(&self, vertex: VertexId) -> Result<Self::Edges<'_>> {
        self.graph.get_edges(vertex)
    }

    fn is_directed(&self) -> bool {
        self.graph.is_directed()
    }

    fn can_have_duplicates(&self) -> bool {
        self.graph.can_have_duplicates()
    }
}

impl<G: Graph<E>, E: EdgeData> Graph<E> for RoutingDataSource<G, E> {
    fn add_vertex(&mut self, lat: f32, lon: f32) -> Result<VertexId> {
        self.invalidate();
        self.graph.add_vertex(lat, lon)
    }

    fn set_vertex(&mut self, vertex: VertexId, lat: f32, lon: f32) -> Result<()> {
        self.invalidate();
        self.graph.set_vertex(vertex, lat, lon)
    }

    fn add_edge_with_shape(
        &mut self,
        from: VertexId,
        to: VertexId,
        data: E,
        shape: Option<Vec<Coordinate>>,
    ) -> Result<()> {
        self.invalidate();
        self.graph.add_edge_with_shape(from, to, data, shape)
    }

    fn remove_edge(&mut self, from: VertexId, to: VertexId) -> Result<usize> {
        self.invalidate();
        self.graph.remove_edge(from, to)
    }

    fn remove_edges(&mut self, vertex: VertexId) -> Result<usize> {
        self.invalidate();
        self.graph.remove_edges(vertex)
    }

    fn compress(&mut self) -> Result<()> {
        self.invalidate();
        self.graph.compress()
    }

    fn trim(&mut self) -> Result<()> {
        self.graph.trim()
    }

    fn resize(&mut self, vertex_estimate: u32, edge_estimate: u32) -> Result<()> {
        self.graph.resize(vertex_estimate, edge_estimate)
    }

    /// Restrictions follow their vertices to the new ids.
    fn switch(&mut self, vertex1: VertexId, vertex2: VertexId) -> Result<()> {
        self.invalidate();
        self.graph.switch(vertex1, vertex2)?;

        self.restrictions.switch(vertex1, vertex2);
        for table in self.vehicle_restrictions.values_mut() {
            table.switch(vertex1, vertex2);
        }
        Ok(())
    }
}
