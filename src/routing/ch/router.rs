use std::{
    collections::BinaryHeap,
    sync::{Arc, OnceLock},
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use super::CHEdgeData;
use crate::{
    config::RouterConfig,
    error::Result,
    graph::{check_vertex, GraphRead},
    routing::{EdgeQuery, PathSegment, RoutingPoint},
    BoundingBox, Coordinate, GraphError, VertexId, NO_VERTEX,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn flag(self) -> u8 {
        match self {
            Direction::Forward => CHEdgeData::FORWARD,
            Direction::Backward => CHEdgeData::BACKWARD,
        }
    }

    /// Flag a downward entry needs: an edge stored at `owner` towards `v`
    /// carries the direction as seen from `owner`.
    fn downward_flag(self) -> u8 {
        match self {
            Direction::Forward => CHEdgeData::BACKWARD,
            Direction::Backward => CHEdgeData::FORWARD,
        }
    }
}

/// Edges of the contracted graph listed at their higher-ranked endpoint:
/// `downward[v]` holds `(owner, data)` for every edge stored at `owner`
/// towards `v`.
type Downward = Vec<Vec<(VertexId, CHEdgeData)>>;

struct SearchState {
    segment: Arc<PathSegment>,
}

impl Eq for SearchState {}
impl PartialEq for SearchState {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Ord for SearchState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Inverted for min-heap
        other
            .segment
            .weight
            .total_cmp(&self.segment.weight)
            .then_with(|| other.segment.vertex.cmp(&self.segment.vertex))
    }
}

impl PartialOrd for SearchState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// One direction of a search: the queue, the best weight queued per vertex
/// and the settled paths.
#[derive(Default)]
struct SearchSpace {
    queue: BinaryHeap<SearchState>,
    weights: FxHashMap<VertexId, f32>,
    settled: FxHashMap<VertexId, Arc<PathSegment>>,
}

impl SearchSpace {
    fn clear(&mut self) {
        self.queue.clear();
        self.weights.clear();
        self.settled.clear();
    }

    fn min_weight(&self) -> f32 {
        self.queue
            .peek()
            .map_or(f32::INFINITY, |state| state.segment.weight)
    }

    fn settle(&mut self, segment: &Arc<PathSegment>) -> bool {
        if self
            .settled
            .get(&segment.vertex)
            .is_some_and(|settled| settled.weight <= segment.weight)
        {
            return false;
        }
        self.settled.insert(segment.vertex, Arc::clone(segment));
        true
    }

    /// Settles the seed paths of `point` and their predecessors, then relaxes
    /// the seeds.
    fn seed<G: GraphRead<CHEdgeData>>(
        &mut self,
        graph: &G,
        point: &RoutingPoint,
        direction: Direction,
        exception: Option<VertexId>,
        max_weight: f32,
    ) -> Result<()> {
        for head in point.heads() {
            let mut previous = head.from.clone();
            while let Some(segment) = previous {
                if segment.vertex != NO_VERTEX {
                    self.settle(&segment);
                }
                previous = segment.from.clone();
            }
        }

        for head in point.heads() {
            if self.settle(head) {
                self.relax(graph, head, direction, exception, max_weight)?;
            }
        }

        Ok(())
    }

    /// Settles the next vertex and relaxes its edges.
    fn step<G: GraphRead<CHEdgeData>>(
        &mut self,
        graph: &G,
        direction: Direction,
        exception: Option<VertexId>,
        max_weight: f32,
    ) -> Result<Option<Arc<PathSegment>>> {
        while let Some(SearchState { segment }) = self.queue.pop() {
            if self
                .weights
                .get(&segment.vertex)
                .is_some_and(|&best| segment.weight > best)
            {
                continue;
            }
            if !self.settle(&segment) {
                continue;
            }

            self.relax(graph, &segment, direction, exception, max_weight)?;
            return Ok(Some(segment));
        }

        Ok(None)
    }

    fn relax<G: GraphRead<CHEdgeData>>(
        &mut self,
        graph: &G,
        segment: &Arc<PathSegment>,
        direction: Direction,
        exception: Option<VertexId>,
        max_weight: f32,
    ) -> Result<()> {
        for edge in graph.get_edges(segment.vertex)? {
            if edge.data.flags() & direction.flag() == 0 {
                continue;
            }
            if let Some(exception) = exception {
                if edge.neighbour == exception || edge.data.contracted_id == exception {
                    continue;
                }
            }

            let weight = segment.weight + edge.data.weight;
            if weight > max_weight {
                continue;
            }
            if self
                .settled
                .get(&edge.neighbour)
                .is_some_and(|settled| settled.weight <= weight)
            {
                continue;
            }

            let best = self.weights.entry(edge.neighbour).or_insert(f32::INFINITY);
            if weight < *best {
                *best = weight;
                self.queue.push(SearchState {
                    segment: PathSegment::extend(segment, edge.neighbour, weight),
                });
            }
        }

        Ok(())
    }
}

/// A path between two routing points with its total weight.
#[derive(Clone, Debug)]
pub struct Route {
    pub path: Arc<PathSegment>,
    pub weight: f32,
}

impl Route {
    pub fn vertices(&self) -> Vec<VertexId> {
        self.path.vertices()
    }
}

/// Result of a nearest edge search, always on a network edge.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClosestEdge {
    pub from: VertexId,
    pub to: VertexId,
    /// Fraction of the edge length from `from` to the projected point.
    pub position: f32,
    /// Meters between the query and the projected point.
    pub distance: f64,
    pub coordinate: Coordinate,
    /// Weight of the whole edge.
    pub weight: f32,
}

struct FoundEdge {
    data: CHEdgeData,
    /// Shape in travel order.
    shape: Option<Vec<Coordinate>>,
}

/// Bidirectional Dijkstra over a contracted graph.
///
/// The router owns its search state and reuses it between queries, so a
/// single router serves one query at a time. Many-to-many queries use
/// private search state per point and only need `&self`.
pub struct CHRouter<'g, G> {
    graph: &'g G,
    config: RouterConfig,
    forward: SearchSpace,
    backward: SearchSpace,
    downward: OnceLock<Downward>,
}

impl<'g, G: GraphRead<CHEdgeData>> CHRouter<'g, G> {
    pub fn new(graph: &'g G) -> Self {
        Self::with_config(graph, RouterConfig::default())
    }

    pub fn with_config(graph: &'g G, config: RouterConfig) -> Self {
        Self {
            graph,
            config,
            forward: SearchSpace::default(),
            backward: SearchSpace::default(),
            downward: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Shortest path between two points, `None` when unreachable within the
    /// configured limits. The path is not expanded.
    pub fn calculate(
        &mut self,
        source: &RoutingPoint,
        target: &RoutingPoint,
    ) -> Result<Option<Route>> {
        let RouterConfig {
            max_weight,
            max_settles,
            ..
        } = self.config;
        self.calculate_with(source, target, max_weight, max_settles, None)
    }

    /// Like [`calculate`](Self::calculate) with explicit limits. Edges to
    /// `exception` and shortcuts bypassing it are never relaxed.
    pub fn calculate_with(
        &mut self,
        source: &RoutingPoint,
        target: &RoutingPoint,
        max_weight: f32,
        max_settles: usize,
        exception: Option<VertexId>,
    ) -> Result<Option<Route>> {
        match self.search(source, target, max_weight, max_settles, exception)? {
            Some((vertex, weight)) => self.splice(vertex, weight).map(Some),
            None => Ok(None),
        }
    }

    pub fn calculate_weight(
        &mut self,
        source: &RoutingPoint,
        target: &RoutingPoint,
    ) -> Result<Option<f32>> {
        let RouterConfig {
            max_weight,
            max_settles,
            ..
        } = self.config;
        self.calculate_weight_with(source, target, max_weight, max_settles, None)
    }

    pub fn calculate_weight_with(
        &mut self,
        source: &RoutingPoint,
        target: &RoutingPoint,
        max_weight: f32,
        max_settles: usize,
        exception: Option<VertexId>,
    ) -> Result<Option<f32>> {
        Ok(self
            .search(source, target, max_weight, max_settles, exception)?
            .map(|(_, weight)| weight))
    }

    /// Shortest path between two vertices with every shortcut expanded.
    pub fn route(&mut self, from: VertexId, to: VertexId) -> Result<Option<Route>> {
        let Some(route) = self.calculate(&RoutingPoint::vertex(from), &RoutingPoint::vertex(to))?
        else {
            return Ok(None);
        };

        Ok(Some(Route {
            path: self.expand_path(&route.path)?,
            weight: route.weight,
        }))
    }

    pub fn weight(&mut self, from: VertexId, to: VertexId) -> Result<Option<f32>> {
        self.calculate_weight(&RoutingPoint::vertex(from), &RoutingPoint::vertex(to))
    }

    fn check_point(&self, point: &RoutingPoint) -> Result<()> {
        if point.heads().is_empty() {
            return Err(GraphError::InvalidArgument(
                "routing point has no seed paths".to_owned(),
            ));
        }
        point
            .heads()
            .iter()
            .try_for_each(|head| check_vertex(head.vertex, self.graph.vertex_count()))
    }

    fn search(
        &mut self,
        source: &RoutingPoint,
        target: &RoutingPoint,
        max_weight: f32,
        max_settles: usize,
        exception: Option<VertexId>,
    ) -> Result<Option<(VertexId, f32)>> {
        self.check_point(source)?;
        self.check_point(target)?;

        self.forward.clear();
        self.backward.clear();

        self.forward
            .seed(self.graph, source, Direction::Forward, exception, max_weight)?;
        self.backward
            .seed(self.graph, target, Direction::Backward, exception, max_weight)?;

        let mut best: Option<(VertexId, f32)> = None;
        for (&vertex, forward) in &self.forward.settled {
            if let Some(backward) = self.backward.settled.get(&vertex) {
                improve(&mut best, vertex, forward.weight + backward.weight);
            }
        }

        let mut settles = 0;

        loop {
            let best_weight = best.map_or(f32::INFINITY, |(_, weight)| weight);
            if best_weight <= 0.0 {
                break;
            }

            let forward_min = self.forward.min_weight();
            let backward_min = self.backward.min_weight();
            let step_forward = forward_min <= max_weight && forward_min < best_weight;
            let step_backward = backward_min <= max_weight && backward_min < best_weight;

            if !step_forward && !step_backward {
                break;
            }
            if settles > max_settles {
                tracing::trace!(settles, "search stopped at settle limit");
                break;
            }

            if step_forward {
                if let Some(segment) =
                    self.forward
                        .step(self.graph, Direction::Forward, exception, max_weight)?
                {
                    settles += 1;
                    if let Some(backward) = self.backward.settled.get(&segment.vertex) {
                        improve(&mut best, segment.vertex, segment.weight + backward.weight);
                    }
                }
            }

            if step_backward {
                if let Some(segment) =
                    self.backward
                        .step(self.graph, Direction::Backward, exception, max_weight)?
                {
                    settles += 1;
                    if let Some(forward) = self.forward.settled.get(&segment.vertex) {
                        improve(&mut best, segment.vertex, forward.weight + segment.weight);
                    }
                }
            }
        }

        tracing::trace!(settles, ?best, "search finished");

        Ok(best)
    }

    /// Joins the forward path to `vertex` with the backward path from it.
    fn splice(&self, vertex: VertexId, weight: f32) -> Result<Route> {
        let (Some(forward), Some(backward)) = (
            self.forward.settled.get(&vertex),
            self.backward.settled.get(&vertex),
        ) else {
            return Err(GraphError::InvalidState(format!(
                "meeting vertex {vertex} is not settled in both directions"
            )));
        };

        let mut path = Arc::clone(forward);
        let offset = forward.weight + backward.weight;
        let mut next = backward.from.clone();
        while let Some(segment) = next {
            path = PathSegment::extend(&path, segment.vertex, offset - segment.weight);
            next = segment.from.clone();
        }

        Ok(Route { path, weight })
    }

    /// Replaces every shortcut on `path` by the edges it stands for.
    pub fn expand_path(&self, path: &PathSegment) -> Result<Arc<PathSegment>> {
        let entries = path.entries();
        let mut expanded: Vec<(VertexId, f32)> = entries.first().copied().into_iter().collect();
        let mut weight = entries.first().map_or(0.0, |&(_, weight)| weight);

        for pair in entries.windows(2) {
            self.unpack(pair[0].0, pair[1].0, |_, next, edge| {
                weight += edge.data.weight;
                expanded.push((next, weight));
            })?;
        }

        PathSegment::from_entries(&expanded)
            .ok_or_else(|| GraphError::InvalidState("cannot expand an empty path".to_owned()))
    }

    /// Calls `visit` with every network edge behind `from -> to`, in order.
    fn unpack(
        &self,
        from: VertexId,
        to: VertexId,
        mut visit: impl FnMut(VertexId, VertexId, FoundEdge),
    ) -> Result<()> {
        let mut stack = vec![(from, to)];

        while let Some((from, to)) = stack.pop() {
            let Some(edge) = self.find_edge(from, to)? else {
                tracing::trace!(from, to, "no edge to expand");
                return Err(GraphError::InvalidState(format!(
                    "no edge {from} -> {to} in the contracted graph"
                )));
            };

            let contracted = edge.data.contracted_id;
            if contracted == NO_VERTEX {
                visit(from, to, edge);
            } else if contracted == from || contracted == to {
                return Err(GraphError::InvalidState(format!(
                    "shortcut {from} -> {to} bypasses its own endpoint"
                )));
            } else {
                stack.push((contracted, to));
                stack.push((from, contracted));
            }
        }

        Ok(())
    }

    /// The cheapest edge usable from `from` to `to`: stored at `from` as a
    /// forward edge, or at `to` as a backward edge.
    fn find_edge(&self, from: VertexId, to: VertexId) -> Result<Option<FoundEdge>> {
        let cheapest = |owner: VertexId, neighbour: VertexId, flag: u8| -> Result<_> {
            Ok(self
                .graph
                .get_edges(owner)?
                .filter(|edge| edge.neighbour == neighbour && edge.data.flags() & flag != 0)
                .min_by(|a, b| a.data.weight.total_cmp(&b.data.weight)))
        };

        if let Some(edge) = cheapest(from, to, CHEdgeData::FORWARD)? {
            return Ok(Some(FoundEdge {
                data: edge.data,
                shape: edge.shape.map(|shape| shape.to_vec()),
            }));
        }

        Ok(cheapest(to, from, CHEdgeData::BACKWARD)?.map(|edge| FoundEdge {
            data: edge.data,
            shape: edge.shape.map(|shape| {
                let mut shape = shape.to_vec();
                shape.reverse();
                shape
            }),
        }))
    }

    /// Whether searches from `point` run past `max_weight` (or the settle
    /// limit) in both directions, meaning the point is not on an isolated
    /// island.
    ///
    /// Upward edges alone never leave the top of the hierarchy, so these
    /// searches follow the stored edges both ways and see the whole network.
    pub fn check_connectivity(&self, point: &RoutingPoint, max_weight: f32) -> Result<bool> {
        self.check_point(point)?;

        Ok(self.escapes(point, Direction::Forward, max_weight)?
            && self.escapes(point, Direction::Backward, max_weight)?)
    }

    fn escapes(&self, point: &RoutingPoint, direction: Direction, max_weight: f32) -> Result<bool> {
        let downward = self.downward()?;
        let mut queue: BinaryHeap<SearchState> = point
            .heads()
            .iter()
            .map(|head| SearchState {
                segment: Arc::clone(head),
            })
            .collect();
        let mut settled: FxHashMap<VertexId, f32> = FxHashMap::default();

        while let Some(SearchState { segment }) = queue.pop() {
            if settled.contains_key(&segment.vertex) {
                continue;
            }
            if segment.weight > max_weight || settled.len() > self.config.max_settles {
                return Ok(true);
            }
            settled.insert(segment.vertex, segment.weight);

            let upward = self
                .graph
                .get_edges(segment.vertex)?
                .filter(|edge| edge.data.flags() & direction.flag() != 0)
                .map(|edge| (edge.neighbour, edge.data.weight));
            let down = downward
                .get(segment.vertex as usize)
                .into_iter()
                .flatten()
                .filter(|(_, data)| data.flags() & direction.downward_flag() != 0)
                .map(|&(owner, data)| (owner, data.weight));

            for (neighbour, weight) in upward.chain(down) {
                if !settled.contains_key(&neighbour) {
                    queue.push(SearchState {
                        segment: PathSegment::extend(&segment, neighbour, segment.weight + weight),
                    });
                }
            }
        }

        Ok(false)
    }

    fn downward(&self) -> Result<&Downward> {
        if let Some(downward) = self.downward.get() {
            return Ok(downward);
        }

        let count = self.graph.vertex_count();
        let mut downward: Downward = vec![Vec::new(); count as usize + 1];
        for owner in 1..=count {
            for edge in self.graph.get_edges(owner)? {
                if let Some(entries) = downward.get_mut(edge.neighbour as usize) {
                    entries.push((owner, edge.data));
                }
            }
        }
        tracing::debug!(vertices = count, "indexed downward edges");

        Ok(self.downward.get_or_init(|| downward))
    }
}

impl<'g, G: GraphRead<CHEdgeData> + Sync> CHRouter<'g, G> {
    /// Weights between every source and every target, `None` for pairs that
    /// are unreachable within the configured limits.
    ///
    /// Each target gets one backward search whose settled vertices fill
    /// buckets, then each source gets one forward search collecting from the
    /// buckets it passes. Sources and targets are searched in parallel when
    /// the `parallel` feature is on.
    pub fn calculate_many_to_many_weight(
        &self,
        sources: &[RoutingPoint],
        targets: &[RoutingPoint],
    ) -> Result<Vec<Vec<Option<f32>>>> {
        for point in sources.iter().chain(targets) {
            self.check_point(point)?;
        }

        let reached = map_points(targets, |target| self.fill_bucket(target))?;

        let mut buckets: FxHashMap<VertexId, Vec<(usize, f32)>> = FxHashMap::default();
        for (target, entries) in reached.into_iter().enumerate() {
            for (vertex, weight) in entries {
                buckets.entry(vertex).or_default().push((target, weight));
            }
        }

        tracing::debug!(
            sources = sources.len(),
            targets = targets.len(),
            buckets = buckets.len(),
            "filled many-to-many buckets"
        );

        map_points(sources, |source| {
            self.scan_buckets(source, &buckets, targets.len())
        })
    }

    fn fill_bucket(&self, target: &RoutingPoint) -> Result<Vec<(VertexId, f32)>> {
        let RouterConfig {
            max_weight,
            max_settles,
            ..
        } = self.config;

        let mut space = SearchSpace::default();
        space.seed(self.graph, target, Direction::Backward, None, max_weight)?;

        let mut settles = 0;
        while space.min_weight() <= max_weight && settles <= max_settles {
            if space
                .step(self.graph, Direction::Backward, None, max_weight)?
                .is_none()
            {
                break;
            }
            settles += 1;
        }

        Ok(space
            .settled
            .iter()
            .map(|(&vertex, segment)| (vertex, segment.weight))
            .collect())
    }

    fn scan_buckets(
        &self,
        source: &RoutingPoint,
        buckets: &FxHashMap<VertexId, Vec<(usize, f32)>>,
        target_count: usize,
    ) -> Result<Vec<Option<f32>>> {
        let RouterConfig {
            max_weight,
            max_settles,
            ..
        } = self.config;

        let mut results = vec![None; target_count];
        let combine = |results: &mut Vec<Option<f32>>, vertex: VertexId, weight: f32| {
            for &(target, bucket_weight) in buckets.get(&vertex).into_iter().flatten() {
                let total = weight + bucket_weight;
                if results[target].map_or(true, |current| total < current) {
                    results[target] = Some(total);
                }
            }
        };

        let mut space = SearchSpace::default();
        space.seed(self.graph, source, Direction::Forward, None, max_weight)?;
        for (&vertex, segment) in &space.settled {
            combine(&mut results, vertex, segment.weight);
        }

        let mut settles = 0;
        loop {
            let current = space.min_weight();
            if current > max_weight || settles > max_settles {
                break;
            }
            // Nothing left in the queue can improve a result below `current`.
            if results.iter().all(|result| result.is_some_and(|weight| weight < current)) {
                break;
            }

            let Some(segment) = space.step(self.graph, Direction::Forward, None, max_weight)?
            else {
                break;
            };
            settles += 1;
            combine(&mut results, segment.vertex, segment.weight);
        }

        Ok(results)
    }
}

impl<'g, G: EdgeQuery<CHEdgeData>> CHRouter<'g, G> {
    /// Nearest network edge to `coordinate` within the configured search box.
    pub fn search_closest(&self, coordinate: Coordinate) -> Result<Option<ClosestEdge>> {
        self.search_closest_within(coordinate, self.config.search_offset)
    }

    /// Nearest network edge to `coordinate` among the edges intersecting the
    /// box of half-width `offset` degrees around it. Shortcuts found in the
    /// box are expanded into the edges they stand for.
    pub fn search_closest_within(
        &self,
        coordinate: Coordinate,
        offset: f32,
    ) -> Result<Option<ClosestEdge>> {
        let bbox = BoundingBox::around(coordinate, offset);
        let mut best: Option<ClosestEdge> = None;

        for indexed in self.graph.edges_in_box(&bbox)? {
            let (from, to) = if indexed.data.is_forward() {
                (indexed.from, indexed.to)
            } else {
                (indexed.to, indexed.from)
            };

            let mut candidates = vec![];
            if indexed.data.is_shortcut() {
                self.unpack(from, to, |from, to, edge| candidates.push((from, to, edge)))?;
            } else {
                candidates.push((
                    from,
                    to,
                    FoundEdge {
                        data: indexed.data,
                        shape: None,
                    },
                ));
            }

            for (from, to, edge) in candidates {
                let geometry = if indexed.data.is_shortcut() {
                    self.geometry(from, to, edge.shape)
                } else if from == indexed.from {
                    indexed.geometry.clone()
                } else {
                    indexed.geometry.iter().rev().copied().collect()
                };

                let Some((distance, position, projected)) = project(coordinate, &geometry) else {
                    continue;
                };
                if best.is_some_and(|best| best.distance <= distance) {
                    continue;
                }

                best = Some(ClosestEdge {
                    from,
                    to,
                    position,
                    distance,
                    coordinate: projected,
                    weight: edge.data.weight,
                });

                if distance < self.config.closest_epsilon {
                    return Ok(best);
                }
            }
        }

        Ok(best)
    }

    fn geometry(&self, from: VertexId, to: VertexId, shape: Option<Vec<Coordinate>>) -> Vec<Coordinate> {
        let mut geometry: Vec<_> = self.graph.get_vertex(from).into_iter().collect();
        geometry.extend(shape.into_iter().flatten());
        geometry.extend(self.graph.get_vertex(to));
        geometry
    }
}

fn improve(best: &mut Option<(VertexId, f32)>, vertex: VertexId, weight: f32) {
    if best.map_or(true, |(_, current)| weight < current) {
        *best = Some((vertex, weight));
    }
}

/// Closest point of the polyline `geometry` to `target`: the distance in
/// meters, the position along the polyline as a fraction of its length and
/// the point itself.
fn project(target: Coordinate, geometry: &[Coordinate]) -> Option<(f64, f32, Coordinate)> {
    // Equirectangular projection around the target.
    let scale = (target.lat as f64).to_radians().cos();
    let planar = |c: &Coordinate| (c.lon as f64 * scale, c.lat as f64);
    let (px, py) = planar(&target);

    let mut best: Option<(f64, f64, Coordinate)> = None;
    let mut length = 0.0;

    for pair in geometry.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let (ax, ay) = planar(&a);
        let (bx, by) = planar(&b);
        let (dx, dy) = (bx - ax, by - ay);

        let squared = dx * dx + dy * dy;
        let t = if squared > 0.0 {
            (((px - ax) * dx + (py - ay) * dy) / squared).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let point = Coordinate::new(
            (a.lat as f64 + t * (b.lat as f64 - a.lat as f64)) as f32,
            (a.lon as f64 + t * (b.lon as f64 - a.lon as f64)) as f32,
        );
        let distance = target.distance_to(&point);
        let segment_length = a.distance_to(&b);

        if best.map_or(true, |(current, ..)| distance < current) {
            best = Some((distance, length + t * segment_length, point));
        }
        length += segment_length;
    }

    best.map(|(distance, along, point)| {
        let position = if length > 0.0 { along / length } else { 0.0 };
        (distance, position as f32, point)
    })
}

fn map_points<T, F>(points: &[RoutingPoint], f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&RoutingPoint) -> Result<T> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        points.par_iter().map(f).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        points.iter().map(f).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Graph, MemoryDirectedGraph, RoutingDataSource};

    // Vertex 2 sits between 1 and 3 and was contracted first.
    fn triangle() -> MemoryDirectedGraph<CHEdgeData> {
        let mut graph = MemoryDirectedGraph::default();
        graph.add_vertex(0.0, 0.0).unwrap();
        graph.add_vertex(0.0, 0.01).unwrap();
        graph.add_vertex(0.0, 0.02).unwrap();
        graph.add_vertex(1.0, 1.0).unwrap();

        graph.add_edge(2, 1, CHEdgeData::new(1.0, true, true)).unwrap();
        graph.add_edge(2, 3, CHEdgeData::new(1.0, true, true)).unwrap();
        graph
            .add_edge(1, 3, CHEdgeData::shortcut(2.0, true, true, 2))
            .unwrap();
        graph
    }

    #[test]
    fn test_calculate_and_expand() {
        let graph = triangle();
        let mut router = CHRouter::new(&graph);

        let route = router
            .calculate(&RoutingPoint::vertex(1), &RoutingPoint::vertex(3))
            .unwrap()
            .unwrap();
        assert_eq!(route.weight, 2.0);
        assert_eq!(route.vertices(), vec![1, 3]);

        let expanded = router.expand_path(&route.path).unwrap();
        assert_eq!(expanded.entries(), vec![(1, 0.0), (2, 1.0), (3, 2.0)]);

        let route = router.route(3, 1).unwrap().unwrap();
        assert_eq!(route.vertices(), vec![3, 2, 1]);
        assert_eq!(route.weight, 2.0);
    }

    #[test]
    fn test_identical_endpoints() {
        let graph = triangle();
        let mut router = CHRouter::new(&graph);
        let route = router
            .calculate(&RoutingPoint::vertex(2), &RoutingPoint::vertex(2))
            .unwrap()
            .unwrap();
        assert_eq!(route.weight, 0.0);
        assert_eq!(route.vertices(), vec![2]);
    }

    #[test]
    fn test_limits_and_exception() {
        let graph = triangle();
        let mut router = CHRouter::new(&graph);
        let (one, three) = (RoutingPoint::vertex(1), RoutingPoint::vertex(3));

        assert_eq!(
            router.calculate_weight_with(&one, &three, 1.5, usize::MAX, None).unwrap(),
            None
        );
        assert_eq!(
            router.calculate_weight_with(&one, &three, 10.0, usize::MAX, Some(2)).unwrap(),
            None
        );
        assert_eq!(router.weight(1, 4).unwrap(), None);
        assert_eq!(router.weight(1, 3).unwrap(), Some(2.0));
    }

    #[test]
    fn test_point_on_edge() {
        let graph = triangle();
        let mut router = CHRouter::new(&graph);
        let source = RoutingPoint::on_edge(1, 2, 0.5, 1.0);

        let weight = router
            .calculate_weight(&source, &RoutingPoint::vertex(3))
            .unwrap();
        assert_eq!(weight, Some(1.5));
    }

    #[test]
    fn test_settle_limit() {
        // A chain ranked by id, the query has to climb all of it.
        let mut graph = MemoryDirectedGraph::default();
        for i in 0..4 {
            graph.add_vertex(0.0, i as f32 * 0.01).unwrap();
        }
        for from in 1..4 {
            graph.add_edge(from, from + 1, CHEdgeData::new(1.0, true, true)).unwrap();
        }

        let mut router = CHRouter::new(&graph);
        let (one, four) = (RoutingPoint::vertex(1), RoutingPoint::vertex(4));
        assert_eq!(
            router.calculate_weight_with(&one, &four, f32::MAX, 1, None).unwrap(),
            None
        );
        assert_eq!(
            router.calculate_weight_with(&one, &four, f32::MAX, usize::MAX, None).unwrap(),
            Some(3.0)
        );

        let mut limited = CHRouter::with_config(
            &graph,
            RouterConfig {
                max_settles: 1,
                ..RouterConfig::default()
            },
        );
        assert_eq!(limited.weight(1, 4).unwrap(), None);
        assert!(limited.route(1, 4).unwrap().is_none());
    }

    #[test]
    fn test_bad_input() {
        let graph = triangle();
        let mut router = CHRouter::new(&graph);

        assert!(matches!(
            router.weight(1, 9),
            Err(GraphError::OutOfRange { vertex: 9, .. })
        ));
        assert!(matches!(
            router.calculate(&RoutingPoint::from_segments(vec![]), &RoutingPoint::vertex(1)),
            Err(GraphError::InvalidArgument(_))
        ));

        let broken = PathSegment::from_entries(&[(1, 0.0), (4, 1.0)]).unwrap();
        assert!(matches!(
            router.expand_path(&broken),
            Err(GraphError::InvalidState(_))
        ));
    }

    #[test]
    fn test_many_to_many() {
        let graph = triangle();
        let router = CHRouter::new(&graph);
        let points: Vec<_> = (1..=4).map(RoutingPoint::vertex).collect();

        let weights = router.calculate_many_to_many_weight(&points, &points).unwrap();
        assert_eq!(weights[0], vec![Some(0.0), Some(1.0), Some(2.0), None]);
        assert_eq!(weights[2], vec![Some(2.0), Some(1.0), Some(0.0), None]);
        assert_eq!(weights[3], vec![None, None, None, Some(0.0)]);
    }

    #[test]
    fn test_connectivity() {
        let graph = triangle();
        let router = CHRouter::new(&graph);

        assert!(router.check_connectivity(&RoutingPoint::vertex(2), 0.5).unwrap());
        assert!(!router.check_connectivity(&RoutingPoint::vertex(2), 5.0).unwrap());
        assert!(!router.check_connectivity(&RoutingPoint::vertex(4), 0.5).unwrap());

        // 3 owns no edges, it is only reached through edges stored below it.
        assert!(router.check_connectivity(&RoutingPoint::vertex(3), 0.5).unwrap());
        assert!(router.check_connectivity(&RoutingPoint::vertex(1), 1.5).unwrap());
        assert!(!router.check_connectivity(&RoutingPoint::vertex(3), 2.5).unwrap());
    }

    #[test]
    fn test_search_closest() {
        let source = RoutingDataSource::new(triangle());
        let router = CHRouter::new(&source);

        let closest = router
            .search_closest(Coordinate::new(0.001, 0.015))
            .unwrap()
            .unwrap();
        assert_eq!((closest.from, closest.to), (2, 3));
        assert!((closest.position - 0.5).abs() < 1e-3);
        assert!((closest.distance - 111.2).abs() < 1.0);
        assert_eq!(closest.weight, 1.0);

        let exact = router
            .search_closest(Coordinate::new(0.0, 0.01))
            .unwrap()
            .unwrap();
        assert!(exact.distance < 1e-6);
        assert!(exact.from == 2 || exact.to == 2);

        assert!(router
            .search_closest(Coordinate::new(-5.0, -5.0))
            .unwrap()
            .is_none());
    }
}
