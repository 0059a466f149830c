use std::sync::Arc;

use crate::{VertexId, NO_VERTEX};

/// Immutable linked path: a vertex, the weight to reach it and the segment it
/// was reached from. Segments share their prefixes.
#[derive(Debug)]
pub struct PathSegment {
    pub vertex: VertexId,
    pub weight: f32,
    pub from: Option<Arc<PathSegment>>,
}

impl PathSegment {
    pub fn new(vertex: VertexId) -> Self {
        Self::with_weight(vertex, 0.0)
    }

    pub fn with_weight(vertex: VertexId, weight: f32) -> Self {
        Self {
            vertex,
            weight,
            from: None,
        }
    }

    /// Extends `from` by one vertex reached at the cumulative `weight`.
    pub fn extend(from: &Arc<PathSegment>, vertex: VertexId, weight: f32) -> Arc<PathSegment> {
        Arc::new(Self {
            vertex,
            weight,
            from: Some(Arc::clone(from)),
        })
    }

    /// Walks from this segment back to the origin.
    pub fn iter(&self) -> impl Iterator<Item = &PathSegment> {
        std::iter::successors(Some(self), |segment| segment.from.as_deref())
    }

    /// Number of vertices on the path.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn origin(&self) -> VertexId {
        self.iter().last().map_or(NO_VERTEX, |segment| segment.vertex)
    }

    /// `(vertex, weight)` pairs from the origin to this segment.
    pub fn entries(&self) -> Vec<(VertexId, f32)> {
        let mut entries: Vec<_> = self
            .iter()
            .map(|segment| (segment.vertex, segment.weight))
            .collect();
        entries.reverse();
        entries
    }

    pub fn vertices(&self) -> Vec<VertexId> {
        self.entries().into_iter().map(|(vertex, _)| vertex).collect()
    }

    /// Builds a path from `(vertex, weight)` pairs in travel order.
    pub fn from_entries(entries: &[(VertexId, f32)]) -> Option<Arc<PathSegment>> {
        let (&(vertex, weight), rest) = entries.split_first()?;
        let mut head = Arc::new(Self::with_weight(vertex, weight));
        for &(vertex, weight) in rest {
            head = Self::extend(&head, vertex, weight);
        }
        Some(head)
    }
}

impl Drop for PathSegment {
    // Unlinks iteratively so dropping a long path cannot overflow the stack.
    fn drop(&mut self) {
        let mut next = self.from.take();
        while let Some(segment) = next {
            match Arc::try_unwrap(segment) {
                Ok(mut segment) => next = segment.from.take(),
                Err(_) => break,
            }
        }
    }
}

/// A query endpoint resolved onto the network as one or more seed paths.
#[derive(Clone, Debug)]
pub struct RoutingPoint {
    heads: Vec<Arc<PathSegment>>,
}

impl RoutingPoint {
    pub fn vertex(vertex: VertexId) -> Self {
        Self {
            heads: vec![Arc::new(PathSegment::new(vertex))],
        }
    }

    /// A point at `position` (0..=1) along the edge `from -> to` whose full
    /// weight is `weight`. Both endpoints are seeded with their share of the
    /// weight, the edge is assumed to be traversable both ways.
    pub fn on_edge(from: VertexId, to: VertexId, position: f32, weight: f32) -> Self {
        let position = position.clamp(0.0, 1.0);
        if position == 0.0 {
            return Self::vertex(from);
        }
        if position == 1.0 {
            return Self::vertex(to);
        }

        Self {
            heads: vec![
                Arc::new(PathSegment::with_weight(from, position * weight)),
                Arc::new(PathSegment::with_weight(to, (1.0 - position) * weight)),
            ],
        }
    }

    pub fn from_closest(closest: &super::ClosestEdge) -> Self {
        Self::on_edge(closest.from, closest.to, closest.position, closest.weight)
    }

    pub fn from_segments(heads: Vec<Arc<PathSegment>>) -> Self {
        Self { heads }
    }

    pub fn heads(&self) -> &[Arc<PathSegment>] {
        &self.heads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_shares_prefix() {
        let root = Arc::new(PathSegment::new(1));
        let a = PathSegment::extend(&root, 2, 1.0);
        let b = PathSegment::extend(&a, 3, 2.5);
        let c = PathSegment::extend(&a, 4, 3.0);

        assert_eq!(b.vertices(), vec![1, 2, 3]);
        assert_eq!(c.entries(), vec![(1, 0.0), (2, 1.0), (4, 3.0)]);
        assert_eq!(b.origin(), 1);
        assert_eq!(Arc::strong_count(&a), 3);

        drop(b);
        assert_eq!(Arc::strong_count(&a), 2);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_long_path_drops() {
        let entries: Vec<_> = (1..=200_000).map(|v| (v, v as f32)).collect();
        let path = PathSegment::from_entries(&entries).unwrap();
        assert_eq!(path.vertex, 200_000);
        drop(path);
    }

    #[test]
    fn test_point_on_edge() {
        let point = RoutingPoint::on_edge(3, 7, 0.25, 8.0);
        let seeds: Vec<_> = point
            .heads()
            .iter()
            .map(|head| (head.vertex, head.weight))
            .collect();
        assert_eq!(seeds, vec![(3, 2.0), (7, 6.0)]);

        assert_eq!(RoutingPoint::on_edge(3, 7, 1.0, 8.0).heads()[0].vertex, 7);
        assert_eq!(RoutingPoint::on_edge(3, 7, -1.0, 8.0).heads().len(), 1);
    }
}
