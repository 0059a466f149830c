use crate::{
    config::SpatialConfig,
    error::Result,
    graph::{EdgeData, Graph, GraphRead},
    BoundingBox, Coordinate, GraphError, VertexId,
};

/// Position of `(lat, lon)` along the Hilbert curve filling a
/// `steps x steps` grid laid over the whole globe. `steps` must be a power
/// of two.
pub fn hilbert_distance(lat: f32, lon: f32, steps: u32) -> u64 {
    debug_assert!(steps.is_power_of_two());
    let n = steps as u64;
    xy_to_distance(n, grid_x(lon, n), grid_y(lat, n))
}

fn grid_x(lon: f32, n: u64) -> u64 {
    grid(lon as f64 + 180.0, 360.0, n)
}

fn grid_y(lat: f32, n: u64) -> u64 {
    grid(lat as f64 + 90.0, 180.0, n)
}

fn grid(offset: f64, range: f64, n: u64) -> u64 {
    let cell = (offset / range * n as f64).floor();
    cell.clamp(0.0, (n - 1) as f64) as u64
}

fn xy_to_distance(n: u64, mut x: u64, mut y: u64) -> u64 {
    let mut distance = 0;
    let mut s = n / 2;

    while s > 0 {
        let rx = ((x & s) != 0) as u64;
        let ry = ((y & s) != 0) as u64;
        distance += s * s * ((3 * rx) ^ ry);

        if ry == 0 {
            if rx == 1 {
                x = n - 1 - x;
                y = n - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }

        s /= 2;
    }

    distance
}

fn vertex_distance<E: EdgeData, G: GraphRead<E>>(
    graph: &G,
    vertex: VertexId,
    steps: u32,
) -> Result<u64> {
    let Coordinate { lat, lon } = graph
        .get_vertex(vertex)
        .ok_or_else(|| GraphError::out_of_range(vertex, graph.vertex_count()))?;
    Ok(hilbert_distance(lat, lon, steps))
}

/// Reorders the vertices in place by Hilbert distance. Ids are swapped
/// through `Graph::switch`, so edges follow their vertices.
pub fn sort_hilbert<E: EdgeData, G: Graph<E>>(graph: &mut G, steps: u32) -> Result<()> {
    let count = graph.vertex_count();
    if count < 2 {
        return Ok(());
    }

    let mut ranges = vec![(1, count)];
    let mut partitions = 0usize;

    while let Some((lo, hi)) = ranges.pop() {
        if lo >= hi {
            continue;
        }

        let pivot = partition(graph, lo, hi, steps)?;
        partitions += 1;

        if pivot > lo {
            ranges.push((lo, pivot - 1));
        }
        ranges.push((pivot + 1, hi));
    }

    tracing::debug!(vertices = count, partitions, steps, "sorted graph along hilbert curve");
    Ok(())
}

// Distances are recomputed from coordinates instead of being cached, to
// avoid a second array the size of the vertex table.
fn partition<E: EdgeData, G: Graph<E>>(
    graph: &mut G,
    lo: VertexId,
    hi: VertexId,
    steps: u32,
) -> Result<VertexId> {
    let pivot = vertex_distance(graph, lo, steps)?;
    let mut i = lo + 1;
    let mut j = hi;

    loop {
        while i <= j && vertex_distance(graph, i, steps)? <= pivot {
            i += 1;
        }
        while i <= j && vertex_distance(graph, j, steps)? > pivot {
            j -= 1;
        }
        if i > j {
            break;
        }
        graph.switch(i, j)?;
        i += 1;
        j -= 1;
    }

    graph.switch(lo, j)?;
    Ok(j)
}

/// Binary search over the Hilbert-sorted range `lo..=hi` for the run of
/// vertices whose distance equals `distance`. Returns the first vertex of
/// the run and its length.
pub fn search_hilbert_run<E: EdgeData, G: GraphRead<E>>(
    graph: &G,
    distance: u64,
    steps: u32,
    lo: VertexId,
    hi: VertexId,
) -> Result<Option<(VertexId, u32)>> {
    let lo_distance = vertex_distance(graph, lo, steps)?;
    let hi_distance = vertex_distance(graph, hi, steps)?;
    if lo > hi || lo_distance > hi_distance {
        return Err(GraphError::InvalidState(format!(
            "vertices {lo}..={hi} are not sorted along the hilbert curve"
        )));
    }
    if distance < lo_distance || distance > hi_distance {
        return Ok(None);
    }

    let (mut low, mut high) = (lo, hi);
    while low <= high {
        let mid = low + (high - low) / 2;
        let mid_distance = vertex_distance(graph, mid, steps)?;

        if mid_distance == distance {
            let mut first = mid;
            while first > lo && vertex_distance(graph, first - 1, steps)? == distance {
                first -= 1;
            }
            let mut last = mid;
            while last < hi && vertex_distance(graph, last + 1, steps)? == distance {
                last += 1;
            }
            return Ok(Some((first, last - first + 1)));
        }

        if mid_distance < distance {
            low = mid + 1;
        } else if mid == lo {
            break;
        } else {
            high = mid - 1;
        }
    }

    Ok(None)
}

/// Vertices inside the box of half-width `offset` degrees around
/// `(lat, lon)`. The graph must be Hilbert-sorted with the same steps.
pub fn search_hilbert<E: EdgeData, G: GraphRead<E>>(
    graph: &G,
    lat: f32,
    lon: f32,
    offset: f32,
    config: &SpatialConfig,
) -> Result<Vec<VertexId>> {
    let count = graph.vertex_count();
    if count == 0 {
        return Ok(vec![]);
    }

    let bbox = BoundingBox::around(Coordinate::new(lat, lon), offset);
    let inside = |vertex: VertexId| {
        graph
            .get_vertex(vertex)
            .is_some_and(|coordinate| bbox.contains(&coordinate))
    };

    let n = config.hilbert_steps as u64;
    let (x0, x1) = (grid_x(bbox.min_lon, n), grid_x(bbox.max_lon, n));
    let (y0, y1) = (grid_y(bbox.min_lat, n), grid_y(bbox.max_lat, n));
    let cells = (x1 - x0 + 1) * (y1 - y0 + 1);

    // Hilbert proximity is necessary but not sufficient, every hit is
    // checked against the box.
    if cells > config.max_box_cells || cells > count as u64 {
        tracing::trace!(cells, "box too large for hilbert search, scanning");
        return Ok((1..=count).filter(|&vertex| inside(vertex)).collect());
    }

    let mut distances: Vec<u64> = (x0..=x1)
        .flat_map(|x| (y0..=y1).map(move |y| xy_to_distance(n, x, y)))
        .collect();
    distances.sort_unstable();
    distances.dedup();

    let mut found = vec![];
    for distance in distances {
        if let Some((first, len)) =
            search_hilbert_run(graph, distance, config.hilbert_steps, 1, count)?
        {
            found.extend((first..first + len).filter(|&vertex| inside(vertex)));
        }
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GraphConfig, LiveEdge, MemoryDirectedGraph, MemoryGraph};

    const CELL_CENTERS_LAT: [f32; 4] = [-67.5, -22.5, 22.5, 67.5];
    const CELL_CENTERS_LON: [f32; 4] = [-135.0, -45.0, 45.0, 135.0];

    #[test]
    fn test_distance_covers_grid() {
        let mut seen = vec![];
        for lat in CELL_CENTERS_LAT {
            for lon in CELL_CENTERS_LON {
                seen.push(hilbert_distance(lat, lon, 4));
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<u64>>());

        assert_eq!(hilbert_distance(-90.0, -180.0, 4), 0);
        assert_eq!(hilbert_distance(-90.0, 180.0, 4), 15);
        assert_eq!(hilbert_distance(90.0, 180.0, 4), hilbert_distance(67.5, 135.0, 4));
    }

    #[test]
    fn test_neighbouring_cells_are_adjacent_on_curve() {
        let n = 16;
        let mut cells = vec![(0, 0); (n * n) as usize];
        for x in 0..n {
            for y in 0..n {
                cells[xy_to_distance(n, x, y) as usize] = (x, y);
            }
        }
        for pair in cells.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let step = a.0.abs_diff(b.0) + a.1.abs_diff(b.1);
            assert_eq!(step, 1, "{a:?} -> {b:?}");
        }
    }

    #[test]
    fn test_sort_matches_stable_sort() {
        let mut graph = MemoryGraph::<LiveEdge>::default();
        let mut coordinates = vec![];
        // Scrambled insertion order.
        for (i, lat) in CELL_CENTERS_LAT.iter().enumerate() {
            for j in 0..4 {
                let lon = CELL_CENTERS_LON[(j + 3 * i) % 4];
                coordinates.push(Coordinate::new(*lat, lon));
            }
        }
        coordinates.reverse();
        for coordinate in &coordinates {
            graph.add_vertex(coordinate.lat, coordinate.lon).unwrap();
        }

        sort_hilbert(&mut graph, 4).unwrap();

        let mut expected = coordinates.clone();
        expected.sort_by_key(|c| hilbert_distance(c.lat, c.lon, 4));
        let sorted: Vec<_> = (1..=16).map(|v| graph.get_vertex(v).unwrap()).collect();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_sort_keeps_edges_attached() {
        let mut graph = MemoryGraph::<LiveEdge>::new(GraphConfig::default());
        let a = graph.add_vertex(60.0, 100.0).unwrap();
        let b = graph.add_vertex(-60.0, -100.0).unwrap();
        let c = graph.add_vertex(10.0, 10.0).unwrap();
        graph.add_edge(a, b, LiveEdge::new(1, 1.0, true)).unwrap();
        graph.add_edge(b, c, LiveEdge::new(2, 1.0, true)).unwrap();

        sort_hilbert(&mut graph, 1 << 15).unwrap();

        let find = |lat: f32| (1..=3).find(|&v| graph.get_vertex(v).unwrap().lat == lat).unwrap();
        let (a, b, c) = (find(60.0), find(-60.0), find(10.0));
        assert_eq!(graph.get_edge(a, b).unwrap(), Some(LiveEdge::new(1, 1.0, true)));
        assert_eq!(graph.get_edge(c, b).unwrap(), Some(LiveEdge::new(2, 1.0, false)));
        assert!(!graph.contains_edge(a, c).unwrap());
    }

    #[test]
    fn test_every_vertex_found_after_sort() {
        let mut graph = MemoryDirectedGraph::<LiveEdge>::default();
        // Several vertices share a grid cell to produce runs.
        for i in 0..200u32 {
            let lat = ((i * 37) % 170) as f32 - 85.0;
            let lon = ((i * 91) % 350) as f32 - 175.0;
            graph.add_vertex(lat, lon).unwrap();
            graph.add_vertex(lat + 0.001, lon + 0.001).unwrap();
        }
        let steps = 64;
        sort_hilbert(&mut graph, steps).unwrap();

        let count = graph.vertex_count();
        for vertex in 1..=count {
            let c = graph.get_vertex(vertex).unwrap();
            let distance = hilbert_distance(c.lat, c.lon, steps);
            let (first, len) = search_hilbert_run(&graph, distance, steps, 1, count)
                .unwrap()
                .unwrap();
            assert!(first <= vertex && vertex < first + len);
            let run: Vec<_> = (1..=count)
                .filter(|&v| {
                    let c = graph.get_vertex(v).unwrap();
                    hilbert_distance(c.lat, c.lon, steps) == distance
                })
                .collect();
            assert_eq!(run.len() as u32, len);
        }
    }

    #[test]
    fn test_search_run_rejects_unsorted_range() {
        let mut graph = MemoryGraph::<LiveEdge>::default();
        graph.add_vertex(67.5, 135.0).unwrap();
        graph.add_vertex(-67.5, -135.0).unwrap();

        assert!(matches!(
            search_hilbert_run(&graph, 3, 4, 1, 2),
            Err(GraphError::InvalidState(_))
        ));

        sort_hilbert(&mut graph, 4).unwrap();
        assert_eq!(search_hilbert_run(&graph, 7, 4, 1, 2).unwrap(), None);
    }

    #[test]
    fn test_search_box() {
        let mut graph = MemoryGraph::<LiveEdge>::default();
        for i in 0..50 {
            for j in 0..50 {
                graph
                    .add_vertex(50.0 + i as f32 * 0.01, 4.0 + j as f32 * 0.01)
                    .unwrap();
            }
        }
        let config = SpatialConfig {
            hilbert_steps: 1 << 12,
            ..SpatialConfig::default()
        };
        sort_hilbert(&mut graph, config.hilbert_steps).unwrap();

        let mut found = search_hilbert(&graph, 50.2, 4.2, 0.015, &config).unwrap();
        found.sort_unstable();

        let mut expected: Vec<_> = (1..=graph.vertex_count())
            .filter(|&v| {
                let c = graph.get_vertex(v).unwrap();
                (c.lat - 50.2).abs() <= 0.015 && (c.lon - 4.2).abs() <= 0.015
            })
            .collect();
        expected.sort_unstable();

        assert_eq!(expected.len(), 9);
        assert_eq!(found, expected);
    }
}
