use ch_roadgraph::{
    CHEdgeData, CHRouter, Contractor, Coordinate, Graph, GraphConfig, GraphRead, LiveEdge,
    MemoryDirectedGraph, PathSegment, RoutingDataSource, RoutingPoint, VertexId,
};

fn contract(graph: &MemoryDirectedGraph<LiveEdge>) -> MemoryDirectedGraph<CHEdgeData> {
    Contractor::default()
        .contract(graph, |edge: &LiveEdge| Some(edge.distance))
        .unwrap()
}

/// Deterministic grid with uneven weights and a few one-way streets.
fn grid(size: u32) -> MemoryDirectedGraph<LiveEdge> {
    let mut graph = MemoryDirectedGraph::default();
    for row in 0..size {
        for col in 0..size {
            graph
                .add_vertex(52.0 + row as f32 * 0.001, 4.0 + col as f32 * 0.001)
                .unwrap();
        }
    }

    let mut seed = 17u32;
    let mut next = || {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (seed >> 16) % 100
    };

    let id = |row: u32, col: u32| row * size + col + 1;
    for row in 0..size {
        for col in 0..size {
            let mut neighbours = vec![];
            if col + 1 < size {
                neighbours.push(id(row, col + 1));
            }
            if row + 1 < size {
                neighbours.push(id(row + 1, col));
            }

            for neighbour in neighbours {
                let weight = 1.0 + next() as f32 / 50.0;
                graph
                    .add_edge(id(row, col), neighbour, LiveEdge::new(1, weight, true))
                    .unwrap();
                if next() % 7 != 0 {
                    graph
                        .add_edge(neighbour, id(row, col), LiveEdge::new(1, weight, true))
                        .unwrap();
                }
            }
        }
    }

    graph
}

/// Plain Dijkstra over the uncontracted graph.
fn dijkstra(graph: &MemoryDirectedGraph<LiveEdge>, source: VertexId) -> Vec<Option<f32>> {
    let count = graph.vertex_count() as usize;
    let mut weights = vec![None; count + 1];
    let mut done = vec![false; count + 1];
    weights[source as usize] = Some(0.0f32);

    loop {
        let current = (1..=count)
            .filter(|&v| !done[v])
            .filter_map(|v| weights[v].map(|w| (v, w)))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        let Some((vertex, weight)) = current else {
            break;
        };
        done[vertex] = true;

        for edge in graph.get_edges(vertex as VertexId).unwrap() {
            let candidate = weight + edge.data.distance;
            let slot = &mut weights[edge.neighbour as usize];
            if slot.map_or(true, |w| candidate < w) {
                *slot = Some(candidate);
            }
        }
    }

    weights
}

fn assert_close(actual: Option<f32>, expected: Option<f32>) {
    match (actual, expected) {
        (Some(a), Some(e)) => assert!((a - e).abs() < 1e-3, "{a} != {e}"),
        (None, None) => {}
        _ => panic!("{actual:?} != {expected:?}"),
    }
}

#[test]
fn test_line_graph() {
    let mut graph = MemoryDirectedGraph::default();
    for i in 0..4 {
        graph.add_vertex(0.0, i as f32 * 0.01).unwrap();
    }
    for from in 1..4 {
        graph.add_edge(from, from + 1, LiveEdge::new(0, 1.0, true)).unwrap();
    }

    let ch = contract(&graph);
    let mut router = CHRouter::new(&ch);

    let route = router.route(1, 4).unwrap().unwrap();
    assert_eq!(route.vertices(), vec![1, 2, 3, 4]);
    assert_eq!(route.weight, 3.0);
    assert_eq!(router.weight(1, 4).unwrap(), Some(3.0));
    assert_eq!(router.weight(4, 1).unwrap(), None);

    let same = router
        .calculate(&RoutingPoint::vertex(1), &RoutingPoint::vertex(1))
        .unwrap()
        .unwrap();
    assert_eq!(same.weight, 0.0);
    assert_eq!(same.vertices(), vec![1]);
}

// Coordinates and directed edges of a small town, ids shifted to start at 1.
fn town() -> MemoryDirectedGraph<LiveEdge> {
    let nodes = [
        (0.0, 0.0),
        (8.0, 0.0),
        (4.0, 1.0),
        (2.0, 4.0),
        (6.0, 4.0),
        (4.0, 7.0),
        (0.0, 8.0),
        (8.0, 8.0),
    ];
    let edges = [
        (0, 3, 2.0),
        (1, 2, 1.6),
        (1, 4, 2.5),
        (2, 0, 1.3),
        (2, 3, 1.7),
        (2, 4, 1.5),
        (3, 0, 2.0),
        (3, 5, 1.3),
        (3, 2, 1.7),
        (4, 5, 1.2),
        (4, 1, 2.5),
        (5, 6, 1.9),
        (5, 7, 1.2),
        (5, 3, 1.3),
        (5, 4, 1.2),
        (6, 3, 3.2),
        (6, 5, 1.9),
        (7, 4, 3.0),
    ];

    let mut graph = MemoryDirectedGraph::default();
    for (x, y) in nodes {
        graph.add_vertex(y * 0.001, x * 0.001).unwrap();
    }
    for (from, to, weight) in edges {
        graph
            .add_edge(from + 1, to + 1, LiveEdge::new(0, weight, true))
            .unwrap();
    }
    graph
}

#[test]
fn test_town_distances() {
    let ch = contract(&town());
    let mut router = CHRouter::new(&ch);

    assert_close(router.weight(1, 2).unwrap(), Some(7.0));
    assert_close(router.weight(2, 7).unwrap(), Some(5.6));
    assert_close(router.weight(8, 3).unwrap(), Some(7.1));

    let route = router.route(1, 2).unwrap().unwrap();
    assert_eq!(route.vertices(), vec![1, 4, 6, 5, 2]);
    assert_close(Some(route.weight), Some(7.0));
}

#[test]
fn test_contracted_matches_dijkstra() {
    let graph = grid(6);
    let ch = contract(&graph);
    let mut router = CHRouter::new(&ch);

    for source in 1..=graph.vertex_count() {
        let expected = dijkstra(&graph, source);
        for target in 1..=graph.vertex_count() {
            assert_close(router.weight(source, target).unwrap(), expected[target as usize]);
        }
    }
}

#[test]
fn test_expanded_routes_follow_network() {
    let graph = grid(6);
    let ch = contract(&graph);
    let mut router = CHRouter::new(&ch);

    for (source, target) in [(1, 36), (36, 1), (6, 31), (14, 23), (31, 6)] {
        let Some(route) = router.route(source, target).unwrap() else {
            assert!(dijkstra(&graph, source)[target as usize].is_none());
            continue;
        };

        let vertices = route.vertices();
        assert_eq!(vertices.first(), Some(&source));
        assert_eq!(vertices.last(), Some(&target));

        let mut total = 0.0;
        for pair in vertices.windows(2) {
            let cheapest = graph
                .get_edges(pair[0])
                .unwrap()
                .filter(|edge| edge.neighbour == pair[1])
                .map(|edge| edge.data.distance)
                .min_by(f32::total_cmp)
                .expect("consecutive vertices are connected");
            total += cheapest;
        }
        assert_close(Some(total), Some(route.weight));
        assert_close(Some(route.path.weight), Some(route.weight));
    }
}

#[test]
fn test_shortcut_expansion() {
    let graph = grid(6);
    let ch = contract(&graph);
    let router = CHRouter::new(&ch);

    let mut checked = 0;
    for vertex in 1..=ch.vertex_count() {
        for edge in ch.get_edges(vertex).unwrap() {
            if !edge.data.is_shortcut() || !edge.data.is_forward() {
                continue;
            }

            let path =
                PathSegment::from_entries(&[(vertex, 0.0), (edge.neighbour, edge.data.weight)])
                    .unwrap();
            let expanded = router.expand_path(&path).unwrap();

            assert!(expanded.vertices().contains(&edge.data.contracted_id));
            assert_eq!(expanded.origin(), vertex);
            assert_eq!(expanded.vertex, edge.neighbour);
            assert!((expanded.weight - edge.data.weight).abs() < 1e-3);
            checked += 1;
        }
    }
    assert!(checked > 0);
}

#[test]
fn test_many_to_many_matches_pairwise() {
    let graph = grid(5);
    let ch = contract(&graph);
    let mut router = CHRouter::new(&ch);

    let sources: Vec<_> = [1, 7, 13, 25].map(RoutingPoint::vertex).into();
    let targets: Vec<_> = [2, 5, 13, 21, 24].map(RoutingPoint::vertex).into();
    let matrix = router
        .calculate_many_to_many_weight(&sources, &targets)
        .unwrap();

    assert_eq!(matrix.len(), sources.len());
    for (i, source) in sources.iter().enumerate() {
        assert_eq!(matrix[i].len(), targets.len());
        for (j, target) in targets.iter().enumerate() {
            let pairwise = router.calculate_weight(source, target).unwrap();
            assert_close(matrix[i][j], pairwise);
        }
    }
}

#[test]
fn test_closest_point_routing() {
    let graph = grid(5);
    let source = RoutingDataSource::new(contract(&graph));
    let mut router = CHRouter::new(&source);

    // Just north of the middle of the edge between vertices 7 and 8.
    let closest = router
        .search_closest(Coordinate::new(52.0012, 4.0015))
        .unwrap()
        .unwrap();
    let mut pair = [closest.from, closest.to];
    pair.sort_unstable();
    assert_eq!(pair, [7, 8]);
    assert!((closest.position - 0.5).abs() < 0.01);
    assert!(closest.distance < 30.0);

    let point = RoutingPoint::from_closest(&closest);
    let weight = router
        .calculate_weight(&point, &RoutingPoint::vertex(25))
        .unwrap()
        .unwrap();

    let via_from = router.weight(closest.from, 25).unwrap();
    let via_to = router.weight(closest.to, 25).unwrap();
    let expected = [
        via_from.map(|w| w + closest.position * closest.weight),
        via_to.map(|w| w + (1.0 - closest.position) * closest.weight),
    ]
    .into_iter()
    .flatten()
    .min_by(f32::total_cmp);
    assert_close(Some(weight), expected);
}

#[test]
fn test_top_ranked_vertices_are_connected() {
    let graph = grid(5);
    let ch = contract(&graph);
    let router = CHRouter::new(&ch);

    // The last contracted vertices keep no edges of their own.
    let top: Vec<VertexId> = (1..=ch.vertex_count())
        .filter(|&vertex| ch.get_edges(vertex).unwrap().next().is_none())
        .collect();
    assert!(!top.is_empty());

    for vertex in top {
        let point = RoutingPoint::vertex(vertex);
        assert!(router.check_connectivity(&point, 0.5).unwrap());
        assert!(!router.check_connectivity(&point, 1e6).unwrap());
    }
}

#[test]
fn test_contracted_graph_save_load() {
    let graph = grid(4);
    let ch = contract(&graph);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.ch");
    ch.save(&path).unwrap();
    let loaded = MemoryDirectedGraph::<CHEdgeData>::load(&path, GraphConfig::default()).unwrap();

    let mut before = CHRouter::new(&ch);
    let mut after = CHRouter::new(&loaded);
    for target in 1..=16 {
        assert_eq!(before.weight(1, target).unwrap(), after.weight(1, target).unwrap());
    }
}
