pub mod cache;
pub mod graph;
pub mod index;
pub mod network;
pub mod source;

pub use cache::{RoadNetworkCache, MAX_CACHE_ROAD_NETWORK_COUNT};
pub use graph::{RoadDigraph, RoadEdge, RoadGraph};
pub use index::SegmentIndex;
pub use network::*;
pub use source::{RoadSource, WktTableLayout};

// test
#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{coord, LineString, Rect};
    use std::collections::HashSet;
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn road(coords: &[(f64, f64)], direction: Direction) -> RawRoad {
        let line: LineString<f64> = coords
            .iter()
            .map(|(x, y)| coord! { x: *x, y: *y })
            .collect::<Vec<_>>()
            .into();
        RawRoad::new(line, direction)
    }

    fn assert_simple(graph: &RoadGraph) {
        let mut pairs = HashSet::new();
        for edge in graph.inner().raw_edges() {
            assert!(
                pairs.insert((edge.source(), edge.target())),
                "parallel edge {:?} -> {:?}",
                edge.source(),
                edge.target()
            );
            assert_ne!(edge.source(), edge.target());
        }
    }

    #[test_log::test]
    fn test_nodes_shared_by_coordinate() {
        let network = RoadNetwork::new(
            vec![
                road(&[(121.0, 31.0), (121.001, 31.0)], Direction::Forward),
                road(&[(121.001, 31.0), (121.002, 31.0)], Direction::Forward),
            ],
            false,
        )
        .unwrap();
        let topology = network.topology();
        assert_eq!(topology.nodes().len(), 3);
        let first = topology.segment(1).unwrap();
        let second = topology.segment(2).unwrap();
        assert_eq!(first.to_node(), second.from_node());
        let junction = topology.node(first.to_node()).unwrap();
        assert_eq!(junction.in_count, 1);
        assert_eq!(junction.out_count, 1);
    }

    #[test_log::test]
    fn test_backward_road_is_normalized() {
        let network = RoadNetwork::new(
            vec![road(&[(121.0, 31.0), (121.001, 31.0)], Direction::Backward)],
            false,
        )
        .unwrap();
        let segment = network.topology().segment(1).unwrap();
        assert!(!segment.is_dual());
        assert!(segment.reversed().is_none());
        assert_eq!(segment.coords()[0], coord! { x: 121.001, y: 31.0 });
    }

    #[test_log::test]
    fn test_dual_segment_reversed_view() {
        let network = RoadNetwork::new(
            vec![road(
                &[(121.0, 31.0), (121.001, 31.0), (121.001, 31.002)],
                Direction::Unknown,
            )],
            false,
        )
        .unwrap();
        let segment = network.topology().segment(1).unwrap();
        let forward = segment.forward();
        let reversed = segment.reversed().unwrap();
        assert_eq!(reversed.id(), -1);
        assert_eq!(reversed.from_node(), forward.to_node());
        assert_eq!(reversed.to_node(), forward.from_node());
        assert_eq!(reversed.coord(0), forward.coord(2));
        assert_relative_eq!(reversed.length(), forward.length());
        assert_relative_eq!(reversed.distance_from_start(0), 0.0);
        assert_relative_eq!(
            reversed.distance_from_start(1),
            forward.length() - forward.distance_from_start(1),
            epsilon = 1e-9
        );
        assert_relative_eq!(reversed.distance_from_start(2), forward.length());
    }

    #[test_log::test]
    fn test_parallel_roads_are_split() {
        let network = RoadNetwork::new(
            vec![
                road(&[(121.0, 31.0), (121.001, 31.0)], Direction::Dual),
                road(
                    &[(121.0, 31.0), (121.0005, 31.0005), (121.001, 31.0)],
                    Direction::Dual,
                ),
                road(&[(121.0, 31.0), (121.001, 31.0)], Direction::Forward),
            ],
            false,
        )
        .unwrap();
        let graph = network.graph();
        assert_simple(graph);
        // 两条双向路段 + 一条正向路段 (被截成两段)
        assert_eq!(graph.inner().edge_count(), 2 + 4 + 2);
        for edge in graph.inner().raw_edges() {
            let view = graph.segment_view(edge.weight.segment).unwrap();
            assert_eq!(
                graph.node_index(view.from_node()),
                Some(edge.source())
            );
            assert_relative_eq!(view.length(), edge.weight.length);
        }
    }

    #[test_log::test]
    fn test_dual_loop_is_split() {
        let network = RoadNetwork::new(
            vec![road(
                &[
                    (121.0, 31.0),
                    (121.001, 31.0),
                    (121.001, 31.001),
                    (121.0, 31.0),
                ],
                Direction::Dual,
            )],
            false,
        )
        .unwrap();
        let graph = network.graph();
        assert_simple(graph);
        // 自环先截成 A-P 和 P-Q-A, 后者与 P-A 反向边重合, 再截一次
        assert_eq!(graph.topology().segments().len(), 3);
        assert_eq!(graph.inner().edge_count(), 6);
    }

    #[test_log::test]
    fn test_fix_connection_splits_at_junction() {
        let roads = vec![
            road(&[(121.0, 31.0), (121.002, 31.0)], Direction::Forward),
            road(&[(121.001, 31.001), (121.001, 31.0)], Direction::Forward),
        ];
        let side_start = 3;
        let main_end = 2;

        let broken = RoadNetwork::new(roads.clone(), false).unwrap();
        assert!(broken.graph().short_path(side_start, main_end).is_err());

        let fixed = RoadNetwork::new(roads, true).unwrap();
        assert_eq!(fixed.topology().segments().len(), 3);
        assert!(fixed.topology().segment(1).is_none());
        let length = fixed.graph().short_path(side_start, main_end).unwrap();
        let expected = crate::algorithm::distance_m(
            coord! { x: 121.001, y: 31.001 },
            coord! { x: 121.001, y: 31.0 },
        ) + crate::algorithm::distance_m(
            coord! { x: 121.001, y: 31.0 },
            coord! { x: 121.002, y: 31.0 },
        );
        assert_relative_eq!(length, expected, max_relative = 1e-6);
    }

    #[test_log::test]
    fn test_spatial_index_query_refines_by_geometry() {
        let network = RoadNetwork::new(
            vec![
                road(&[(121.0, 31.0), (121.01, 31.01)], Direction::Forward),
                road(&[(121.0, 31.02), (121.01, 31.02)], Direction::Forward),
            ],
            false,
        )
        .unwrap();
        // 窗口在对角线路段的外包框内, 但与路段本身不相交
        let corner = Rect::new(
            coord! { x: 121.008, y: 31.0 },
            coord! { x: 121.01, y: 31.001 },
        );
        assert!(network.spatial_index_query(&corner).is_empty());

        let across = Rect::new(
            coord! { x: 121.004, y: 31.004 },
            coord! { x: 121.006, y: 31.021 },
        );
        let ids: Vec<SegmentId> = network
            .spatial_index_query(&across)
            .iter()
            .map(|s| s.id())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test_log::test]
    fn test_cache_evicts_least_recently_used() {
        let cache = RoadNetworkCache::new(NonZeroUsize::new(2).unwrap());
        let builds = AtomicUsize::new(0);
        let build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            RoadNetwork::new(
                vec![road(&[(121.0, 31.0), (121.001, 31.0)], Direction::Dual)],
                false,
            )
        };
        let keys: Vec<String> = (0..3).map(|_| RoadNetworkCache::generate_key()).collect();
        cache.get_or_build(&keys[0], build).unwrap();
        cache.get_or_build(&keys[1], build).unwrap();
        cache.get_or_build(&keys[0], build).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        cache.get_or_build(&keys[2], build).unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&keys[0]));
        assert!(!cache.contains(&keys[1]));
        assert!(cache.contains(&keys[2]));
    }

    #[test_log::test]
    fn test_segment_envelope() {
        let network = RoadNetwork::new(
            vec![road(
                &[(121.002, 31.0), (121.0, 31.001), (121.001, 30.999)],
                Direction::Forward,
            )],
            false,
        )
        .unwrap();
        let envelope = network.topology().segment(1).unwrap().envelope().unwrap();
        assert_eq!(envelope.min(), coord! { x: 121.0, y: 30.999 });
        assert_eq!(envelope.max(), coord! { x: 121.002, y: 31.001 });
    }

    #[test_log::test]
    fn test_cache_builds_once_under_contention() {
        let cache = RoadNetworkCache::default();
        let builds = AtomicUsize::new(0);
        let key = RoadNetworkCache::generate_key();
        let networks: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        cache
                            .get_or_build(&key, || {
                                builds.fetch_add(1, Ordering::SeqCst);
                                RoadNetwork::new(
                                    vec![road(&[(121.0, 31.0), (121.001, 31.0)], Direction::Dual)],
                                    false,
                                )
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert!(networks.iter().all(|n| Arc::ptr_eq(n, &networks[0])));
    }

    #[test_log::test]
    fn test_lazy_graph_shared_between_threads() {
        let network = RoadNetwork::new(
            vec![
                road(&[(121.0, 31.0), (121.001, 31.0)], Direction::Dual),
                road(&[(121.001, 31.0), (121.002, 31.0)], Direction::Forward),
            ],
            false,
        )
        .unwrap();
        // 未调用 materialize, 由多个线程同时触发首次构建
        let window = Rect::new(
            coord! { x: 120.999, y: 30.999 },
            coord! { x: 121.003, y: 31.001 },
        );
        let results: Vec<(usize, Vec<SegmentId>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let graph = network.graph() as *const RoadGraph as usize;
                        let ids: Vec<SegmentId> = network
                            .spatial_index_query(&window)
                            .iter()
                            .map(|s| s.id())
                            .collect();
                        (graph, ids)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let expected = network.graph() as *const RoadGraph as usize;
        for (graph, ids) in results {
            assert_eq!(graph, expected);
            assert_eq!(ids, vec![1, 2]);
        }
        assert_eq!(network.graph().inner().edge_count(), 3);
    }

    #[test_log::test]
    fn test_read_wkt_table() {
        let content = "geometry\tid\tname\tlength\tdirection\n\
            LINESTRING (121 31, 121.001 31)\t1\ta\t95\t2\n\
            \n\
            MULTILINESTRING ((121.001 31, 121.002 31), (121.002 31, 121.002 31.001))\t2\tb\t210\t3\n\
            LINESTRING (121 31, 121 31.001)\t3\tc\t111\n";
        let source = RoadSource::from_wkt_table(content, &WktTableLayout::default()).unwrap();
        assert_eq!(source.roads.len(), 4);
        assert_eq!(source.roads[0].direction, Direction::Forward);
        assert_eq!(source.roads[1].direction, Direction::Backward);
        assert_eq!(source.roads[2].direction, Direction::Backward);
        assert_eq!(source.roads[3].direction, Direction::Unknown);

        let bad = "LINESTRING (121 31, 121.001 31)\t2\nPOINT (1 2)\t2\n";
        let layout = WktTableLayout {
            has_header: false,
            direction_column: 1,
        };
        assert!(RoadSource::from_wkt_table(bad, &layout).is_err());

        // 无法识别的方向编码不能当作双向路
        for code in ["7", "X"] {
            let content = format!("LINESTRING (121 31, 121.001 31)\t{}\n", code);
            assert!(RoadSource::from_wkt_table(&content, &layout).is_err());
        }
    }

    #[test_log::test]
    fn test_read_geojson_roads() {
        let content = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"direction": 2},
                 "geometry": {"type": "LineString", "coordinates": [[121.0, 31.0], [121.001, 31.0]]}},
                {"type": "Feature", "properties": {"direction": "T"},
                 "geometry": {"type": "LineString", "coordinates": [[121.001, 31.0], [121.002, 31.0]]}},
                {"type": "Feature", "properties": null,
                 "geometry": {"type": "MultiLineString", "coordinates": [[[121.0, 31.0], [121.0, 31.001]]]}}
            ]
        }"#;
        let geojson: geojson::GeoJson = content.parse().unwrap();
        let source = RoadSource::try_from(geojson).unwrap();
        let directions: Vec<Direction> = source.roads.iter().map(|r| r.direction).collect();
        assert_eq!(
            directions,
            vec![Direction::Forward, Direction::Dual, Direction::Unknown]
        );
        let network = RoadNetwork::new(source.roads, false).unwrap();
        assert_eq!(network.graph().inner().edge_count(), 1 + 2 + 2);
    }

    #[test_log::test]
    fn test_geojson_invalid_direction() {
        for direction in ["9", "\"X\"", "true"] {
            let content = format!(
                r#"{{"type": "Feature", "properties": {{"direction": {}}},
                   "geometry": {{"type": "LineString", "coordinates": [[121.0, 31.0], [121.001, 31.0]]}}}}"#,
                direction
            );
            let geojson: geojson::GeoJson = content.parse().unwrap();
            assert!(RoadSource::try_from(geojson).is_err());
        }
    }

    #[test_log::test]
    fn test_invalid_direction_code() {
        assert!(Direction::try_from(7_i64).is_err());
        assert_eq!(Direction::try_from(1_i64).unwrap(), Direction::Dual);
    }
}
