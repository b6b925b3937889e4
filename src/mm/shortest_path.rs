use crate::graph::{NodeId, RoadDigraph, RoadGraph, SegmentView};
use log::{debug, warn};
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet};

/// 两个节点之间的最短路径
#[derive(Debug, Clone)]
pub struct ShortestPath<'a> {
    pub length: f64,
    pub segments: Vec<SegmentView<'a>>,
}

/// Shortest paths of one batched query, keyed by (source, sink).
#[derive(Debug, Default)]
pub struct ShortestPathSet<'a> {
    paths: HashMap<(NodeId, NodeId), ShortestPath<'a>>,
}

impl<'a> ShortestPathSet<'a> {
    /// `None` when `to` is unreachable from `from` or the pair was not queried.
    pub fn get(&self, from: NodeId, to: NodeId) -> Option<&ShortestPath<'a>> {
        self.paths.get(&(from, to))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug)]
struct SmallestHolder {
    cost: f64,
    node: NodeIndex<usize>,
}

impl PartialEq for SmallestHolder {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.cost.total_cmp(&other.cost) == Ordering::Equal
    }
}

impl Eq for SmallestHolder {}

impl PartialOrd for SmallestHolder {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SmallestHolder {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        other.cost.total_cmp(&self.cost)
    }
}

/// One best-first search, forward from a source or backward from a sink.
struct Frontier {
    root: NodeIndex<usize>,
    direction: Direction,
    to_see: BinaryHeap<SmallestHolder>,
    dist: HashMap<NodeIndex<usize>, f64>,
    parent: HashMap<NodeIndex<usize>, EdgeIndex<usize>>,
    settled: HashSet<NodeIndex<usize>>,
    stopped: bool,
}

impl Frontier {
    fn new(root: NodeIndex<usize>, direction: Direction) -> Self {
        let mut to_see = BinaryHeap::new();
        to_see.push(SmallestHolder {
            cost: 0.0,
            node: root,
        });
        Frontier {
            root,
            direction,
            to_see,
            dist: HashMap::from([(root, 0.0)]),
            parent: HashMap::new(),
            settled: HashSet::new(),
            stopped: false,
        }
    }

    /// 堆顶的有效距离, 堆为空时为无穷大
    fn min(&mut self) -> f64 {
        while let Some(top) = self.to_see.peek() {
            let stale = self.settled.contains(&top.node)
                || self.dist.get(&top.node).map_or(true, |d| top.cost > *d);
            if !stale {
                return top.cost;
            }
            self.to_see.pop();
        }
        f64::INFINITY
    }

    fn distance(&self, node: NodeIndex<usize>) -> Option<f64> {
        self.dist.get(&node).copied()
    }

    /// 扩展一个节点, 返回距离被更新的节点
    fn step(&mut self, graph: &RoadDigraph) -> Vec<NodeIndex<usize>> {
        if self.min().is_infinite() {
            return Vec::new();
        }
        let Some(SmallestHolder { cost, node }) = self.to_see.pop() else {
            return Vec::new();
        };
        self.settled.insert(node);

        let mut improved = Vec::new();
        for edge in graph.edges_directed(node, self.direction) {
            let next = match self.direction {
                Direction::Outgoing => edge.target(),
                Direction::Incoming => edge.source(),
            };
            let new_cost = cost + edge.weight().length;
            if self.dist.get(&next).map_or(true, |d| new_cost < *d) {
                self.dist.insert(next, new_cost);
                self.parent.insert(next, edge.id());
                self.to_see.push(SmallestHolder {
                    cost: new_cost,
                    node: next,
                });
                improved.push(next);
            }
        }
        improved
    }

    /// 沿搜索树回到根节点经过的边, 顺序为从 `node` 出发
    fn tree_edges(&self, graph: &RoadDigraph, node: NodeIndex<usize>) -> Option<Vec<EdgeIndex<usize>>> {
        let mut edges = Vec::new();
        let mut current = node;
        while current != self.root {
            if edges.len() > graph.node_count() {
                return None;
            }
            let edge = *self.parent.get(&current)?;
            let (source, target) = graph.edge_endpoints(edge)?;
            current = match self.direction {
                Direction::Outgoing => source,
                Direction::Incoming => target,
            };
            edges.push(edge);
        }
        Some(edges)
    }
}

/// A pair is settled once no remaining frontier label can beat its best.
fn pair_done(forward: &mut Frontier, backward: &mut Frontier, best: Option<f64>) -> bool {
    forward.min() + backward.min() >= best.unwrap_or(f64::INFINITY)
}

/// 多对多最短路径: 每个起点正向搜索, 每个终点反向搜索, 交替扩展直到相遇
pub struct ShortestPathCalculator<'a> {
    graph: &'a RoadGraph,
}

impl<'a> ShortestPathCalculator<'a> {
    pub fn new(graph: &'a RoadGraph) -> Self {
        ShortestPathCalculator { graph }
    }

    pub fn calculate(
        &self,
        sources: &BTreeSet<NodeId>,
        sinks: &BTreeSet<NodeId>,
    ) -> ShortestPathSet<'a> {
        let mut result = ShortestPathSet::default();
        for node in sources.intersection(sinks) {
            result.paths.insert(
                (*node, *node),
                ShortestPath {
                    length: 0.0,
                    segments: Vec::new(),
                },
            );
        }

        let graph = self.graph.inner();
        let (source_ids, mut forward) = self.frontiers(sources, Direction::Outgoing);
        let (sink_ids, mut backward) = self.frontiers(sinks, Direction::Incoming);

        // (forward, backward) -> (length, meeting node)
        let mut best: HashMap<(usize, usize), (f64, NodeIndex<usize>)> = HashMap::new();
        for (i, f) in forward.iter().enumerate() {
            for (j, b) in backward.iter().enumerate() {
                if f.root == b.root {
                    best.insert((i, j), (0.0, f.root));
                }
            }
        }

        let mut steps = 0usize;
        loop {
            let mut progressed = false;
            for i in 0..forward.len() {
                if forward[i].stopped {
                    continue;
                }
                let done = (0..backward.len()).all(|j| {
                    let current = best.get(&(i, j)).map(|b| b.0);
                    pair_done(&mut forward[i], &mut backward[j], current)
                });
                if done {
                    forward[i].stopped = true;
                    continue;
                }
                for node in forward[i].step(graph) {
                    let Some(df) = forward[i].distance(node) else {
                        continue;
                    };
                    for (j, b) in backward.iter().enumerate() {
                        if let Some(db) = b.distance(node) {
                            update_best(&mut best, (i, j), df + db, node);
                        }
                    }
                }
                steps += 1;
                progressed = true;
            }
            for j in 0..backward.len() {
                if backward[j].stopped {
                    continue;
                }
                let done = (0..forward.len()).all(|i| {
                    let current = best.get(&(i, j)).map(|b| b.0);
                    pair_done(&mut forward[i], &mut backward[j], current)
                });
                if done {
                    backward[j].stopped = true;
                    continue;
                }
                for node in backward[j].step(graph) {
                    let Some(db) = backward[j].distance(node) else {
                        continue;
                    };
                    for (i, f) in forward.iter().enumerate() {
                        if let Some(df) = f.distance(node) {
                            update_best(&mut best, (i, j), df + db, node);
                        }
                    }
                }
                steps += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        for ((i, j), (_, meet)) in best {
            let key = (source_ids[i], sink_ids[j]);
            if key.0 == key.1 {
                continue;
            }
            match self.rebuild(&forward[i], &backward[j], meet) {
                Some(path) => {
                    result.paths.insert(key, path);
                }
                None => warn!("broken search tree between {} and {}", key.0, key.1),
            }
        }
        debug!(
            "many to many shortest path {}x{}: {} paths in {} steps",
            sources.len(),
            sinks.len(),
            result.len(),
            steps
        );
        result
    }

    fn frontiers(
        &self,
        nodes: &BTreeSet<NodeId>,
        direction: Direction,
    ) -> (Vec<NodeId>, Vec<Frontier>) {
        let mut ids = Vec::with_capacity(nodes.len());
        let mut frontiers = Vec::with_capacity(nodes.len());
        for node in nodes {
            match self.graph.node_index(*node) {
                Some(index) => {
                    ids.push(*node);
                    frontiers.push(Frontier::new(index, direction));
                }
                None => warn!("node {} not in road graph", node),
            }
        }
        (ids, frontiers)
    }

    fn rebuild(
        &self,
        forward: &Frontier,
        backward: &Frontier,
        meet: NodeIndex<usize>,
    ) -> Option<ShortestPath<'a>> {
        let graph = self.graph.inner();
        let mut edges = forward.tree_edges(graph, meet)?;
        edges.reverse();
        edges.extend(backward.tree_edges(graph, meet)?);

        let mut segments = Vec::with_capacity(edges.len());
        for edge in edges {
            let weight = graph.edge_weight(edge)?;
            segments.push(self.graph.segment_view(weight.segment)?);
        }
        let length = segments.iter().map(|s| s.length()).sum();
        Some(ShortestPath { length, segments })
    }
}

fn update_best(
    best: &mut HashMap<(usize, usize), (f64, NodeIndex<usize>)>,
    key: (usize, usize),
    length: f64,
    meet: NodeIndex<usize>,
) {
    match best.get(&key) {
        Some((current, _)) if *current <= length => {}
        _ => {
            best.insert(key, (length, meet));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{Direction as RoadDirection, RawRoad, RoadNetwork};
    use approx::assert_relative_eq;
    use geo::{coord, LineString};

    fn road(coords: &[(f64, f64)], direction: RoadDirection) -> RawRoad {
        let line: LineString<f64> = coords
            .iter()
            .map(|(x, y)| coord! { x: *x, y: *y })
            .collect::<Vec<_>>()
            .into();
        RawRoad::new(line, direction)
    }

    /// 3x3 网格, 横向单行, 纵向双向, 外加一条孤立路段
    fn grid() -> RoadNetwork {
        let mut roads = Vec::new();
        for row in 0..3 {
            let y = 31.0 + row as f64 * 0.001;
            for col in 0..2 {
                let x = 121.0 + col as f64 * 0.001;
                let direction = if row % 2 == 0 {
                    RoadDirection::Forward
                } else {
                    RoadDirection::Backward
                };
                roads.push(road(&[(x, y), (x + 0.001, y)], direction));
            }
        }
        for col in 0..3 {
            let x = 121.0 + col as f64 * 0.001;
            for row in 0..2 {
                let y = 31.0 + row as f64 * 0.001;
                let direction = if col == 1 {
                    RoadDirection::Forward
                } else {
                    RoadDirection::Dual
                };
                roads.push(road(&[(x, y), (x, y + 0.0005), (x, y + 0.001)], direction));
            }
        }
        roads.push(road(&[(121.01, 31.01), (121.011, 31.01)], RoadDirection::Dual));
        RoadNetwork::new(roads, false).unwrap()
    }

    #[test_log::test]
    fn test_matches_single_pair_dijkstra() {
        let network = grid();
        let graph = network.graph();
        let nodes: BTreeSet<NodeId> = graph.topology().nodes().keys().copied().collect();
        let calculator = ShortestPathCalculator::new(graph);
        let paths = calculator.calculate(&nodes, &nodes);

        let mut reachable = 0;
        for from in &nodes {
            for to in &nodes {
                let path = paths.get(*from, *to);
                if from == to {
                    let path = path.unwrap();
                    assert_eq!(path.length, 0.0);
                    assert!(path.segments.is_empty());
                    continue;
                }
                match graph.short_path(*from, *to) {
                    Ok(expected) => {
                        reachable += 1;
                        let path = path.unwrap();
                        assert_relative_eq!(path.length, expected, max_relative = 1e-9);
                        assert_eq!(path.segments.first().unwrap().from_node(), *from);
                        assert_eq!(path.segments.last().unwrap().to_node(), *to);
                        for pair in path.segments.windows(2) {
                            assert_eq!(pair[0].to_node(), pair[1].from_node());
                        }
                    }
                    Err(_) => assert!(path.is_none(), "{} -> {} should be unreachable", from, to),
                }
            }
        }
        assert!(reachable > 0);
    }

    #[test_log::test]
    fn test_subset_query() {
        let network = grid();
        let graph = network.graph();
        let calculator = ShortestPathCalculator::new(graph);
        let sources = BTreeSet::from([1, 2]);
        let sinks = BTreeSet::from([2, 999]);
        let paths = calculator.calculate(&sources, &sinks);
        assert_eq!(paths.get(2, 2).unwrap().length, 0.0);
        assert!(paths.get(1, 999).is_none());
        let direct = paths.get(1, 2).unwrap();
        assert_eq!(direct.segments.len(), 1);
        assert_relative_eq!(direct.length, graph.short_path(1, 2).unwrap());
    }
}
