use super::network::{NodeId, SegmentId, SegmentView, Topology};
use anyhow::Result;
use log::{debug, info, warn};
use petgraph::graph::{Graph, NodeIndex};
use petgraph::Directed;
use std::collections::{HashMap, VecDeque};

/// 图中的边: 对应一个有向路段
#[derive(Debug, Clone, Copy)]
pub struct RoadEdge {
    pub segment: SegmentId,
    pub length: f64,
}

pub type RoadDigraph = Graph<NodeId, RoadEdge, Directed, usize>;

/// 路网有向图, 平行边在中点拆分
pub struct RoadGraph {
    topology: Topology,
    graph: RoadDigraph,
    node_index: HashMap<NodeId, NodeIndex<usize>>,
}

impl RoadGraph {
    pub fn build(mut topology: Topology) -> Self {
        info!("start construct graph...");
        let node_size = topology.nodes().len();
        let edge_size = topology.segments().len();
        debug!("node size: {}, segment size: {}", node_size, edge_size);
        let mut gh = RoadGraph {
            topology: Topology::default(),
            graph: Graph::with_capacity(node_size, edge_size * 2),
            node_index: HashMap::with_capacity(node_size),
        };

        let mut pending: VecDeque<SegmentId> = topology.segments().keys().copied().collect();
        let mut split_count = 0;
        while let Some(id) = pending.pop_front() {
            let length = {
                let Some(segment) = topology.segment(id) else {
                    continue;
                };
                let views: Vec<SegmentView> = std::iter::once(segment.forward())
                    .chain(segment.reversed())
                    .collect();
                // 双向自环的正反两个方向会落在同一对节点上
                let self_collides = segment.is_dual() && segment.from_node() == segment.to_node();
                let collides = self_collides
                    || views
                        .iter()
                        .any(|v| gh.find_edge(v.from_node(), v.to_node()).is_some());
                if !collides {
                    for view in views {
                        gh.add_view(view);
                    }
                    continue;
                }
                segment.length()
            };

            // 添加边失败, 说明存在环, 需要将当前路段一分为二
            if length <= f64::EPSILON {
                warn!("drop degenerate segment {} duplicating an existing edge", id);
                topology.remove_segment(id);
                continue;
            }
            match topology.split_in_half(id) {
                Ok((first, second)) => {
                    split_count += 1;
                    pending.push_front(second);
                    pending.push_front(first);
                }
                Err(e) => warn!("split segment {} failed: {}", id, e),
            }
        }
        gh.topology = topology;
        debug!("split {} segments to keep the graph simple", split_count);
        info!(
            "finish construct road graph: {} nodes, {} edges",
            gh.graph.node_count(),
            gh.graph.edge_count()
        );
        gh
    }

    fn ensure_node(&mut self, node: NodeId) -> NodeIndex<usize> {
        if let Some(index) = self.node_index.get(&node) {
            return *index;
        }
        let index = self.graph.add_node(node);
        self.node_index.insert(node, index);
        index
    }

    fn add_view(&mut self, view: SegmentView) {
        let from = self.ensure_node(view.from_node());
        let to = self.ensure_node(view.to_node());
        self.graph.add_edge(
            from,
            to,
            RoadEdge {
                segment: view.id(),
                length: view.length(),
            },
        );
    }

    fn find_edge(&self, from: NodeId, to: NodeId) -> Option<petgraph::graph::EdgeIndex<usize>> {
        let from = self.node_index.get(&from)?;
        let to = self.node_index.get(&to)?;
        self.graph.find_edge(*from, *to)
    }

    /// 建图之后的拓扑, 包含为了消除平行边而截断的路段
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn inner(&self) -> &RoadDigraph {
        &self.graph
    }

    pub fn node_index(&self, node: NodeId) -> Option<NodeIndex<usize>> {
        self.node_index.get(&node).copied()
    }

    /// 根据有符号的路段编号取有向路段
    pub fn segment_view(&self, id: SegmentId) -> Option<SegmentView<'_>> {
        let segment = self.topology.segment(id.abs())?;
        if id < 0 {
            segment.reversed()
        } else {
            Some(segment.forward())
        }
    }

    pub fn short_path(&self, from: NodeId, to: NodeId) -> Result<f64> {
        use petgraph::algo::dijkstra;
        let from = self
            .node_index(from)
            .ok_or_else(|| anyhow::anyhow!("node {} not in graph", from))?;
        let to = self
            .node_index(to)
            .ok_or_else(|| anyhow::anyhow!("node {} not in graph", to))?;
        let result = dijkstra(&self.graph, from, Some(to), |e| e.weight().length);
        result
            .get(&to)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no path"))
    }
}
