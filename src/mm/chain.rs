use super::model::MatchConfig;
use super::probability::HmmProbability;
use super::project::ProjectCluster;
use super::shortest_path::{ShortestPath, ShortestPathCalculator};
use crate::algorithm;
use crate::error::MatchError;
use crate::graph::{NodeId, RoadNetwork};
use log::{debug, trace};
use std::collections::{BTreeSet, VecDeque};

/// 投影点簇的链表节点
#[derive(Debug)]
pub struct ClusterLinkNode<'a> {
    pub cluster: ProjectCluster<'a>,
    prev: Option<u64>,
    next: Option<u64>,
}

impl<'a> ClusterLinkNode<'a> {
    pub fn prev(&self) -> Option<u64> {
        self.prev
    }

    pub fn next(&self) -> Option<u64> {
        self.next
    }
}

/// 投影点簇链表, 节点按递增的序号存放, 已输出的前缀可以整体丢弃
#[derive(Debug, Default)]
pub struct ClusterChain<'a> {
    nodes: VecDeque<ClusterLinkNode<'a>>,
    base: u64,
}

struct Transition<'p, 'a> {
    prev_index: usize,
    metric: f64,
    path: Option<&'p ShortestPath<'a>>,
    graph_distance: f64,
    linear_distance: f64,
}

impl<'a> ClusterChain<'a> {
    /// 追加到链表尾部, 返回新节点的序号
    pub fn connect(&mut self, cluster: ProjectCluster<'a>) -> u64 {
        let seq = self.base + self.nodes.len() as u64;
        let prev = self.last_seq();
        if let Some(last) = self.nodes.back_mut() {
            last.next = Some(seq);
        }
        self.nodes.push_back(ClusterLinkNode {
            cluster,
            prev,
            next: None,
        });
        seq
    }

    fn position(&self, seq: u64) -> Option<usize> {
        let offset = seq.checked_sub(self.base)?;
        let offset = usize::try_from(offset).ok()?;
        (offset < self.nodes.len()).then_some(offset)
    }

    pub fn get(&self, seq: u64) -> Option<&ClusterLinkNode<'a>> {
        self.nodes.get(self.position(seq)?)
    }

    pub fn get_mut(&mut self, seq: u64) -> Option<&mut ClusterLinkNode<'a>> {
        let position = self.position(seq)?;
        self.nodes.get_mut(position)
    }

    pub fn first_seq(&self) -> Option<u64> {
        (!self.nodes.is_empty()).then_some(self.base)
    }

    pub fn last_seq(&self) -> Option<u64> {
        (!self.nodes.is_empty()).then(|| self.base + self.nodes.len() as u64 - 1)
    }

    pub fn prev_of(&self, seq: u64) -> Option<u64> {
        self.get(seq)?.prev
    }

    pub fn next_of(&self, seq: u64) -> Option<u64> {
        self.get(seq)?.next
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 丢弃 `seq` 之前的所有节点, `seq` 成为新的链表头
    pub fn detach_before(&mut self, seq: u64) {
        while self.base < seq && !self.nodes.is_empty() {
            self.nodes.pop_front();
            self.base += 1;
        }
        if let Some(head) = self.nodes.front_mut() {
            head.prev = None;
        }
    }

    fn cluster(&self, seq: u64) -> Result<&ProjectCluster<'a>, MatchError> {
        self.get(seq)
            .map(|node| &node.cluster)
            .ok_or(MatchError::MissingCluster(seq))
    }

    fn cluster_mut(&mut self, seq: u64) -> Result<&mut ProjectCluster<'a>, MatchError> {
        self.get_mut(seq)
            .map(|node| &mut node.cluster)
            .ok_or(MatchError::MissingCluster(seq))
    }

    /// 对序号为 `seq` 的投影点簇做一步维特比计算
    pub fn map_match(
        &mut self,
        seq: u64,
        network: &'a RoadNetwork,
        probability: &HmmProbability,
        config: &MatchConfig,
    ) -> Result<(), MatchError> {
        let current = self.cluster(seq)?;
        let emissions: Vec<f64> = current
            .points
            .iter()
            .map(|p| probability.emission(p.project_distance))
            .collect();

        let prev_seq = match self.prev_of(seq) {
            Some(prev_seq) => {
                let prev = self.cluster(prev_seq)?;
                let gap_secs = current.gps.time_stamp.abs_diff(prev.gps.time_stamp) / 1000;
                if gap_secs < config.max_time_gap_secs {
                    Some(prev_seq)
                } else {
                    debug!("time gap {}s before cluster {}, restart", gap_secs, seq);
                    None
                }
            }
            None => None,
        };
        let Some(prev_seq) = prev_seq else {
            // 前置点为空，或者前后两GPS的时间差过大时，初始概率值为发射概率
            let current = self.cluster_mut(seq)?;
            current.is_stuck = true;
            for (point, emission) in current.points.iter_mut().zip(emissions) {
                point.set_metric(emission);
            }
            return Ok(());
        };

        let prev = self.cluster(prev_seq)?;
        let sources: BTreeSet<NodeId> = prev.points.iter().map(|p| p.segment.to_node()).collect();
        let sinks: BTreeSet<NodeId> = current
            .points
            .iter()
            .map(|p| p.segment.from_node())
            .collect();
        let paths = ShortestPathCalculator::new(network.graph()).calculate(&sources, &sinks);

        let mut transitions: Vec<Option<Transition>> = Vec::with_capacity(current.points.len());
        for (point, emission) in current.points.iter().zip(&emissions) {
            let mut best: Option<Transition> = None;
            let mut best_metric = f64::NEG_INFINITY;
            for (prev_index, prev_point) in prev.points.iter().enumerate() {
                let prev_remaining = prev_point.segment.length() - prev_point.offset;
                let (graph_distance, path) = if prev_point.on_same_segment_and_before(point) {
                    (point.offset - prev_point.offset, None)
                } else if prev_point.segment.to_node() == point.segment.from_node() {
                    (prev_remaining + point.offset, None)
                } else {
                    match paths.get(prev_point.segment.to_node(), point.segment.from_node()) {
                        Some(path) => (path.length + prev_remaining + point.offset, Some(path)),
                        None => continue,
                    }
                };
                let linear_distance = algorithm::distance_m(prev_point.point, point.point);
                let metric = prev_point.metric()
                    + emission
                    + probability.transition(graph_distance, linear_distance);
                if metric > best_metric {
                    best_metric = metric;
                    best = Some(Transition {
                        prev_index,
                        metric,
                        path,
                        graph_distance,
                        linear_distance,
                    });
                }
            }
            transitions.push(best);
        }

        let connected = transitions.iter().filter(|t| t.is_some()).count();
        trace!(
            "cluster {}: {} of {} candidates connected",
            seq,
            connected,
            transitions.len()
        );
        let updates: Vec<Option<(usize, f64, Vec<_>, bool)>> = transitions
            .into_iter()
            .map(|t| {
                t.map(|t| {
                    // 路网距离是直线距离的数倍以上，标记为异常
                    let implausible =
                        t.graph_distance / t.linear_distance > config.implausible_ratio;
                    let segments = t.path.map(|p| p.segments.clone()).unwrap_or_default();
                    (t.prev_index, t.metric, segments, !implausible)
                })
            })
            .collect();

        let current = self.cluster_mut(seq)?;
        if connected == 0 {
            // 与前置GPS点的任意两个投影点之间都不连通
            debug!("cluster {} is a dead-end", seq);
            current.is_stuck = true;
            for (point, emission) in current.points.iter_mut().zip(emissions) {
                point.set_metric(emission);
            }
            return Ok(());
        }

        current.is_stuck = false;
        let points = std::mem::take(&mut current.points);
        let mut prev_indexes = BTreeSet::new();
        for (mut point, update) in points.into_iter().zip(updates) {
            if let Some((prev_index, metric, segments, normal)) = update {
                point.set_transition(prev_index, metric, segments, normal);
                prev_indexes.insert(prev_index);
                current.points.push(point);
            }
        }
        if prev_indexes.len() == 1 {
            let must_pass = prev_indexes.into_iter().next();
            self.cluster_mut(prev_seq)?.must_pass_index = must_pass;
        }
        Ok(())
    }
}
