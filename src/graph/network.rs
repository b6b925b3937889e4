use super::graph::RoadGraph;
use super::index::SegmentIndex;
use crate::algorithm;
use anyhow::Result;
use geo::{BoundingRect, Coord, Intersects, LineString, Rect};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
/**
 * @file network.rs
 * 定义路网信息结构体
 * 路段按坐标合并端点形成节点, 图结构和空间索引在首次使用时构建。
 */

pub type NodeId = u32;
/// 路段编号: 双向路段的反向路段使用相反数
pub type SegmentId = i32;

/// tolerance (degrees) used when deciding that a node lies on a segment
const ON_SEGMENT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Dual,     // 双向
    Forward,  // 正向
    Backward, // 逆向
    Unknown,  // 未知
}

impl TryFrom<i64> for Direction {
    type Error = anyhow::Error;
    fn try_from(code: i64) -> std::result::Result<Self, Self::Error> {
        match code {
            1 => Ok(Direction::Dual),
            2 => Ok(Direction::Forward),
            3 => Ok(Direction::Backward),
            4 => Ok(Direction::Unknown),
            _ => Err(anyhow::anyhow!("unknown road direction code {}", code)),
        }
    }
}

/// A road polyline as it comes from the data source, before ids and nodes
/// are assigned.
#[derive(Debug, Clone)]
pub struct RawRoad {
    pub line: LineString<f64>,
    pub direction: Direction,
}

impl RawRoad {
    pub fn new(line: LineString<f64>, direction: Direction) -> Self {
        RawRoad { line, direction }
    }
}

#[derive(Debug, Clone)]
pub struct RoadNode {
    pub id: NodeId,
    pub point: Coord<f64>,
    pub in_count: u32,
    pub out_count: u32,
}

/// 路段: 只会是正向路段或者双向路段
#[derive(Debug, Clone)]
pub struct RoadSegment {
    id: SegmentId,
    line: LineString<f64>,
    dual: bool,
    from: NodeId,
    to: NodeId,
    cumulative: Vec<f64>, // 每个顶点到起点的累积距离
}

impl RoadSegment {
    fn new(id: SegmentId, coords: Vec<Coord<f64>>, dual: bool, from: NodeId, to: NodeId) -> Self {
        let cumulative = algorithm::cumulative_distance(&coords);
        RoadSegment {
            id,
            line: LineString::from(coords),
            dual,
            from,
            to,
            cumulative,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn is_dual(&self) -> bool {
        self.dual
    }

    pub fn from_node(&self) -> NodeId {
        self.from
    }

    pub fn to_node(&self) -> NodeId {
        self.to
    }

    pub fn coords(&self) -> &[Coord<f64>] {
        &self.line.0
    }

    pub fn line(&self) -> &LineString<f64> {
        &self.line
    }

    pub fn length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    pub fn distance_from_start(&self, index: usize) -> f64 {
        self.cumulative[index]
    }

    /// 路段的外包矩形, 空路段没有外包矩形
    pub fn envelope(&self) -> Option<Rect<f64>> {
        self.line.bounding_rect()
    }

    pub fn intersects(&self, window: &Rect<f64>) -> bool {
        self.line.intersects(window)
    }

    pub fn forward(&self) -> SegmentView<'_> {
        SegmentView {
            segment: self,
            reversed: false,
        }
    }

    /// 双向路段的反向路段, 与原路段共享坐标和累积距离
    pub fn reversed(&self) -> Option<SegmentView<'_>> {
        if self.dual {
            Some(SegmentView {
                segment: self,
                reversed: true,
            })
        } else {
            None
        }
    }
}

/// A road segment in one travel direction.
///
/// The reversed view of a dual segment swaps the node roles, reads the
/// coordinates back to front and measures offsets from the other end.
#[derive(Debug, Clone, Copy)]
pub struct SegmentView<'a> {
    segment: &'a RoadSegment,
    reversed: bool,
}

impl<'a> SegmentView<'a> {
    pub fn id(&self) -> SegmentId {
        if self.reversed {
            -self.segment.id
        } else {
            self.segment.id
        }
    }

    pub fn base(&self) -> &'a RoadSegment {
        self.segment
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn from_node(&self) -> NodeId {
        if self.reversed {
            self.segment.to
        } else {
            self.segment.from
        }
    }

    pub fn to_node(&self) -> NodeId {
        if self.reversed {
            self.segment.from
        } else {
            self.segment.to
        }
    }

    pub fn num_points(&self) -> usize {
        self.segment.line.0.len()
    }

    pub fn coord(&self, n: usize) -> Coord<f64> {
        if self.reversed {
            self.segment.line.0[self.num_points() - n - 1]
        } else {
            self.segment.line.0[n]
        }
    }

    pub fn coords(&self) -> impl Iterator<Item = Coord<f64>> + 'a {
        let view = *self;
        (0..view.num_points()).map(move |n| view.coord(n))
    }

    pub fn length(&self) -> f64 {
        self.segment.length()
    }

    pub fn distance_from_start(&self, index: usize) -> f64 {
        if self.reversed {
            self.segment.length() - self.segment.distance_from_start(self.num_points() - index - 1)
        } else {
            self.segment.distance_from_start(index)
        }
    }
}

impl PartialEq for SegmentView<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

/// 节点按坐标去重时使用的键
fn coord_key(coord: Coord<f64>) -> (u64, u64) {
    // +0.0 folds -0.0 into 0.0
    ((coord.x + 0.0).to_bits(), (coord.y + 0.0).to_bits())
}

/// Mutable node/segment tables of a road network.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: BTreeMap<NodeId, RoadNode>,
    node_lookup: HashMap<(u64, u64), NodeId>,
    segments: BTreeMap<SegmentId, RoadSegment>,
    next_node_id: NodeId,
    next_segment_id: SegmentId,
}

impl Topology {
    pub fn nodes(&self) -> &BTreeMap<NodeId, RoadNode> {
        &self.nodes
    }

    pub fn segments(&self) -> &BTreeMap<SegmentId, RoadSegment> {
        &self.segments
    }

    pub fn node(&self, id: NodeId) -> Option<&RoadNode> {
        self.nodes.get(&id)
    }

    pub fn segment(&self, id: SegmentId) -> Option<&RoadSegment> {
        self.segments.get(&id)
    }

    /// 添加路段: 逆向路段反转为正向, 未知方向按双向处理
    pub fn add_road(&mut self, road: RawRoad) -> Result<SegmentId> {
        let mut coords = road.line.0;
        if coords.len() < 2 {
            return Err(anyhow::anyhow!(
                "road polyline needs at least two coordinates, got {}",
                coords.len()
            ));
        }
        let dual = match road.direction {
            Direction::Dual | Direction::Unknown => true,
            Direction::Forward => false,
            Direction::Backward => {
                coords.reverse();
                false
            }
        };
        Ok(self.add_segment(coords, dual))
    }

    fn add_segment(&mut self, coords: Vec<Coord<f64>>, dual: bool) -> SegmentId {
        let from = self.resolve_node(coords[0], dual, true);
        let to = self.resolve_node(coords[coords.len() - 1], dual, false);
        self.insert_segment(coords, dual, from, to)
    }

    fn insert_segment(
        &mut self,
        coords: Vec<Coord<f64>>,
        dual: bool,
        from: NodeId,
        to: NodeId,
    ) -> SegmentId {
        self.next_segment_id += 1;
        let id = self.next_segment_id;
        self.segments
            .insert(id, RoadSegment::new(id, coords, dual, from, to));
        id
    }

    fn resolve_node(&mut self, point: Coord<f64>, dual: bool, is_from: bool) -> NodeId {
        let key = coord_key(point);
        let id = match self.node_lookup.get(&key) {
            Some(id) => *id,
            None => {
                self.next_node_id += 1;
                let id = self.next_node_id;
                self.nodes.insert(
                    id,
                    RoadNode {
                        id,
                        point,
                        in_count: 0,
                        out_count: 0,
                    },
                );
                self.node_lookup.insert(key, id);
                id
            }
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            if dual {
                node.in_count += 1;
                node.out_count += 1;
            } else if is_from {
                node.out_count += 1;
            } else {
                node.in_count += 1;
            }
        }
        id
    }

    pub fn remove_segment(&mut self, id: SegmentId) -> Option<RoadSegment> {
        self.segments.remove(&id)
    }

    /// 在 `node` 处把路段截成两段, `index` 是 node 之前的顶点序号
    fn split_at_node(
        &mut self,
        id: SegmentId,
        node_id: NodeId,
        index: usize,
    ) -> Result<(SegmentId, SegmentId)> {
        let segment = self
            .segments
            .remove(&id)
            .ok_or_else(|| anyhow::anyhow!("segment {} not found", id))?;
        let point = self
            .nodes
            .get(&node_id)
            .map(|n| n.point)
            .ok_or_else(|| anyhow::anyhow!("node {} not found", node_id))?;

        let coords = segment.coords();
        let mut first_part: Vec<Coord<f64>> = coords[..=index].to_vec();
        if first_part.last() != Some(&point) {
            first_part.push(point);
        }
        let mut second_part = vec![point];
        second_part.extend(
            coords[index + 1..]
                .iter()
                .copied()
                .skip_while(|c| *c == point),
        );
        if second_part.len() < 2 {
            second_part.push(point);
        }

        if let Some(node) = self.nodes.get_mut(&node_id) {
            if segment.dual {
                node.in_count += 2;
                node.out_count += 2;
            } else {
                node.in_count += 1;
                node.out_count += 1;
            }
        }
        let first = self.insert_segment(first_part, segment.dual, segment.from, node_id);
        let second = self.insert_segment(second_part, segment.dual, node_id, segment.to);
        debug!(
            "split segment {} at node {} into {} and {}",
            id, node_id, first, second
        );
        Ok((first, second))
    }

    /// 一分为二: 多于两个坐标时在第二个坐标处截断, 否则在中点截断
    pub(crate) fn split_in_half(&mut self, id: SegmentId) -> Result<(SegmentId, SegmentId)> {
        let segment = self
            .segments
            .remove(&id)
            .ok_or_else(|| anyhow::anyhow!("segment {} not found", id))?;
        let coords = segment.line.0;
        let (first_part, second_part) = if coords.len() > 2 {
            (vec![coords[0], coords[1]], coords[1..].to_vec())
        } else {
            let mid = algorithm::midpoint(coords[0], coords[1]);
            (vec![coords[0], mid], vec![mid, coords[1]])
        };
        let first = self.add_segment(first_part, segment.dual);
        let second = self.add_segment(second_part, segment.dual);
        Ok((first, second))
    }

    /// 修复路网: 悬挂节点落在其它路段上时, 在该节点处截断路段使之成为真正的路口
    fn fix_connection(&mut self) -> Result<()> {
        let index = SegmentIndex::build(self.segments.values());
        let dangling: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|node| node.in_count == 0 || node.out_count == 0)
            .map(|node| node.id)
            .collect();

        // 原路段 -> 截断后的子路段
        let mut truncated: HashMap<SegmentId, Vec<SegmentId>> = HashMap::new();
        let mut split_count = 0;
        for node_id in dangling {
            let point = match self.nodes.get(&node_id) {
                Some(node) => node.point,
                None => continue,
            };
            let hits = index.query(&Rect::new(point, point));
            if hits.len() > 2 {
                continue;
            }
            for original in hits {
                let pieces = truncated
                    .get(&original)
                    .cloned()
                    .unwrap_or_else(|| vec![original]);
                let located = pieces.iter().find_map(|piece| {
                    let segment = self.segments.get(piece)?;
                    let location = algorithm::locate_point(segment.coords(), point)?;
                    (location.planar_distance <= ON_SEGMENT_TOLERANCE).then_some((
                        *piece,
                        segment.from,
                        segment.to,
                        location.index,
                    ))
                });
                let Some((piece, from, to, vertex)) = located else {
                    continue;
                };
                if from == node_id || to == node_id {
                    continue;
                }
                let (first, second) = self.split_at_node(piece, node_id, vertex)?;
                let entry = truncated.entry(original).or_insert_with(|| vec![original]);
                entry.retain(|id| *id != piece);
                entry.push(first);
                entry.push(second);
                split_count += 1;
            }
        }
        info!("fix connection split {} segments", split_count);
        Ok(())
    }
}

/// 路网对象: 根据路段的联通关系构建的图对象, 用于候选点搜索和最短路径计算
pub struct RoadNetwork {
    topology: Topology,
    graph: OnceLock<RoadGraph>,
    index: OnceLock<SegmentIndex>,
}

impl RoadNetwork {
    pub fn new(roads: Vec<RawRoad>, fix_connection: bool) -> Result<Self> {
        let mut topology = Topology::default();
        for road in roads {
            topology.add_road(road)?;
        }
        debug!(
            "node size: {}, segment size: {}",
            topology.nodes.len(),
            topology.segments.len()
        );
        if fix_connection {
            topology.fix_connection()?;
        }
        info!(
            "construct road network with {} nodes and {} segments",
            topology.nodes.len(),
            topology.segments.len()
        );
        Ok(RoadNetwork {
            topology,
            graph: OnceLock::new(),
            index: OnceLock::new(),
        })
    }

    /// 路网构建完成后 (修复之后、建图之前) 的拓扑
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn graph(&self) -> &RoadGraph {
        self.graph
            .get_or_init(|| RoadGraph::build(self.topology.clone()))
    }

    fn index(&self) -> &SegmentIndex {
        self.index
            .get_or_init(|| SegmentIndex::build(self.graph().topology().segments().values()))
    }

    /// Builds graph and spatial index now instead of on first query.
    pub fn materialize(&self) {
        self.index();
    }

    /// 查询与窗口相交的路段, 按路段编号排序
    pub fn spatial_index_query(&self, window: &Rect<f64>) -> Vec<&RoadSegment> {
        let topology = self.graph().topology();
        let mut ids = self.index().query(window);
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| match topology.segment(id) {
                Some(segment) => Some(segment),
                None => {
                    warn!("segment {} in spatial index but not in graph", id);
                    None
                }
            })
            .filter(|segment| segment.intersects(window))
            .collect()
    }
}
