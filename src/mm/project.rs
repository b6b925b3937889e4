use super::traj::GpsPoint;
use crate::algorithm;
use crate::graph::{RoadNetwork, RoadSegment, SegmentView};
use geo::Coord;
use log::trace;

/// 投影点: 由路段、GPS点在路段上的最近点等属性组成
#[derive(Debug, Clone)]
pub struct ProjectPoint<'a> {
    /// 投影到的有向路段
    pub segment: SegmentView<'a>,
    /// 投影到了路段的第几截
    pub segment_index: usize,
    /// 路段上与GPS最近的点
    pub point: Coord<f64>,
    /// 最近点与GPS点之间的距离 (米)
    pub project_distance: f64,
    /// 最近点沿路段到起点的距离 (米)
    pub offset: f64,
    prev_index: Option<usize>,
    metric: f64,
    path_segments: Vec<SegmentView<'a>>,
    normal: bool,
}

impl<'a> ProjectPoint<'a> {
    fn new(
        segment: SegmentView<'a>,
        segment_index: usize,
        point: Coord<f64>,
        project_distance: f64,
        offset: f64,
    ) -> Self {
        ProjectPoint {
            segment,
            segment_index,
            point,
            project_distance,
            offset,
            prev_index: None,
            metric: f64::NEG_INFINITY,
            path_segments: Vec::new(),
            normal: true,
        }
    }

    /// 计算 GPS 点在路段正方向上的投影点
    pub fn project(gps: Coord<f64>, segment: &'a RoadSegment) -> Option<Self> {
        let location = algorithm::locate_point(segment.coords(), gps)?;
        let project_distance = algorithm::distance_m(gps, location.point);
        let offset = segment.distance_from_start(location.index)
            + algorithm::distance_m(segment.coords()[location.index], location.point);
        Some(ProjectPoint::new(
            segment.forward(),
            location.index,
            location.point,
            project_distance,
            offset,
        ))
    }

    /// The same projection seen from the opposite travel direction of a
    /// dual segment.
    pub fn mirrored(&self) -> Option<Self> {
        let base = self.segment.base();
        let opposite = if self.segment.is_reversed() {
            base.forward()
        } else {
            base.reversed()?
        };
        let segment_index = opposite.num_points() - self.segment_index - 2;
        Some(ProjectPoint::new(
            opposite,
            segment_index,
            self.point,
            self.project_distance,
            self.segment.length() - self.offset,
        ))
    }

    /// 与 other 在同一个有向路段上, 并且不在 other 之后
    pub fn on_same_segment_and_before(&self, other: &ProjectPoint) -> bool {
        self.segment.id() == other.segment.id() && self.offset <= other.offset
    }

    /// 投影点到路段终点的坐标, 第一个坐标是投影点
    pub fn suffix_coordinates(&self) -> Vec<Coord<f64>> {
        let mut coords = Vec::with_capacity(self.segment.num_points() - self.segment_index);
        coords.push(self.point);
        coords.extend(self.segment.coords().skip(self.segment_index + 1));
        coords
    }

    /// 前置路段终点经最短路径到投影点的坐标, 最后一个坐标是投影点
    pub fn prefix_coordinates(&self) -> Vec<Coord<f64>> {
        let mut coords = Vec::new();
        for segment in &self.path_segments {
            // 路段的首尾坐标相同，只保留首部的即可
            coords.extend(segment.coords().take(segment.num_points() - 1));
        }
        coords.extend(self.segment.coords().take(self.segment_index + 1));
        coords.push(self.point);
        coords
    }

    pub fn prev_index(&self) -> Option<usize> {
        self.prev_index
    }

    pub fn metric(&self) -> f64 {
        self.metric
    }

    pub fn path_segments(&self) -> &[SegmentView<'a>] {
        &self.path_segments
    }

    /// 与前置投影点之间的路网距离没有超过直线距离的设定倍数
    pub fn is_normal(&self) -> bool {
        self.normal
    }

    pub(crate) fn set_metric(&mut self, metric: f64) {
        self.metric = metric;
    }

    pub(crate) fn set_transition(
        &mut self,
        prev_index: usize,
        metric: f64,
        path_segments: Vec<SegmentView<'a>>,
        normal: bool,
    ) {
        self.prev_index = Some(prev_index);
        self.metric = metric;
        self.path_segments = path_segments;
        self.normal = normal;
    }
}

/// 投影点簇：维护了一个GPS点在搜索半径内的路段上的投影点集合
#[derive(Debug, Clone)]
pub struct ProjectCluster<'a> {
    pub gps: GpsPoint,
    pub points: Vec<ProjectPoint<'a>>,
    /// 与前一个投影点簇之间没有任何一对投影点连通
    pub is_stuck: bool,
    /// 回溯时确定的投影点
    pub marked_index: Option<usize>,
    /// 下一个投影点簇的所有投影点都以它为前置投影点
    pub must_pass_index: Option<usize>,
}

impl<'a> ProjectCluster<'a> {
    pub fn new(gps: GpsPoint, points: Vec<ProjectPoint<'a>>) -> Self {
        ProjectCluster {
            gps,
            points,
            is_stuck: false,
            marked_index: None,
            must_pass_index: None,
        }
    }

    /// 必经投影点优先, 否则取概率最大的投影点 (相同时取第一个)
    pub fn best_index(&self) -> Option<usize> {
        if self.must_pass_index.is_some() {
            return self.must_pass_index;
        }
        let mut best: Option<usize> = None;
        let mut best_metric = f64::NEG_INFINITY;
        for (index, point) in self.points.iter().enumerate() {
            if point.metric > best_metric {
                best_metric = point.metric;
                best = Some(index);
            }
        }
        best.or_else(|| (!self.points.is_empty()).then_some(0))
    }

    pub fn point(&self, index: usize) -> Option<&ProjectPoint<'a>> {
        self.points.get(index)
    }

    /// 搜索 `radius` 米内的路段并投影, 没有投影点时返回 `None`
    pub fn search_candidate_point(
        gps: &GpsPoint,
        network: &'a RoadNetwork,
        radius: f64,
    ) -> Option<Self> {
        let window = algorithm::expand_window(gps.point, radius);
        let segments = network.spatial_index_query(&window);
        let mut points = Vec::with_capacity(segments.len());
        for segment in segments {
            let Some(projected) = ProjectPoint::project(gps.point, segment) else {
                continue;
            };
            if projected.project_distance > radius {
                continue;
            }
            // 如果是双向路，复制投影点
            let mirrored = projected.mirrored();
            points.push(projected);
            points.extend(mirrored);
        }
        trace!(
            "observation at {} has {} candidates",
            gps.time_stamp,
            points.len()
        );
        if points.is_empty() {
            None
        } else {
            Some(ProjectCluster::new(gps.clone(), points))
        }
    }
}
