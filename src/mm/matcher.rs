use super::chain::ClusterChain;
use super::model::{MapMatchTrajectory, MatchConfig, MatchedPoint};
use super::probability::HmmProbability;
use super::project::{ProjectCluster, ProjectPoint};
use super::traj::{GpsPoint, Trajectory};
use crate::error::MatchError;
use crate::graph::RoadNetwork;
use geo::Coord;
use log::{debug, info};

/// 基于隐马尔科夫模型的轨迹地图匹配器
pub struct HmmMapMatcher<'a> {
    network: &'a RoadNetwork,
    config: MatchConfig,
    probability: HmmProbability,
}

impl<'a> HmmMapMatcher<'a> {
    pub fn new(network: &'a RoadNetwork, config: MatchConfig) -> Self {
        let probability = HmmProbability::new(config.search_radius).with_beta(config.beta);
        HmmMapMatcher {
            network,
            config,
            probability,
        }
    }

    pub fn map_match(&self, trajectory: &Trajectory) -> Result<Vec<MapMatchTrajectory>, MatchError> {
        if trajectory.len() < 2 {
            return Ok(Vec::new());
        }
        let mut chain = ClusterChain::default();
        for gps in &trajectory.points {
            self.extend_chain(&mut chain, gps)?;
        }
        // 说明所有GPS点都没找到投影点
        let Some(last) = chain.last_seq() else {
            debug!("no candidates for trajectory {}", trajectory.oid);
            return Ok(Vec::new());
        };
        let result = self.build_matched_trajectory(&trajectory.oid, &mut chain, last)?;
        info!(
            "trajectory {} with {} points matched into {} paths",
            trajectory.oid,
            trajectory.len(),
            result.len()
        );
        Ok(result)
    }

    /// 投影一个GPS点并追加到链表尾部, 没有投影点时作为噪点丢弃
    pub(crate) fn extend_chain(
        &self,
        chain: &mut ClusterChain<'a>,
        gps: &GpsPoint,
    ) -> Result<Option<u64>, MatchError> {
        let Some(cluster) =
            ProjectCluster::search_candidate_point(gps, self.network, self.config.search_radius)
        else {
            debug!("drop noise observation at {}", gps.time_stamp);
            return Ok(None);
        };
        let seq = chain.connect(cluster);
        chain.map_match(seq, self.network, &self.probability, &self.config)?;
        Ok(Some(seq))
    }

    /// 从 `last` 回溯, 标记每个投影点簇上确定的投影点, 返回链表头
    fn mark_confirmed(chain: &mut ClusterChain<'a>, last: u64) -> Result<u64, MatchError> {
        let mut prev_index: Option<usize> = None;
        let mut current = Some(last);
        let mut head = last;
        while let Some(seq) = current {
            let node = chain.get_mut(seq).ok_or(MatchError::MissingCluster(seq))?;
            let cluster = &mut node.cluster;
            let len = cluster.points.len();
            let confirmed = match prev_index {
                Some(index) => index,
                None => cluster
                    .best_index()
                    .ok_or(MatchError::ConfirmedIndexOutOfRange { seq, index: 0, len })?,
            };
            let point = cluster
                .point(confirmed)
                .ok_or(MatchError::ConfirmedIndexOutOfRange {
                    seq,
                    index: confirmed,
                    len,
                })?;
            prev_index = point.prev_index();
            cluster.marked_index = Some(confirmed);
            head = seq;
            current = node.prev();
        }
        Ok(head)
    }

    /// 从 `last` 回溯并拼接匹配路径, 遇到断路时切分
    pub fn build_matched_trajectory(
        &self,
        oid: &str,
        chain: &mut ClusterChain<'a>,
        last: u64,
    ) -> Result<Vec<MapMatchTrajectory>, MatchError> {
        let head = Self::mark_confirmed(chain, last)?;
        Self::stitch(oid, chain, head, last)
    }

    /// 按确定的投影点从 `head` 拼接到 `last`
    fn stitch(
        oid: &str,
        chain: &ClusterChain<'a>,
        head: u64,
        last: u64,
    ) -> Result<Vec<MapMatchTrajectory>, MatchError> {
        let mut result = Vec::new();
        let mut path: Vec<MatchedPoint> = Vec::new();
        let mut current = head;
        let mut start_time = chain
            .get(head)
            .ok_or(MatchError::MissingCluster(head))?
            .cluster
            .gps
            .time_stamp;
        while current != last {
            let Some(next) = chain.next_of(current) else {
                break;
            };
            let cur_cluster = &chain.get(current).ok_or(MatchError::MissingCluster(current))?.cluster;
            let next_cluster = &chain.get(next).ok_or(MatchError::MissingCluster(next))?.cluster;
            if next_cluster.is_stuck {
                if path.len() > 1 {
                    result.push(MapMatchTrajectory {
                        oid: oid.to_string(),
                        start_time,
                        end_time: cur_cluster.gps.time_stamp,
                        matched_path: std::mem::take(&mut path),
                    });
                }
                path.clear();
                start_time = next_cluster.gps.time_stamp;
            } else {
                let (cur_index, cur_point) = confirmed_point(current, cur_cluster)?;
                let (_, next_point) = confirmed_point(next, next_cluster)?;
                if next_point.prev_index() != Some(cur_index) {
                    return Err(MatchError::BrokenConfirmedChain {
                        seq: next,
                        expected: next_point.prev_index(),
                        found: Some(cur_index),
                    });
                }
                let cur_time = cur_cluster.gps.time_stamp;
                let next_time = next_cluster.gps.time_stamp;
                if cur_point.on_same_segment_and_before(next_point) {
                    push_point(&mut path, cur_point.point, Some(cur_time));
                    let segment = cur_point.segment;
                    for i in cur_point.segment_index + 1..=next_point.segment_index {
                        push_point(&mut path, segment.coord(i), None);
                    }
                    push_point(&mut path, next_point.point, Some(next_time));
                } else {
                    check_adjacent(cur_point, next_point)?;
                    for (i, coord) in cur_point.suffix_coordinates().into_iter().enumerate() {
                        push_point(&mut path, coord, (i == 0).then_some(cur_time));
                    }
                    let prefix = next_point.prefix_coordinates();
                    let last_prefix = prefix.len() - 1;
                    for (i, coord) in prefix.into_iter().enumerate() {
                        push_point(&mut path, coord, (i == last_prefix).then_some(next_time));
                    }
                }
            }
            current = next;
        }

        if path.len() > 1 {
            let end_time = chain
                .get(current)
                .ok_or(MatchError::MissingCluster(current))?
                .cluster
                .gps
                .time_stamp;
            result.push(MapMatchTrajectory {
                oid: oid.to_string(),
                start_time,
                end_time,
                matched_path: path,
            });
        }
        Ok(result)
    }
}

fn confirmed_point<'c, 'a>(
    seq: u64,
    cluster: &'c ProjectCluster<'a>,
) -> Result<(usize, &'c ProjectPoint<'a>), MatchError> {
    let index = cluster.marked_index.ok_or(MatchError::ConfirmedIndexOutOfRange {
        seq,
        index: 0,
        len: cluster.points.len(),
    })?;
    let point = cluster
        .point(index)
        .ok_or(MatchError::ConfirmedIndexOutOfRange {
            seq,
            index,
            len: cluster.points.len(),
        })?;
    Ok((index, point))
}

/// 前后两个投影点所在路段必须首尾相接 (直接相邻或者经过最短路径)
fn check_adjacent<'a>(cur: &ProjectPoint<'a>, next: &ProjectPoint<'a>) -> Result<(), MatchError> {
    let mut from = cur.segment;
    for segment in next.path_segments().iter().chain(std::iter::once(&next.segment)) {
        if from.to_node() != segment.from_node() {
            return Err(MatchError::DisconnectedPath {
                from: from.id(),
                to_node: from.to_node(),
                to: segment.id(),
                from_node: segment.from_node(),
            });
        }
        from = *segment;
    }
    Ok(())
}

/// 追加坐标, 与上一个坐标相同时只补充缺失的时间
fn push_point(path: &mut Vec<MatchedPoint>, point: Coord<f64>, time_stamp: Option<u64>) {
    if let Some(last) = path.last_mut() {
        if last.point == point {
            if last.time_stamp.is_none() {
                last.time_stamp = time_stamp;
            }
            return;
        }
    }
    path.push(MatchedPoint { point, time_stamp });
}
