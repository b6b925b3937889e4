use super::traj::{GpsPoint, Trajectory};
use geo::{Coord, LineString};

/**
 * 定义mm需要的一些结构体
 * */

#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// 候选点搜索半径 (米), 同时作为观测概率的标准差
    pub search_radius: f64,
    /// 转移概率的尺度参数
    pub beta: f64,
    /// 相邻观测超过这个时间间隔 (秒) 时重新开始解码
    pub max_time_gap_secs: u64,
    /// 路网距离超过直线距离的倍数时, 认为转移不合理
    pub implausible_ratio: f64,
    /// 构建路网时是否修复悬挂节点
    pub fix_connection: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            search_radius: 50.0,
            beta: 2.0,
            max_time_gap_secs: 300,
            implausible_ratio: 3.0,
            fix_connection: false,
        }
    }
}

/// A vertex of a matched path. Only projected observations carry a time.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPoint {
    pub point: Coord<f64>,
    pub time_stamp: Option<u64>,
}

/// One continuous matched sub-path.
#[derive(Debug, Clone, PartialEq)]
pub struct MapMatchTrajectory {
    pub oid: String,
    pub start_time: u64,
    pub end_time: u64,
    pub matched_path: Vec<MatchedPoint>,
}

impl MapMatchTrajectory {
    pub fn line_string(&self) -> LineString<f64> {
        self.matched_path
            .iter()
            .map(|p| p.point)
            .collect::<Vec<_>>()
            .into()
    }

    /// 将匹配结果转换为轨迹, 插值补齐路段内部顶点的时间
    ///
    /// Vertices before the first timed point take the first time, vertices
    /// after the last timed point take the last one.
    pub fn to_trajectory(&self) -> Trajectory {
        let timed: Vec<(usize, u64)> = self
            .matched_path
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.time_stamp.map(|t| (i, t)))
            .collect();

        let mut times = vec![self.start_time; self.matched_path.len()];
        if let (Some(first), Some(last)) = (timed.first(), timed.last()) {
            for time in times.iter_mut().take(first.0) {
                *time = first.1;
            }
            for time in times.iter_mut().skip(last.0) {
                *time = last.1;
            }
        }
        for pair in timed.windows(2) {
            let (i, ti) = pair[0];
            let (j, tj) = pair[1];
            times[i] = ti;
            let step = tj.saturating_sub(ti) / (j - i) as u64;
            for (k, time) in times.iter_mut().enumerate().take(j).skip(i + 1) {
                *time = ti + (k - i) as u64 * step;
            }
        }

        let points = self
            .matched_path
            .iter()
            .zip(times)
            .map(|(p, t)| GpsPoint::new(self.oid.clone(), p.point, t))
            .collect();
        Trajectory::new(self.oid.clone(), points)
    }
}
