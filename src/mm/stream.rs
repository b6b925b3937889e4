use super::chain::ClusterChain;
use super::matcher::HmmMapMatcher;
use super::model::{MapMatchTrajectory, MatchConfig};
use super::traj::GpsPoint;
use crate::error::MatchError;
use crate::graph::RoadNetwork;
use log::debug;

/// 实时轨迹的增量匹配: 遇到断路或者必经点时输出结果并释放已输出的投影点簇
///
/// 不调用 [`StreamMatcher::finish`] 直接丢弃时, 未输出的部分不再输出
pub struct StreamMatcher<'a> {
    matcher: HmmMapMatcher<'a>,
    chain: ClusterChain<'a>,
}

impl<'a> StreamMatcher<'a> {
    pub fn new(network: &'a RoadNetwork, config: MatchConfig) -> Self {
        StreamMatcher {
            matcher: HmmMapMatcher::new(network, config),
            chain: ClusterChain::default(),
        }
    }

    pub fn process(&mut self, gps: GpsPoint) -> Result<Vec<MapMatchTrajectory>, MatchError> {
        let Some(seq) = self.matcher.extend_chain(&mut self.chain, &gps)? else {
            return Ok(Vec::new());
        };
        let Some(prev) = self.chain.prev_of(seq) else {
            return Ok(Vec::new());
        };
        let current = &self
            .chain
            .get(seq)
            .ok_or(MatchError::MissingCluster(seq))?
            .cluster;
        if current.is_stuck {
            // 断路: 输出到前一个投影点簇为止, 从当前点重新开始
            let result = self
                .matcher
                .build_matched_trajectory(&gps.oid, &mut self.chain, prev)?;
            self.chain.detach_before(seq);
            debug!(
                "dead-end at {}, emit {} paths, {} clusters pending",
                gps.time_stamp,
                result.len(),
                self.chain.len()
            );
            return Ok(result);
        }

        let must_pass = self
            .chain
            .get(prev)
            .ok_or(MatchError::MissingCluster(prev))?
            .cluster
            .must_pass_index
            .is_some();
        if !must_pass {
            return Ok(Vec::new());
        }
        // 必经点之前的匹配结果不会再改变
        let result = self
            .matcher
            .build_matched_trajectory(&gps.oid, &mut self.chain, prev)?;
        self.chain.detach_before(prev);
        Ok(result)
    }

    /// 流结束时输出剩余的匹配结果
    pub fn finish(mut self) -> Result<Vec<MapMatchTrajectory>, MatchError> {
        let Some(last) = self.chain.last_seq() else {
            return Ok(Vec::new());
        };
        let oid = self
            .chain
            .get(last)
            .ok_or(MatchError::MissingCluster(last))?
            .cluster
            .gps
            .oid
            .clone();
        self.matcher
            .build_matched_trajectory(&oid, &mut self.chain, last)
    }

    /// 尚未输出的投影点簇数量
    pub fn pending(&self) -> usize {
        self.chain.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::graph::{Direction, RawRoad};
    use crate::mm::traj::Trajectory;
    use geo::{coord, LineString};

    fn network(roads: Vec<(Vec<(f64, f64)>, Direction)>) -> RoadNetwork {
        let roads = roads
            .into_iter()
            .map(|(coords, direction)| {
                let line: LineString<f64> = coords
                    .into_iter()
                    .map(|(x, y)| coord! { x: x, y: y })
                    .collect::<Vec<_>>()
                    .into();
                RawRoad::new(line, direction)
            })
            .collect();
        let network = RoadNetwork::new(roads, false).unwrap();
        network.materialize();
        network
    }

    fn gps(x: f64, y: f64, t: u64) -> GpsPoint {
        GpsPoint::new("bus", coord! { x: x, y: y }, t)
    }

    fn config() -> MatchConfig {
        MatchConfig {
            search_radius: 20.0,
            ..MatchConfig::default()
        }
    }

    #[test_log::test]
    fn test_stream_emits_behind_must_pass() {
        let network = network(vec![(
            vec![(121.0, 31.0), (121.003, 31.0)],
            Direction::Forward,
        )]);
        let observations = vec![
            gps(121.0002, 31.00002, 0),
            gps(121.0007, 30.99998, 5000),
            gps(121.0012, 31.00002, 10000),
            gps(121.0018, 30.99998, 15000),
            gps(121.0025, 31.00002, 20000),
        ];
        let mut stream = StreamMatcher::new(&network, config());
        let mut emitted = Vec::new();
        for observation in observations.iter().cloned() {
            emitted.extend(stream.process(observation).unwrap());
            assert!(stream.pending() <= 2);
        }
        assert_eq!(emitted.len(), 3);
        emitted.extend(stream.finish().unwrap());

        let spans: Vec<(u64, u64)> = emitted.iter().map(|m| (m.start_time, m.end_time)).collect();
        assert_eq!(
            spans,
            vec![(0, 5000), (5000, 10000), (10000, 15000), (15000, 20000)]
        );
        for piece in &emitted {
            assert_eq!(piece.oid, "bus");
            assert_eq!(piece.matched_path.len(), 2);
        }

        // 与整条轨迹一次匹配的结果一致
        let batch = HmmMapMatcher::new(&network, config())
            .map_match(&Trajectory::new("bus", observations))
            .unwrap();
        assert_eq!(batch.len(), 1);
        let mut streamed: Vec<_> = emitted
            .iter()
            .flat_map(|m| m.matched_path.iter().cloned())
            .collect();
        streamed.dedup();
        assert_eq!(streamed, batch[0].matched_path);
    }

    #[test_log::test]
    fn test_stream_emits_on_dead_end() {
        let network = network(vec![
            (vec![(121.0, 31.0), (121.003, 31.0)], Direction::Forward),
            (vec![(121.0, 31.0005), (121.003, 31.0005)], Direction::Forward),
        ]);
        let mut stream = StreamMatcher::new(&network, config());
        assert!(stream.process(gps(121.0005, 31.00001, 0)).unwrap().is_empty());
        assert!(stream.process(gps(121.001, 31.00001, 10000)).unwrap().is_empty());

        let emitted = stream.process(gps(121.0015, 31.00049, 20000)).unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!((emitted[0].start_time, emitted[0].end_time), (0, 10000));
        assert_eq!(stream.pending(), 1);

        assert!(stream.process(gps(121.002, 31.00049, 30000)).unwrap().is_empty());
        let rest = stream.finish().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!((rest[0].start_time, rest[0].end_time), (20000, 30000));
        assert!(rest[0].matched_path.iter().all(|p| p.point.y == 31.0005));
    }

    #[test_log::test]
    fn test_stream_ignores_noise() {
        let network = network(vec![(
            vec![(121.0, 31.0), (121.003, 31.0)],
            Direction::Forward,
        )]);
        let mut stream = StreamMatcher::new(&network, config());
        assert!(stream.process(gps(122.0, 32.0, 0)).unwrap().is_empty());
        assert_eq!(stream.pending(), 0);
        assert!(stream.process(gps(121.0005, 31.0, 1000)).unwrap().is_empty());
        assert!(stream.process(gps(121.5, 31.5, 2000)).unwrap().is_empty());
        assert_eq!(stream.pending(), 1);
        assert!(stream.finish().unwrap().is_empty());
    }
}
