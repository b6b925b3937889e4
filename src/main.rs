use clap::Parser;
use log::{debug, info};
use roadmatch::graph::{RoadNetwork, RoadNetworkCache, RoadSource};
use roadmatch::mm::{HmmMapMatcher, MapMatchTrajectory, MatchConfig, StreamMatcher, TrajectorySet};
use roadmatch::utils;
use std::path::PathBuf;
use wkt::ToWkt;

#[derive(Parser, Debug)]
#[command(name = "roadmatch")]
#[command(version = "0.1")]
#[command(about = "hmm map matching of gps trajectories", long_about = None)]
struct Args {
    /// find candidate points in radius (meters), also the emission sigma
    #[arg(long, default_value_t = 50.0)]
    radius: f64,
    /// scale of the transition probability
    #[arg(long, default_value_t = 2.0)]
    beta: f64,
    /// restart decoding after a gap of this many seconds
    #[arg(long, default_value_t = 300)]
    max_time_gap: u64,
    /// network distance over straight distance ratio seen as implausible
    #[arg(long, default_value_t = 3.0)]
    implausible_ratio: f64,
    /// split segments at dangling nodes lying on other segments
    #[arg(long)]
    fix_connection: bool,
    /// feed observations one by one like a live stream
    #[arg(long)]
    stream: bool,
    /// road network path
    #[arg(short, long, value_name = "ROAD_NETWORK_FILE")]
    network_file: PathBuf,

    /// input  gps traj input
    #[arg(value_name = "GPS_TRAJ_FILE")]
    input_file: PathBuf,
}

fn main() -> anyhow::Result<()> {
    utils::log::log_init();
    let args = Args::parse();
    debug!("{:?}", args);

    let config = MatchConfig {
        search_radius: args.radius,
        beta: args.beta,
        max_time_gap_secs: args.max_time_gap,
        implausible_ratio: args.implausible_ratio,
        fix_connection: args.fix_connection,
    };

    info!("try construct road network from {}", args.network_file.display());
    let cache = RoadNetworkCache::default();
    let key = args.network_file.display().to_string();
    let network = cache.get_or_build(&key, || {
        let source = RoadSource::from_path(&args.network_file)?;
        RoadNetwork::new(source.roads, config.fix_connection)
    })?;

    let trajs = TrajectorySet::from_path(&args.input_file)?;
    info!("read {} trajectories", trajs.trajs.len());

    let matcher = HmmMapMatcher::new(&network, config.clone());
    for traj in trajs.trajs.iter() {
        let result = if args.stream {
            let mut stream = StreamMatcher::new(&network, config.clone());
            let mut result = Vec::new();
            for gps in traj.points.iter().cloned() {
                result.extend(stream.process(gps)?);
            }
            result.extend(stream.finish()?);
            result
        } else {
            matcher.map_match(traj)?
        };
        report(&traj.oid, &result);
    }
    Ok(())
}

fn report(oid: &str, result: &[MapMatchTrajectory]) {
    for matched in result {
        info!(
            "{} matched {} -> {}: {}",
            oid,
            matched.start_time,
            matched.end_time,
            matched.line_string().wkt_string()
        );
    }
    if result.is_empty() {
        info!("{} has no matched path", oid);
    }
}
