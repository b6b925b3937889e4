pub mod chain;
pub mod matcher;
pub mod model;
pub mod probability;
pub mod project;
pub mod shortest_path;
pub mod stream;
pub mod traj;

pub use chain::{ClusterChain, ClusterLinkNode};
pub use matcher::HmmMapMatcher;
pub use model::{MapMatchTrajectory, MatchConfig, MatchedPoint};
pub use probability::HmmProbability;
pub use project::{ProjectCluster, ProjectPoint};
pub use shortest_path::{ShortestPath, ShortestPathCalculator, ShortestPathSet};
pub use stream::StreamMatcher;
pub use traj::{GpsPoint, Trajectory, TrajectorySet};
