//! HMM map matching of noisy GPS trajectories onto a directed road network.
//!
//! The pipeline is: raw road polylines -> [`graph::RoadNetwork`] (spatial
//! index + weighted digraph) -> per observation candidate projection
//! ([`mm::ProjectCluster`]) -> incremental Viterbi over a
//! [`mm::ClusterChain`] -> [`mm::HmmMapMatcher`] stitching matched paths.
pub mod algorithm;
pub mod error;
pub mod graph;
pub mod mm;
pub mod utils;

pub use error::MatchError;
