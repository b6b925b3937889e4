use crate::graph::{NodeId, SegmentId};
use thiserror::Error;

/// Internal consistency violations found while decoding or stitching a
/// matched path.
///
/// Noise, unreachable candidate pairs and dead-ends are ordinary outcomes
/// and never surface here.
#[derive(Debug, Error, PartialEq)]
pub enum MatchError {
    #[error("cluster {0} is missing from the chain")]
    MissingCluster(u64),
    #[error("confirmed index {index} out of range for cluster {seq} with {len} candidates")]
    ConfirmedIndexOutOfRange { seq: u64, index: usize, len: usize },
    #[error("cluster {seq} confirms predecessor {expected:?} but previous cluster confirmed {found:?}")]
    BrokenConfirmedChain {
        seq: u64,
        expected: Option<usize>,
        found: Option<usize>,
    },
    #[error("segment {from} (to node {to_node}) is not adjacent to segment {to} (from node {from_node})")]
    DisconnectedPath {
        from: SegmentId,
        to_node: NodeId,
        to: SegmentId,
        from_node: NodeId,
    },
}
