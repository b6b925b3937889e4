use super::network::{RoadSegment, SegmentId};
use geo::Rect;
use rtree_rs::RTree;

/// 路段外包矩形的 R 树, 只按外包矩形过滤
pub struct SegmentIndex {
    rtree: RTree<2, f64, SegmentId>,
    size: usize,
}

impl SegmentIndex {
    pub fn build<'a>(segments: impl Iterator<Item = &'a RoadSegment>) -> Self {
        let mut rtree = RTree::new();
        let mut size = 0;
        for segment in segments {
            let Some(env) = segment.envelope() else {
                log::warn!("skip segment {} without envelope", segment.id());
                continue;
            };
            let rect = rtree_rs::Rect::new([env.min().x, env.min().y], [env.max().x, env.max().y]);
            rtree.insert(rect, segment.id());
            size += 1;
        }
        log::debug!("build segment rtree with {} segments", size);
        SegmentIndex { rtree, size }
    }

    // 查询bbox内的路段 返回路段编号
    pub fn query(&self, window: &Rect<f64>) -> Vec<SegmentId> {
        let bbox = rtree_rs::Rect::new(
            [window.min().x, window.min().y],
            [window.max().x, window.max().y],
        );
        let mut result = Vec::new();
        for item in self.rtree.search(bbox) {
            result.push(*item.data);
        }
        result
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}
