use geo::algorithm::haversine_distance::HaversineDistance;
use geo::{coord, Closest, ClosestPoint, Coord, Line, Point, Rect};

/// 地球平均半径 (米), 与 geo 的 haversine 计算保持一致
pub const EARTH_MEAN_RADIUS_M: f64 = 6_371_008.8;

/// 两点间的半正弦距离 (米)
pub fn distance_m(from: Coord<f64>, to: Coord<f64>) -> f64 {
    Point::from(from).haversine_distance(&Point::from(to))
}

/// 计算折线每个顶点到起点的累积距离, 第一个元素总是 0
pub fn cumulative_distance(coords: &[Coord<f64>]) -> Vec<f64> {
    let mut cumulative = Vec::with_capacity(coords.len());
    let mut distance = 0.0;
    for (index, coord) in coords.iter().enumerate() {
        if index > 0 {
            distance += distance_m(coords[index - 1], *coord);
        }
        cumulative.push(distance);
    }
    cumulative
}

/// Square window of half-width `meters` around `centre`, in degrees.
///
/// The longitude extent widens with latitude; at the poles it spans the
/// whole longitude range.
pub fn expand_window(centre: Coord<f64>, meters: f64) -> Rect<f64> {
    let lat_degrees = (meters / EARTH_MEAN_RADIUS_M).to_degrees();
    let cos_lat = centre.y.to_radians().cos();
    let lon_degrees = if cos_lat.abs() < 1e-12 {
        180.0
    } else {
        (lat_degrees / cos_lat).min(180.0)
    };
    Rect::new(
        coord! { x: centre.x - lon_degrees, y: centre.y - lat_degrees },
        coord! { x: centre.x + lon_degrees, y: centre.y + lat_degrees },
    )
}

/// 线段中点
pub fn midpoint(a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
    coord! { x: (a.x + b.x) / 2.0, y: (a.y + b.y) / 2.0 }
}

/// Nearest location on a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineLocation {
    /// index of the polyline vertex preceding the location
    pub index: usize,
    /// the location itself
    pub point: Coord<f64>,
    /// planar distance in degrees, only meaningful for comparisons
    pub planar_distance: f64,
}

/// 在折线上找与 `target` 平面距离最近的点, 返回所在的线段序号
///
/// Ties keep the earliest line, so a point on an interior vertex reports
/// the line ending at that vertex.
pub fn locate_point(coords: &[Coord<f64>], target: Coord<f64>) -> Option<LineLocation> {
    match coords.len() {
        0 => None,
        1 => Some(LineLocation {
            index: 0,
            point: coords[0],
            planar_distance: planar_distance(coords[0], target),
        }),
        _ => {
            let mut best: Option<LineLocation> = None;
            for (index, pair) in coords.windows(2).enumerate() {
                let point = closest_on_line(pair[0], pair[1], target);
                let planar_distance = planar_distance(point, target);
                if best.map_or(true, |b| planar_distance < b.planar_distance) {
                    best = Some(LineLocation {
                        index,
                        point,
                        planar_distance,
                    });
                }
            }
            best
        }
    }
}

fn closest_on_line(start: Coord<f64>, end: Coord<f64>, target: Coord<f64>) -> Coord<f64> {
    match Line::new(start, end).closest_point(&Point::from(target)) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => p.0,
        // 退化为一个点的线段
        Closest::Indeterminate => start,
    }
}

fn planar_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}
