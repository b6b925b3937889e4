use anyhow::Result;
use geo::{coord, Coord};
use geojson::JsonObject;
use log::{debug, info};
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// 未提供时间戳时, 相邻轨迹点之间的间隔 (毫秒)
const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 1000;

/// One timestamped position sample.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsPoint {
    pub oid: String,
    pub point: Coord<f64>,
    /// epoch milliseconds
    pub time_stamp: u64,
}

impl GpsPoint {
    pub fn new(oid: impl Into<String>, point: Coord<f64>, time_stamp: u64) -> Self {
        GpsPoint {
            oid: oid.into(),
            point,
            time_stamp,
        }
    }
}

/// Observations of one moving object, ordered by time.
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    pub oid: String,
    pub points: Vec<GpsPoint>,
}

impl Trajectory {
    /// 按时间排序 (稳定排序, 相同时间保持输入顺序)
    pub fn new(oid: impl Into<String>, mut points: Vec<GpsPoint>) -> Self {
        points.sort_by_key(|p| p.time_stamp);
        Trajectory {
            oid: oid.into(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

pub struct TrajectorySet {
    pub trajs: Vec<Trajectory>,
}

impl TrajectorySet {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "geojson" | "json" => {
                info!("read geojson file {} ", path.display());
                let file = File::open(path)?;
                let reader = BufReader::new(file);
                let geojson = geojson::GeoJson::from_reader(reader)?;
                TrajectorySet::try_from(geojson)
            }
            "wkt" => {
                info!("read wkt file {} ", path.display());
                let content = fs::read_to_string(path)?;
                let wkt: wkt::Wkt<f64> = content
                    .trim()
                    .parse()
                    .map_err(|e| anyhow::anyhow!("read gps traj failed: {}", e))?;
                TrajectorySet::try_from(wkt)
            }
            _ => Err(anyhow::anyhow!(
                "gps file format not support: {}",
                path.display()
            )),
        }
    }
}

fn build_trajectory(
    oid: String,
    coords: Vec<Coord<f64>>,
    time_stamps: Option<Vec<u64>>,
) -> Result<Trajectory> {
    let time_stamps = match time_stamps {
        Some(ts) if ts.len() != coords.len() => {
            return Err(anyhow::anyhow!(
                "trajectory {} has {} points but {} timestamps",
                oid,
                coords.len(),
                ts.len()
            ))
        }
        Some(ts) => ts,
        None => (0..coords.len() as u64)
            .map(|i| i * DEFAULT_SAMPLE_INTERVAL_MS)
            .collect(),
    };
    let points = coords
        .into_iter()
        .zip(time_stamps)
        .map(|(point, time_stamp)| GpsPoint::new(oid.clone(), point, time_stamp))
        .collect();
    Ok(Trajectory::new(oid, points))
}

fn geometry_coords(geometry: geojson::Geometry) -> Result<Vec<Coord<f64>>> {
    let positions = match geometry.value {
        geojson::Value::LineString(line) => line,
        geojson::Value::MultiPoint(points) => points,
        geojson::Value::Point(point) => vec![point],
        _ => {
            return Err(anyhow::anyhow!(
                "geometry only support Point, LineString, MultiPoint"
            ))
        }
    };
    Ok(positions
        .iter()
        .map(|p| coord! { x: p[0], y: p[1] })
        .collect())
}

fn feature_oid(properties: Option<&JsonObject>, fallback: usize) -> String {
    match properties.and_then(|p| p.get("oid")) {
        Some(geojson::JsonValue::String(oid)) => oid.clone(),
        Some(value) if !value.is_null() => value.to_string(),
        _ => fallback.to_string(),
    }
}

fn feature_time_stamps(properties: Option<&JsonObject>) -> Result<Option<Vec<u64>>> {
    let Some(value) = properties.and_then(|p| p.get("timestamps")) else {
        return Ok(None);
    };
    let values = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("timestamps must be an array"))?;
    values
        .iter()
        .map(|v| {
            v.as_u64()
                .ok_or_else(|| anyhow::anyhow!("timestamp {} is not epoch milliseconds", v))
        })
        .collect::<Result<Vec<u64>>>()
        .map(Some)
}

fn feature_trajectory(feature: geojson::Feature, fallback: usize) -> Result<Trajectory> {
    let oid = feature_oid(feature.properties.as_ref(), fallback);
    let time_stamps = feature_time_stamps(feature.properties.as_ref())?;
    let geometry = feature
        .geometry
        .ok_or_else(|| anyhow::anyhow!("trajectory feature {} without geometry", oid))?;
    build_trajectory(oid, geometry_coords(geometry)?, time_stamps)
}

// 实现轨迹转换trait
impl TryFrom<geojson::GeoJson> for TrajectorySet {
    type Error = anyhow::Error;
    fn try_from(value: geojson::GeoJson) -> Result<Self, Self::Error> {
        let trajs = match value {
            geojson::GeoJson::FeatureCollection(fc) => fc
                .features
                .into_iter()
                .enumerate()
                .map(|(i, feature)| feature_trajectory(feature, i))
                .collect::<Result<Vec<_>>>()?,
            geojson::GeoJson::Feature(feature) => vec![feature_trajectory(feature, 0)?],
            geojson::GeoJson::Geometry(geom) => {
                vec![build_trajectory("0".to_string(), geometry_coords(geom)?, None)?]
            }
        };
        debug!("read {} trajectories", trajs.len());
        Ok(TrajectorySet { trajs })
    }
}

impl TryFrom<wkt::Wkt<f64>> for TrajectorySet {
    type Error = anyhow::Error;
    fn try_from(value: wkt::Wkt<f64>) -> Result<Self, Self::Error> {
        let coords: Vec<Coord<f64>> = match value.item {
            wkt::Geometry::LineString(line) => {
                line.0.iter().map(|c| coord! { x: c.x, y: c.y }).collect()
            }
            wkt::Geometry::MultiPoint(multi_points) => multi_points
                .0
                .iter()
                .filter_map(|point| point.0.as_ref())
                .map(|c| coord! { x: c.x, y: c.y })
                .collect(),
            _ => return Err(anyhow::anyhow!("wkt only support LineString, MultiPoint")),
        };
        let traj = build_trajectory("0".to_string(), coords, None)?;
        Ok(TrajectorySet { trajs: vec![traj] })
    }
}
