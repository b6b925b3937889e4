use super::network::{Direction, RawRoad};
use anyhow::Result;
use geo::{coord, Coord, LineString};
use geojson::{Geometry, Value};
use log::warn;
use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Raw road polylines read from a data file.
#[derive(Debug, Clone, Default)]
pub struct RoadSource {
    pub roads: Vec<RawRoad>,
}

/// Layout of a tab separated road table whose first column is WKT.
#[derive(Debug, Clone)]
pub struct WktTableLayout {
    pub has_header: bool,
    pub direction_column: usize,
}

impl Default for WktTableLayout {
    fn default() -> Self {
        WktTableLayout {
            has_header: true,
            direction_column: 4,
        }
    }
}

impl RoadSource {
    /// geojson 文件或者以 tab 分隔的 wkt 表格
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "geojson" | "json" => {
                let file = File::open(path)?;
                let reader = BufReader::new(file);
                let geojson = geojson::GeoJson::from_reader(reader)?;
                RoadSource::try_from(geojson)
            }
            "csv" | "tsv" | "txt" => {
                let content = fs::read_to_string(path)?;
                RoadSource::from_wkt_table(&content, &WktTableLayout::default())
            }
            _ => Err(anyhow::anyhow!(
                "road network format not support: {}",
                path.display()
            )),
        }
    }

    pub fn from_wkt_table(content: &str, layout: &WktTableLayout) -> Result<Self> {
        let mut roads = Vec::new();
        let lines = content.lines().skip(usize::from(layout.has_header));
        for (row, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let attrs: Vec<&str> = line.split('\t').collect();
            let wkt: wkt::Wkt<f64> = attrs[0]
                .parse()
                .map_err(|e| anyhow::anyhow!("row {}: bad wkt: {}", row, e))?;
            // 缺少方向列时按未知处理
            let direction = match attrs.get(layout.direction_column) {
                Some(attr) => parse_direction(attr.trim())
                    .map_err(|e| anyhow::anyhow!("row {}: {}", row, e))?,
                None => Direction::Unknown,
            };
            match wkt.item {
                wkt::Geometry::LineString(line) => {
                    let coords: Vec<Coord<f64>> =
                        line.0.iter().map(|c| coord! { x: c.x, y: c.y }).collect();
                    roads.push(RawRoad::new(LineString::from(coords), direction));
                }
                wkt::Geometry::MultiLineString(lines) => {
                    for line in lines.0 {
                        let coords: Vec<Coord<f64>> =
                            line.0.iter().map(|c| coord! { x: c.x, y: c.y }).collect();
                        roads.push(RawRoad::new(LineString::from(coords), direction));
                    }
                }
                _ => return Err(anyhow::anyhow!("row {}: wkt is not a linestring", row)),
            }
        }
        Ok(RoadSource { roads })
    }
}

/// 数字编码 (1 双向, 2 正向, 3 逆向, 4 未知) 或者 F/T/B 标志, 空值为未知
fn parse_direction(attr: &str) -> Result<Direction> {
    if attr.is_empty() {
        return Ok(Direction::Unknown);
    }
    if let Ok(code) = attr.parse::<i64>() {
        return Direction::try_from(code);
    }
    match attr {
        "F" => Ok(Direction::Forward),
        "B" => Ok(Direction::Backward),
        "T" => Ok(Direction::Dual),
        _ => Err(anyhow::anyhow!("unknown road direction flag {}", attr)),
    }
}

fn feature_direction(feature: &geojson::Feature) -> Result<Direction> {
    let Some(value) = feature.properties.as_ref().and_then(|p| p.get("direction")) else {
        return Ok(Direction::Unknown);
    };
    match (value.as_i64(), value.as_str()) {
        (Some(code), _) => Direction::try_from(code),
        (None, Some(flag)) => parse_direction(flag.trim()),
        _ if value.is_null() => Ok(Direction::Unknown),
        _ => Err(anyhow::anyhow!("bad road direction property {}", value)),
    }
}

fn geometry_roads(geometry: Geometry, direction: Direction, roads: &mut Vec<RawRoad>) -> Result<()> {
    match geometry.value {
        Value::LineString(line) => {
            roads.push(RawRoad::new(to_line(&line), direction));
        }
        Value::MultiLineString(lines) => {
            for line in lines {
                roads.push(RawRoad::new(to_line(&line), direction));
            }
        }
        _ => return Err(anyhow::anyhow!("geometry is not linestring")),
    }
    Ok(())
}

fn to_line(positions: &[Vec<f64>]) -> LineString<f64> {
    positions
        .iter()
        .map(|p| coord! { x: p[0], y: p[1] })
        .collect::<Vec<_>>()
        .into()
}

impl TryFrom<geojson::GeoJson> for RoadSource {
    type Error = anyhow::Error;
    fn try_from(value: geojson::GeoJson) -> std::result::Result<Self, Self::Error> {
        let mut roads = Vec::new();
        match value {
            geojson::GeoJson::FeatureCollection(feature_collection) => {
                for feature in feature_collection.features {
                    let direction = feature_direction(&feature)?;
                    match feature.geometry {
                        Some(geometry) => geometry_roads(geometry, direction, &mut roads)?,
                        None => warn!("skip road feature without geometry"),
                    }
                }
            }
            geojson::GeoJson::Feature(feature) => {
                let direction = feature_direction(&feature)?;
                if let Some(geometry) = feature.geometry {
                    geometry_roads(geometry, direction, &mut roads)?;
                }
            }
            geojson::GeoJson::Geometry(geometry) => {
                geometry_roads(geometry, Direction::Unknown, &mut roads)?;
            }
        }
        Ok(RoadSource { roads })
    }
}
