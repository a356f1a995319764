//! Region polygons and point-in-polygon lookup.

use crate::error::{ClusterError, ClusterResult};
use serde_json::Value;

const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Coordinate reference systems the region polygons may be stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    /// Longitude/latitude in degrees
    Wgs84,
    /// Spherical (web) mercator in meters
    WebMercator,
}

impl Crs {
    pub fn parse(name: &str) -> ClusterResult<Self> {
        let normalized = name.trim().to_uppercase();
        match normalized.as_str() {
            "EPSG:4326" | "URN:OGC:DEF:CRS:OGC:1.3:CRS84" | "URN:OGC:DEF:CRS:EPSG::4326" => {
                Ok(Crs::Wgs84)
            }
            "EPSG:3857" | "EPSG:900913" | "URN:OGC:DEF:CRS:EPSG::3857" => Ok(Crs::WebMercator),
            _ => Err(ClusterError::UnsupportedCrs(name.to_string())),
        }
    }

    /// Project a longitude/latitude point into this CRS
    pub fn project(&self, longitude: f64, latitude: f64) -> (f64, f64) {
        match self {
            Crs::Wgs84 => (longitude, latitude),
            Crs::WebMercator => {
                let x = EARTH_RADIUS_M * longitude.to_radians();
                let y = EARTH_RADIUS_M
                    * (std::f64::consts::FRAC_PI_4 + latitude.to_radians() / 2.0)
                        .tan()
                        .ln();
                (x, y)
            }
        }
    }
}

/// A polygon with an exterior ring and optional holes
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub exterior: Vec<(f64, f64)>,
    pub holes: Vec<Vec<(f64, f64)>>,
}

impl Polygon {
    pub fn new(exterior: Vec<(f64, f64)>) -> Self {
        Self {
            exterior,
            holes: vec![],
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        ring_contains(&self.exterior, x, y) && !self.holes.iter().any(|h| ring_contains(h, x, y))
    }
}

/// Even-odd ray casting test
fn ring_contains(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// A named region made of one or more polygons
#[derive(Debug, Clone, PartialEq)]
pub struct RegionShape {
    pub name: String,
    pub parts: Vec<Polygon>,
}

impl RegionShape {
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.parts.iter().any(|p| p.contains(x, y))
    }
}

/// Region polygons sharing one coordinate reference system
#[derive(Debug, Clone, PartialEq)]
pub struct RegionShapes {
    pub crs: Crs,
    pub regions: Vec<RegionShape>,
}

/// Feature properties checked, in order, for the region name
const NAME_PROPERTIES: [&str; 4] = ["model_region", "IPM_Region", "region", "name"];

impl RegionShapes {
    pub fn new(crs: Crs, regions: Vec<RegionShape>) -> Self {
        Self { crs, regions }
    }

    /// Parse a GeoJSON FeatureCollection of (Multi)Polygon features
    pub fn from_geojson_str(text: &str) -> ClusterResult<Self> {
        let doc: Value = serde_json::from_str(text)
            .map_err(|e| ClusterError::invalid("region polygons", e.to_string()))?;

        let crs = match doc.pointer("/crs/properties/name").and_then(Value::as_str) {
            Some(name) => Crs::parse(name)?,
            None => Crs::Wgs84,
        };

        let features = doc
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| ClusterError::invalid("region polygons", "no features array"))?;

        let mut regions = Vec::with_capacity(features.len());
        for feature in features {
            let name = NAME_PROPERTIES
                .iter()
                .find_map(|key| feature.pointer(&format!("/properties/{}", key)))
                .and_then(Value::as_str)
                .ok_or_else(|| ClusterError::invalid("region polygons", "feature without a region name"))?;
            let geometry = feature
                .get("geometry")
                .ok_or_else(|| ClusterError::invalid("region polygons", format!("{} has no geometry", name)))?;
            regions.push(RegionShape {
                name: name.to_string(),
                parts: parse_geometry(geometry)?,
            });
        }

        Ok(Self { crs, regions })
    }

    /// Name of the first region containing a longitude/latitude point
    pub fn locate(&self, longitude: f64, latitude: f64) -> Option<&str> {
        let (x, y) = self.crs.project(longitude, latitude);
        self.regions
            .iter()
            .find(|r| r.contains(x, y))
            .map(|r| r.name.as_str())
    }
}

fn parse_ring(value: &Value) -> ClusterResult<Vec<(f64, f64)>> {
    let points = value
        .as_array()
        .ok_or_else(|| ClusterError::invalid("region polygons", "ring is not an array"))?;
    points
        .iter()
        .map(|p| match (p.get(0).and_then(Value::as_f64), p.get(1).and_then(Value::as_f64)) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(ClusterError::invalid("region polygons", "invalid coordinate")),
        })
        .collect()
}

fn parse_polygon(value: &Value) -> ClusterResult<Polygon> {
    let rings = value
        .as_array()
        .ok_or_else(|| ClusterError::invalid("region polygons", "polygon is not an array"))?;
    let mut rings = rings.iter().map(parse_ring);
    let exterior = rings
        .next()
        .ok_or_else(|| ClusterError::invalid("region polygons", "polygon without rings"))??;
    let holes = rings.collect::<ClusterResult<Vec<_>>>()?;
    Ok(Polygon { exterior, holes })
}

fn parse_geometry(geometry: &Value) -> ClusterResult<Vec<Polygon>> {
    let coordinates = geometry
        .get("coordinates")
        .ok_or_else(|| ClusterError::invalid("region polygons", "geometry without coordinates"))?;
    match geometry.get("type").and_then(Value::as_str) {
        Some("Polygon") => Ok(vec![parse_polygon(coordinates)?]),
        Some("MultiPolygon") => coordinates
            .as_array()
            .ok_or_else(|| ClusterError::invalid("region polygons", "multipolygon is not an array"))?
            .iter()
            .map(parse_polygon)
            .collect(),
        other => Err(ClusterError::invalid(
            "region polygons",
            format!("unsupported geometry type {:?}", other),
        )),
    }
}
