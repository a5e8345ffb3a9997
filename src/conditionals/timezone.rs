//! Timezone lookup for conditional-restriction validation.
//!
//! Shapes come in as a GeoJSON FeatureCollection of (Multi)Polygons whose
//! properties carry a numeric `offset` — seconds east of UTC. Candidate
//! polygons are found through an R-tree over bounding boxes, then confirmed
//! by exact point-in-polygon. Resolving tz database names to offsets is the
//! ingestion side's concern, not ours.

use std::path::Path;

use chrono::NaiveDateTime;
use geo::{Contains, Coord, LineString, Point, Polygon};
use rstar::{RTree, RTreeObject, AABB};

use crate::error::{Result, RoadloomError};

struct TimezoneShape {
    polygon: Polygon<f64>,
    envelope: AABB<[f64; 2]>,
    offset_seconds: i32,
}

impl RTreeObject for TimezoneShape {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

pub struct TimezonePolygons {
    tree: RTree<TimezoneShape>,
}

fn ring_from_json(ring: &serde_json::Value) -> Option<LineString<f64>> {
    let coords: Vec<Coord<f64>> = ring
        .as_array()?
        .iter()
        .map(|pair| {
            let pair = pair.as_array()?;
            Some(Coord {
                x: pair.first()?.as_f64()?,
                y: pair.get(1)?.as_f64()?,
            })
        })
        .collect::<Option<_>>()?;
    Some(LineString::from(coords))
}

fn polygon_from_json(rings: &serde_json::Value) -> Option<Polygon<f64>> {
    let rings = rings.as_array()?;
    let exterior = ring_from_json(rings.first()?)?;
    let interiors: Vec<LineString<f64>> = rings
        .iter()
        .skip(1)
        .filter_map(ring_from_json)
        .collect();
    Some(Polygon::new(exterior, interiors))
}

fn envelope_of(polygon: &Polygon<f64>) -> AABB<[f64; 2]> {
    let mut min = [f64::INFINITY; 2];
    let mut max = [f64::NEG_INFINITY; 2];
    for coordinate in polygon.exterior().coords() {
        min[0] = min[0].min(coordinate.x);
        min[1] = min[1].min(coordinate.y);
        max[0] = max[0].max(coordinate.x);
        max[1] = max[1].max(coordinate.y);
    }
    AABB::from_corners(min, max)
}

impl TimezonePolygons {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| RoadloomError::invalid_input(path, format!("cannot read: {e}")))?;
        let json: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| RoadloomError::invalid_input(path, format!("invalid JSON: {e}")))?;
        Self::from_geojson(&json, path)
    }

    pub fn from_geojson(json: &serde_json::Value, path: &Path) -> Result<Self> {
        let features = json["features"].as_array().ok_or_else(|| {
            RoadloomError::invalid_input(path, "expected a GeoJSON FeatureCollection")
        })?;

        let mut shapes = Vec::new();
        for feature in features {
            let Some(offset) = feature["properties"]["offset"].as_i64() else {
                tracing::warn!("timezone feature without numeric `offset` property, skipped");
                continue;
            };
            let geometry = &feature["geometry"];
            let polygons: Vec<Polygon<f64>> = match geometry["type"].as_str() {
                Some("Polygon") => polygon_from_json(&geometry["coordinates"])
                    .into_iter()
                    .collect(),
                Some("MultiPolygon") => geometry["coordinates"]
                    .as_array()
                    .map(|list| list.iter().filter_map(polygon_from_json).collect())
                    .unwrap_or_default(),
                _ => {
                    tracing::warn!("timezone feature with unsupported geometry, skipped");
                    continue;
                }
            };
            for polygon in polygons {
                let envelope = envelope_of(&polygon);
                shapes.push(TimezoneShape {
                    polygon,
                    envelope,
                    offset_seconds: offset as i32,
                });
            }
        }

        Ok(Self {
            tree: RTree::bulk_load(shapes),
        })
    }

    /// UTC offset in seconds at a coordinate, if any shape contains it.
    pub fn offset_at(&self, lon: f64, lat: f64) -> Option<i32> {
        let probe = AABB::from_point([lon, lat]);
        self.tree
            .locate_in_envelope_intersecting(&probe)
            .find(|shape| shape.polygon.contains(&Point::new(lon, lat)))
            .map(|shape| shape.offset_seconds)
    }

    /// Civil local time for a UTC instant under the given offset.
    pub fn local_time(utc_seconds: i64, offset_seconds: i32) -> Option<NaiveDateTime> {
        chrono::DateTime::from_timestamp(utc_seconds + i64::from(offset_seconds), 0)
            .map(|dt| dt.naive_utc())
    }
}
