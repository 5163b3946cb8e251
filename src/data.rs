use crate::types::{Point, PointId, Priority, StatusFlags};
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use serde_json::{Map, Number};
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid GeoJSON: {0}")]
    Parse(#[from] geojson::Error),
    #[error("GeoJSON must be a FeatureCollection")]
    NotCollection,
}

// Properties owned by `Point` fields; everything else goes to `Point::extra`.
const MANAGED_KEYS: [&str; 7] = [
    "id",
    "priority",
    "forest",
    "watched",
    "archived",
    "remediated",
    "notes",
];

pub fn parse_collection(text: &str) -> Result<Vec<Point>, DataError> {
    let geojson: GeoJson = text.parse()?;
    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(points_from_collection(fc)),
        _ => Err(DataError::NotCollection),
    }
}

/// Converts features into points with unique ids.
///
/// `properties.id` is canonical. A root `id` is used only when the
/// properties carry none, and a disagreeing root id is overwritten on the
/// next encode. Features with a missing or duplicate id get fresh ids above
/// the current maximum, in document order. Features without point geometry
/// are dropped.
pub fn points_from_collection(collection: FeatureCollection) -> Vec<Point> {
    let mut points: Vec<Point> = Vec::with_capacity(collection.features.len());
    let mut seen: HashSet<PointId> = HashSet::new();
    let mut unassigned: Vec<usize> = Vec::new();

    for (index, feature) in collection.features.into_iter().enumerate() {
        let location = match feature.geometry.as_ref().and_then(point_location) {
            Some(location) => location,
            None => {
                warn!(index, "Skipping feature without point geometry");
                continue;
            }
        };

        let properties = feature.properties.unwrap_or_default();
        let property_id = properties.get("id").and_then(json_id);
        let root_id = feature.id.as_ref().and_then(feature_id);

        let id = match (property_id, root_id) {
            (Some(p), Some(r)) if p != r => {
                warn!(properties_id = p, root_id = r, "Feature ids disagree, keeping properties.id");
                Some(p)
            }
            (Some(p), _) => Some(p),
            (None, r) => r,
        };

        let mut point = point_from_properties(location, properties);
        match id {
            Some(id) if seen.insert(id) => point.id = id,
            Some(id) => {
                warn!(id, "Duplicate point id, reassigning");
                unassigned.push(points.len());
            }
            None => unassigned.push(points.len()),
        }
        points.push(point);
    }

    let mut next_id = successor(seen.iter().max().copied());
    for index in unassigned {
        let id = match next_id {
            Some(id) => id,
            None => lowest_free_id(|id| seen.contains(&id)),
        };
        next_id = next_id.and_then(|n| n.checked_add(1));
        seen.insert(id);
        points[index].id = id;
    }

    points
}

/// First id above `max`, or `None` once `max` is `PointId::MAX`.
pub(crate) fn successor(max: Option<PointId>) -> Option<PointId> {
    match max {
        Some(max) => max.checked_add(1),
        None => Some(1),
    }
}

/// Smallest unused id, for when nothing is left above the maximum.
pub(crate) fn lowest_free_id(is_taken: impl Fn(PointId) -> bool) -> PointId {
    // An in-memory collection cannot fill the whole id space.
    (1..=PointId::MAX).find(|&id| !is_taken(id)).unwrap_or(0)
}

fn point_location(geometry: &Geometry) -> Option<geo::Point<f64>> {
    let geometry: geo::Geometry<f64> = geometry.value.clone().try_into().ok()?;
    match geometry {
        geo::Geometry::Point(point) => Some(point),
        _ => None,
    }
}

fn json_id(value: &serde_json::Value) -> Option<PointId> {
    match value {
        serde_json::Value::Number(n) => number_id(n),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn feature_id(id: &Id) -> Option<PointId> {
    match id {
        Id::Number(n) => number_id(n),
        Id::String(s) => s.trim().parse().ok(),
    }
}

fn number_id(n: &Number) -> Option<PointId> {
    if let Some(v) = n.as_u64() {
        return PointId::try_from(v).ok();
    }
    // Ids written by a JS client may come back as 7.0
    n.as_f64()
        .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v <= PointId::MAX as f64)
        .map(|v| v as PointId)
}

fn point_from_properties(location: geo::Point<f64>, mut properties: Map<String, serde_json::Value>) -> Point {
    let flag = |props: &Map<String, serde_json::Value>, key: &str| {
        props.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    };
    let text = |props: &Map<String, serde_json::Value>, key: &str| {
        props.get(key).and_then(|v| v.as_str()).map(str::to_string)
    };

    let priority = text(&properties, "priority")
        .map(|p| Priority::parse(&p))
        .unwrap_or_else(|| Priority::Other(String::new()));
    let status = StatusFlags {
        watched: flag(&properties, "watched"),
        archived: flag(&properties, "archived"),
        remediated: flag(&properties, "remediated"),
    };
    let forest = text(&properties, "forest").filter(|f| !f.trim().is_empty());
    let notes = text(&properties, "notes").unwrap_or_default();

    for key in MANAGED_KEYS {
        properties.remove(key);
    }

    Point {
        id: 0,
        location,
        priority,
        forest,
        status,
        notes,
        extra: properties,
    }
}

/// Encodes a point with root `id` equal to `properties.id`. Only durable
/// fields are written.
pub fn to_feature(point: &Point) -> Feature {
    let mut properties = point.extra.clone();
    properties.insert("id".to_string(), point.id.into());
    if !point.priority.as_str().is_empty() {
        properties.insert("priority".to_string(), point.priority.as_str().into());
    }
    if let Some(forest) = &point.forest {
        properties.insert("forest".to_string(), forest.as_str().into());
    }
    properties.insert("watched".to_string(), point.status.watched.into());
    properties.insert("archived".to_string(), point.status.archived.into());
    properties.insert("remediated".to_string(), point.status.remediated.into());
    properties.insert("notes".to_string(), point.notes.as_str().into());

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![point.lon(), point.lat()]))),
        id: Some(Id::Number(point.id.into())),
        properties: Some(properties),
        foreign_members: None,
    }
}

pub fn to_collection<'a>(points: impl IntoIterator<Item = &'a Point>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: points.into_iter().map(to_feature).collect(),
        foreign_members: None,
    }
}

pub fn encode_collection<'a>(points: impl IntoIterator<Item = &'a Point>) -> String {
    GeoJson::from(to_collection(points)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(points: &[Point]) -> Vec<PointId> {
        points.iter().map(|p| p.id).collect()
    }

    #[test]
    fn reads_remote_style_features() {
        let text = r#"{
            "type": "FeatureCollection",
            "name": "points_geojson",
            "features": [
                {"type": "Feature", "properties": {"id": 1, "priority": "high", "forest": "Kaingaroa"},
                 "geometry": {"type": "Point", "coordinates": [176.5, -38.6]}},
                {"type": "Feature", "properties": {"id": 2, "priority": "low", "watched": true, "notes": "crack"},
                 "geometry": {"type": "Point", "coordinates": [172.1, -42.9]}}
            ]
        }"#;

        let points = parse_collection(text).unwrap();
        assert_eq!(ids(&points), vec![1, 2]);
        assert_eq!(points[0].priority, Priority::High);
        assert_eq!(points[0].forest.as_deref(), Some("Kaingaroa"));
        assert_eq!(points[0].lon(), 176.5);
        assert!(points[1].status.watched);
        assert_eq!(points[1].notes, "crack");
    }

    #[test]
    fn properties_id_wins_over_root_id() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "id": 40, "properties": {"id": 4},
             "geometry": {"type": "Point", "coordinates": [0.0, 0.0]}},
            {"type": "Feature", "id": 9, "properties": {},
             "geometry": {"type": "Point", "coordinates": [1.0, 1.0]}}
        ]}"#;

        let points = parse_collection(text).unwrap();
        assert_eq!(ids(&points), vec![4, 9]);

        let feature = to_feature(&points[0]);
        assert_eq!(feature.id, Some(Id::Number(4.into())));
        assert_eq!(feature.properties.unwrap()["id"], serde_json::json!(4));
    }

    #[test]
    fn missing_and_duplicate_ids_are_reassigned() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"id": 3}, "geometry": {"type": "Point", "coordinates": [0, 0]}},
            {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [0, 1]}},
            {"type": "Feature", "properties": {"id": 3}, "geometry": {"type": "Point", "coordinates": [0, 2]}},
            {"type": "Feature", "properties": {"id": 7}, "geometry": {"type": "Point", "coordinates": [0, 3]}}
        ]}"#;

        let points = parse_collection(text).unwrap();
        assert_eq!(ids(&points), vec![3, 8, 9, 7]);
    }

    #[test]
    fn max_id_does_not_overflow_reassignment() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"id": 4294967294}, "geometry": {"type": "Point", "coordinates": [0, 0]}},
            {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [0, 1]}},
            {"type": "Feature", "properties": {"id": 1}, "geometry": {"type": "Point", "coordinates": [0, 2]}},
            {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [0, 3]}},
            {"type": "Feature", "properties": {"id": 1}, "geometry": {"type": "Point", "coordinates": [0, 4]}}
        ]}"#;

        let points = parse_collection(text).unwrap();
        assert_eq!(ids(&points), vec![PointId::MAX - 1, PointId::MAX, 1, 2, 3]);
    }

    #[test]
    fn non_point_geometry_is_skipped() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"id": 1},
             "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]}},
            {"type": "Feature", "properties": {"id": 2}, "geometry": null}
        ]}"#;

        assert!(parse_collection(text).unwrap().is_empty());
    }

    #[test]
    fn rejects_bare_geometry() {
        let text = r#"{"type": "Point", "coordinates": [0, 0]}"#;
        assert!(matches!(parse_collection(text), Err(DataError::NotCollection)));
        assert!(matches!(parse_collection("not json"), Err(DataError::Parse(_))));
    }

    #[test]
    fn encode_keeps_unknown_properties() {
        let text = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {"id": 5, "priority": "medium", "site": "SH2 cut"},
             "geometry": {"type": "Point", "coordinates": [175.2, -39.1]}}
        ]}"#;

        let points = parse_collection(text).unwrap();
        let again = parse_collection(&encode_collection(&points)).unwrap();
        assert_eq!(again, points);
        assert_eq!(again[0].extra["site"], serde_json::json!("SH2 cut"));
    }
}
