use crate::data;
use crate::export::{self, ExportRow};
use crate::render::{self, Bounds, HitIndex, VisualState};
use crate::types::{Flag, Point, PointId, StatusFlags, StatusUpdate};
use chrono::{DateTime, Utc};
use geojson::FeatureCollection;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// The authoritative point collection.
///
/// Points are kept in insertion order with an id index beside them. Ids
/// only ever grow: `next_id` is tracked, never recomputed from the points.
/// Once an id of `PointId::MAX` is taken, new points fill the lowest free id.
pub struct PointStore {
    points: Vec<Point>,
    index: HashMap<PointId, usize>,
    visuals: HashMap<PointId, VisualState>,
    hits: HitIndex,
    next_id: Option<PointId>,
}

impl Default for PointStore {
    fn default() -> Self {
        Self::from_points(Vec::new())
    }
}

impl PointStore {
    /// Builds a store from already-normalized points. A repeated id is a
    /// caller bug; later duplicates are dropped.
    pub fn from_points(points: Vec<Point>) -> Self {
        let mut kept = Vec::with_capacity(points.len());
        let mut index = HashMap::with_capacity(points.len());
        for point in points {
            if index.contains_key(&point.id) {
                warn!(id = point.id, "Dropping point with duplicate id");
                continue;
            }
            index.insert(point.id, kept.len());
            kept.push(point);
        }

        let next_id = data::successor(kept.iter().map(|p| p.id).max());
        let visuals = kept.iter().map(|p| (p.id, VisualState::default())).collect();
        let hits = HitIndex::build(&kept);

        Self {
            points: kept,
            index,
            visuals,
            hits,
            next_id,
        }
    }

    pub fn replace(&mut self, points: Vec<Point>) {
        *self = Self::from_points(points);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }

    pub fn get(&self, id: PointId) -> Option<&Point> {
        self.index.get(&id).map(|&i| &self.points[i])
    }

    pub fn visual(&self, id: PointId) -> VisualState {
        self.visuals.get(&id).copied().unwrap_or_default()
    }

    /// The id the next added point gets while ids above the maximum remain.
    pub fn next_id(&self) -> Option<PointId> {
        self.next_id
    }

    pub fn add_point(&mut self, lon: f64, lat: f64) -> &Point {
        let id = match self.next_id {
            Some(id) => {
                self.next_id = id.checked_add(1);
                id
            }
            None => {
                let index = &self.index;
                data::lowest_free_id(|id| index.contains_key(&id))
            }
        };

        let point = Point::custom(id, lon, lat);
        self.hits.insert(&point);
        self.visuals.insert(id, VisualState::default());
        self.index.insert(id, self.points.len());
        self.points.push(point);
        debug!(id, lon, lat, "Added point");

        &self.points[self.points.len() - 1]
    }

    /// Applies a partial status change. Returns `false` when `id` is unknown,
    /// in which case nothing changes.
    pub fn set_status(&mut self, id: PointId, update: &StatusUpdate) -> bool {
        let Some(&i) = self.index.get(&id) else {
            warn!(id, "Status update for unknown point ignored");
            return false;
        };
        update.apply(&mut self.points[i]);
        true
    }

    pub fn reset_all(&mut self) {
        for point in &mut self.points {
            point.status = StatusFlags::NONE;
            point.notes.clear();
        }
        for visual in self.visuals.values_mut() {
            *visual = VisualState::default();
        }
    }

    pub fn bulk_mark(&mut self, flag: Flag) {
        let status = StatusFlags::only(flag);
        for point in &mut self.points {
            point.status = status;
            point.notes.clear();
        }
        for visual in self.visuals.values_mut() {
            *visual = VisualState::default();
        }
    }

    pub fn start_pulse(&mut self, id: PointId, now_ms: i64) {
        if self.index.contains_key(&id) {
            self.visuals.entry(id).or_default().start_pulse(now_ms);
        }
    }

    /// Advances running pulse animations. Returns how many are still running.
    pub fn tick(&mut self, now_ms: i64) -> usize {
        self.visuals
            .values_mut()
            .filter(|v| v.is_animating())
            .map(|v| v.advance(now_ms))
            .filter(|running| *running)
            .count()
    }

    /// One row per point, all stamped with the same export time.
    pub fn export_rows(&self, exported_at: DateTime<Utc>) -> Vec<ExportRow> {
        let date = export::timestamp(exported_at);
        self.points
            .iter()
            .map(|p| ExportRow {
                id: p.id,
                status: p.status.label(),
                longitude: p.lon(),
                latitude: p.lat(),
                notes: p.notes.clone(),
                date: date.clone(),
            })
            .collect()
    }

    /// Durable fields only; pulse state is not part of it.
    pub fn snapshot(&self) -> FeatureCollection {
        data::to_collection(&self.points)
    }

    pub fn encode_snapshot(&self) -> String {
        data::encode_collection(&self.points)
    }

    /// Points tagged with `forest`, compared case-insensitively.
    pub fn filter_by_forest(&self, forest: &str) -> Vec<&Point> {
        let wanted = forest.trim();
        self.points
            .iter()
            .filter(|p| {
                p.forest
                    .as_deref()
                    .is_some_and(|f| f.trim().eq_ignore_ascii_case(wanted))
            })
            .collect()
    }

    /// Distinct forest tags, sorted.
    pub fn forests(&self) -> Vec<&str> {
        self.points
            .iter()
            .filter_map(|p| p.forest.as_deref())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        render::bounds(&self.points)
    }

    pub fn hit_test(&self, lon: f64, lat: f64, tolerance: f64) -> Option<&Point> {
        self.hits
            .nearest_within(lon, lat, tolerance)
            .and_then(|id| self.get(id))
    }
}
