use crate::types::{Point, PointId, Priority, StatusFlags};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::MultiPoint;
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::Serialize;
use serde_json::json;

// Circle paint constants, shared with the front-end layer expression.
pub const BASE_RADIUS: f64 = 6.0;
pub const STROKE_WIDTH: f64 = 2.0;
pub const ARCHIVED_OPACITY: f64 = 0.3;

const PULSE_AMPLITUDE: f64 = 2.0;
const PULSE_PERIOD_MS: f64 = 200.0;
pub const PULSE_DURATION_MS: i64 = 2000;

/// Per-point transient render state. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualState {
    pub pulse: f64,
    animation: Option<PulseAnimation>,
}

impl Default for VisualState {
    fn default() -> Self {
        Self {
            pulse: BASE_RADIUS,
            animation: None,
        }
    }
}

impl VisualState {
    pub fn start_pulse(&mut self, now_ms: i64) {
        self.animation = Some(PulseAnimation { started_ms: now_ms });
        self.pulse = BASE_RADIUS;
    }

    /// Advances the animation to `now_ms`. Returns whether it is still running.
    pub fn advance(&mut self, now_ms: i64) -> bool {
        let Some(animation) = self.animation else {
            return false;
        };
        let elapsed = now_ms - animation.started_ms;
        self.pulse = pulse_at(elapsed);
        if elapsed >= PULSE_DURATION_MS {
            self.animation = None;
            false
        } else {
            true
        }
    }

    pub fn is_animating(&self) -> bool {
        self.animation.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PulseAnimation {
    started_ms: i64,
}

/// Radius of a freshly watched point `elapsed_ms` after it was marked.
pub fn pulse_at(elapsed_ms: i64) -> f64 {
    if !(0..PULSE_DURATION_MS).contains(&elapsed_ms) {
        return BASE_RADIUS;
    }
    BASE_RADIUS + PULSE_AMPLITUDE * (elapsed_ms as f64 / PULSE_PERIOD_MS).sin().abs()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircleStyle {
    pub radius: f64,
    pub color: &'static str,
    pub opacity: f64,
    pub stroke_color: &'static str,
    pub stroke_width: f64,
}

pub fn priority_color(priority: &Priority) -> &'static str {
    match priority {
        Priority::High => "#FF0000",
        Priority::Medium => "#FFA500",
        Priority::Low => "#008000",
        Priority::Custom => "#00FFFF",
        Priority::Other(_) => "#000000",
    }
}

pub fn circle_style(point: &Point, visual: &VisualState) -> CircleStyle {
    let status = &point.status;
    let radius = if status.watched { visual.pulse } else { BASE_RADIUS };
    let opacity = if status.archived { ARCHIVED_OPACITY } else { 1.0 };
    let (stroke_color, stroke_width) = if status.remediated {
        ("#00FF00", STROKE_WIDTH)
    } else if status.watched {
        ("#FFFFFF", STROKE_WIDTH)
    } else {
        ("transparent", 0.0)
    };

    CircleStyle {
        radius,
        color: priority_color(&point.priority),
        opacity,
        stroke_color,
        stroke_width,
    }
}

pub fn tooltip(status: &StatusFlags) -> String {
    format!("Status: {}", status.label().as_str())
}

/// Paint expressions for the circle layer, evaluated client-side against
/// feature state. Must agree with `circle_style`.
pub fn layer_paint() -> serde_json::Value {
    json!({
        "circle-radius": [
            "case",
            ["boolean", ["feature-state", "watched"], false],
            ["coalesce", ["feature-state", "pulse"], BASE_RADIUS],
            BASE_RADIUS
        ],
        "circle-color": [
            "match",
            ["get", "priority"],
            "high", priority_color(&Priority::High),
            "medium", priority_color(&Priority::Medium),
            "low", priority_color(&Priority::Low),
            "custom", priority_color(&Priority::Custom),
            "#000000"
        ],
        "circle-opacity": [
            "case",
            ["boolean", ["feature-state", "archived"], false],
            ARCHIVED_OPACITY,
            1
        ],
        "circle-stroke-color": [
            "case",
            ["boolean", ["feature-state", "remediated"], false], "#00FF00",
            ["boolean", ["feature-state", "watched"], false], "#FFFFFF",
            "transparent"
        ],
        "circle-stroke-width": [
            "case",
            ["boolean", ["feature-state", "remediated"], false], STROKE_WIDTH,
            ["boolean", ["feature-state", "watched"], false], STROKE_WIDTH,
            0
        ]
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

pub fn bounds<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Bounds> {
    let multi: MultiPoint<f64> = points.into_iter().map(|p| p.location).collect();
    let rect = multi.bounding_rect()?;
    Some(Bounds {
        west: rect.min().x,
        south: rect.min().y,
        east: rect.max().x,
        north: rect.max().y,
    })
}

// Wrapper for RTree indexing
#[derive(Debug, Clone, Copy, PartialEq)]
struct PointLocation {
    id: PointId,
    lon_lat: [f64; 2],
}

impl RTreeObject for PointLocation {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.lon_lat)
    }
}

impl PointDistance for PointLocation {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.lon_lat[0] - point[0];
        let dy = self.lon_lat[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Spatial index answering "which point did this click land on".
pub struct HitIndex {
    tree: RTree<PointLocation>,
}

impl Default for HitIndex {
    fn default() -> Self {
        Self { tree: RTree::new() }
    }
}

impl HitIndex {
    pub fn build<'a>(points: impl IntoIterator<Item = &'a Point>) -> Self {
        let items = points
            .into_iter()
            .map(|p| PointLocation {
                id: p.id,
                lon_lat: [p.lon(), p.lat()],
            })
            .collect();
        Self {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn insert(&mut self, point: &Point) {
        self.tree.insert(PointLocation {
            id: point.id,
            lon_lat: [point.lon(), point.lat()],
        });
    }

    /// Nearest point within `tolerance` degrees of the click.
    pub fn nearest_within(&self, lon: f64, lat: f64, tolerance: f64) -> Option<PointId> {
        let query = [lon, lat];
        self.tree
            .nearest_neighbor(&query)
            .filter(|hit| hit.distance_2(&query) <= tolerance * tolerance)
            .map(|hit| hit.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Flag;

    fn point(id: PointId, priority: Priority, status: StatusFlags) -> Point {
        let mut p = Point::custom(id, 174.0, -41.0);
        p.priority = priority;
        p.status = status;
        p
    }

    #[test]
    fn unreviewed_point_is_plain() {
        let style = circle_style(&point(1, Priority::Medium, StatusFlags::NONE), &VisualState::default());
        assert_eq!(
            style,
            CircleStyle {
                radius: 6.0,
                color: "#FFA500",
                opacity: 1.0,
                stroke_color: "transparent",
                stroke_width: 0.0,
            }
        );
    }

    #[test]
    fn status_drives_stroke_and_opacity() {
        let visual = VisualState::default();

        let archived = circle_style(&point(1, Priority::High, StatusFlags::only(Flag::Archived)), &visual);
        assert_eq!(archived.opacity, 0.3);
        assert_eq!(archived.stroke_width, 0.0);

        let remediated = circle_style(&point(2, Priority::Low, StatusFlags::only(Flag::Remediated)), &visual);
        assert_eq!(remediated.stroke_color, "#00FF00");
        assert_eq!(remediated.stroke_width, 2.0);

        let both = StatusFlags {
            watched: true,
            archived: false,
            remediated: true,
        };
        assert_eq!(circle_style(&point(3, Priority::Custom, both), &visual).stroke_color, "#00FF00");

        let other = circle_style(&point(4, Priority::Other("x".into()), StatusFlags::NONE), &visual);
        assert_eq!(other.color, "#000000");
    }

    #[test]
    fn watched_radius_follows_pulse() {
        let watched = point(1, Priority::High, StatusFlags::only(Flag::Watched));
        let mut visual = VisualState::default();
        visual.start_pulse(1_000);

        assert!(visual.advance(1_314));
        let style = circle_style(&watched, &visual);
        assert!(style.radius > 6.0 && style.radius <= 8.0);

        let unwatched = point(2, Priority::High, StatusFlags::NONE);
        assert_eq!(circle_style(&unwatched, &visual).radius, 6.0);

        assert!(!visual.advance(3_000));
        assert_eq!(visual.pulse, 6.0);
        assert!(!visual.is_animating());
    }

    #[test]
    fn pulse_curve_is_bounded() {
        for elapsed in (0..2_500).step_by(37) {
            let r = pulse_at(elapsed);
            assert!((6.0..=8.0).contains(&r), "radius {r} at {elapsed}");
        }
        assert_eq!(pulse_at(0), 6.0);
        assert_eq!(pulse_at(2_000), 6.0);
    }

    #[test]
    fn tooltip_uses_status_label() {
        assert_eq!(tooltip(&StatusFlags::NONE), "Status: None");
        assert_eq!(tooltip(&StatusFlags::only(Flag::Watched)), "Status: Watched");
    }

    #[test]
    fn bounds_cover_all_points() {
        let a = Point::custom(1, 172.5, -43.5);
        let b = Point::custom(2, 176.0, -38.0);

        assert_eq!(
            bounds([&a, &b]).unwrap(),
            Bounds {
                west: 172.5,
                south: -43.5,
                east: 176.0,
                north: -38.0,
            }
        );
        assert_eq!(bounds(std::iter::empty::<&Point>()), None);
    }

    #[test]
    fn hit_index_respects_tolerance() {
        let points = vec![Point::custom(1, 174.0, -41.0), Point::custom(2, 175.0, -40.0)];
        let mut index = HitIndex::build(&points);

        assert_eq!(index.nearest_within(174.01, -41.01, 0.05), Some(1));
        assert_eq!(index.nearest_within(174.5, -40.5, 0.05), None);

        index.insert(&Point::custom(3, 174.5, -40.5));
        assert_eq!(index.nearest_within(174.5, -40.5, 0.05), Some(3));
    }

    #[test]
    fn paint_document_matches_constants() {
        let paint = layer_paint();
        assert_eq!(paint["circle-color"][3], "#FF0000");
        assert_eq!(paint["circle-opacity"][2], 0.3);
    }
}
