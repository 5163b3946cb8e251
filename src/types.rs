use geo::Point as GeoPoint;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Map;

pub type PointId = u32;

/// Monitoring priority of a point. Drives marker color and chart baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
    Low,
    Custom,
    // Anything else the remote file carries; kept verbatim so a save round-trips it.
    Other(String),
}

impl Priority {
    pub fn parse(value: &str) -> Self {
        match value {
            "high" => Priority::High,
            "medium" => Priority::Medium,
            "low" => Priority::Low,
            "custom" => Priority::Custom,
            other => Priority::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::Custom => "custom",
            Priority::Other(s) => s,
        }
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One of the three review flags. Deserializes from the action names the
/// popup and the mark-all dropdown send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    #[serde(rename = "watch", alias = "watched")]
    Watched,
    #[serde(rename = "archive", alias = "archived")]
    Archived,
    #[serde(rename = "remediated", alias = "remediate")]
    Remediated,
}

impl Flag {
    pub fn action_name(self) -> &'static str {
        match self {
            Flag::Watched => "watch",
            Flag::Archived => "archive",
            Flag::Remediated => "remediated",
        }
    }
}

/// Exported / displayed status of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusLabel {
    None,
    Watched,
    Archived,
    Remediated,
}

impl StatusLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusLabel::None => "None",
            StatusLabel::Watched => "Watched",
            StatusLabel::Archived => "Archived",
            StatusLabel::Remediated => "Remediated",
        }
    }
}

/// Review flags of a point. Only one is expected to be set at a time, but
/// nothing here enforces it; `label` resolves conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    pub watched: bool,
    pub archived: bool,
    pub remediated: bool,
}

impl StatusFlags {
    pub const NONE: StatusFlags = StatusFlags {
        watched: false,
        archived: false,
        remediated: false,
    };

    pub fn only(flag: Flag) -> Self {
        StatusFlags {
            watched: flag == Flag::Watched,
            archived: flag == Flag::Archived,
            remediated: flag == Flag::Remediated,
        }
    }

    /// First set flag wins, in the order archived, watched, remediated.
    pub fn label(&self) -> StatusLabel {
        if self.archived {
            StatusLabel::Archived
        } else if self.watched {
            StatusLabel::Watched
        } else if self.remediated {
            StatusLabel::Remediated
        } else {
            StatusLabel::None
        }
    }
}

/// Durable record of a monitoring point. Animation state lives in
/// `render::VisualState`, keyed by the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: PointId,
    pub location: GeoPoint<f64>,
    pub priority: Priority,
    pub forest: Option<String>,
    pub status: StatusFlags,
    pub notes: String,
    /// Feature properties this crate does not interpret.
    pub extra: Map<String, serde_json::Value>,
}

impl Point {
    /// A point placed by the operator: custom priority, no status, no notes.
    pub fn custom(id: PointId, lon: f64, lat: f64) -> Self {
        Point {
            id,
            location: GeoPoint::new(lon, lat),
            priority: Priority::Custom,
            forest: None,
            status: StatusFlags::NONE,
            notes: String::new(),
            extra: Map::new(),
        }
    }

    pub fn lon(&self) -> f64 {
        self.location.x()
    }

    pub fn lat(&self) -> f64 {
        self.location.y()
    }
}

/// Partial status change. Fields left `None` are untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StatusUpdate {
    pub watched: Option<bool>,
    pub archived: Option<bool>,
    pub remediated: Option<bool>,
    pub notes: Option<String>,
}

impl StatusUpdate {
    /// Sets `flag` and clears the other two.
    pub fn exclusive(flag: Flag, notes: impl Into<String>) -> Self {
        let flags = StatusFlags::only(flag);
        StatusUpdate {
            watched: Some(flags.watched),
            archived: Some(flags.archived),
            remediated: Some(flags.remediated),
            notes: Some(notes.into()),
        }
    }

    pub fn apply(&self, point: &mut Point) {
        if let Some(watched) = self.watched {
            point.status.watched = watched;
        }
        if let Some(archived) = self.archived {
            point.status.archived = archived;
        }
        if let Some(remediated) = self.remediated {
            point.status.remediated = remediated;
        }
        if let Some(notes) = &self.notes {
            point.notes = notes.clone();
        }
    }
}
