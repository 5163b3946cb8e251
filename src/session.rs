use crate::config::{AppConfig, ViewConfig};
use crate::data;
use crate::export::{self, ExportError};
use crate::render::{self, Bounds};
use crate::series::{self, SeriesPoint};
use crate::source::{LoadError, PointSource};
use crate::storage::{KeyValueStore, StorageError, LAST_FETCH_KEY, SNAPSHOT_KEY};
use crate::store::PointStore;
use crate::types::{Flag, Point, PointId, Priority, StatusFlags, StatusUpdate};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const MISSING_ACTION_NOTICE: &str =
    "Please select an action (Watch, Archive, or Remediated) before submitting.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{}", MISSING_ACTION_NOTICE)]
    MissingAction,
    #[error("no point with id {0}")]
    UnknownPoint(PointId),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Export(#[from] ExportError),
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cooldown_ms: i64,
    pub hit_tolerance_deg: f64,
    pub view: ViewConfig,
}

impl From<&AppConfig> for SessionSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            cooldown_ms: config.storage.cooldown_ms,
            hit_tolerance_deg: config.server.hit_tolerance_deg,
            view: config.view,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOrigin {
    Snapshot,
    Remote,
    /// Remote fetch failed; an expired snapshot was used instead.
    StaleSnapshot,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub origin: LoadOrigin,
    pub points: usize,
    pub notice: Option<String>,
}

/// Handed out when a fetch starts; a result whose ticket is older than the
/// last applied one is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    Applied { points: usize },
    Superseded,
    Failed { notice: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopupInfo {
    pub id: PointId,
    pub priority: Priority,
    pub lon: f64,
    pub lat: f64,
    #[serde(flatten)]
    pub status: StatusFlags,
    pub notes: String,
}

impl From<&Point> for PopupInfo {
    fn from(point: &Point) -> Self {
        Self {
            id: point.id,
            priority: point.priority.clone(),
            lon: point.lon(),
            lat: point.lat(),
            status: point.status,
            notes: point.notes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClickOutcome {
    Added { id: PointId, notice: String },
    Popup(PopupInfo),
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForestSelection {
    pub forest: String,
    pub ids: Vec<PointId>,
    pub bounds: Option<Bounds>,
}

/// All mutable state of one running map session.
///
/// Every command takes `&mut self` and runs to completion; callers share a
/// session behind a single lock. Remote fetches can run outside that lock via
/// `begin_fetch` / `finish_fetch`.
pub struct Session<S> {
    store: PointStore,
    storage: Box<dyn KeyValueStore>,
    source: Arc<S>,
    settings: SessionSettings,
    add_mode: bool,
    issued_generation: u64,
    applied_generation: u64,
}

impl<S: PointSource> Session<S> {
    pub fn new(source: Arc<S>, storage: Box<dyn KeyValueStore>, settings: SessionSettings) -> Self {
        Self {
            store: PointStore::default(),
            storage,
            source,
            settings,
            add_mode: false,
            issued_generation: 0,
            applied_generation: 0,
        }
    }

    pub fn store(&self) -> &PointStore {
        &self.store
    }

    pub fn add_mode(&self) -> bool {
        self.add_mode
    }

    /// Startup load. A snapshot younger than the cooldown is used as-is,
    /// anything else goes to the remote source. Never fails: errors end in
    /// the expired snapshot or an empty collection plus a notice.
    pub async fn load_initial(&mut self, now_ms: i64) -> LoadReport {
        let last_fetch = self.last_fetch_ms();
        // An age that does not fit in i64 comes from a corrupt timestamp.
        let fresh = last_fetch
            .and_then(|t| now_ms.checked_sub(t))
            .is_some_and(|age| age <= self.settings.cooldown_ms);

        let snapshot = match (self.read_snapshot(), fresh) {
            (Some(points), true) => {
                self.store.replace(points);
                info!(count = self.store.len(), "Loaded saved session");
                return LoadReport {
                    origin: LoadOrigin::Snapshot,
                    points: self.store.len(),
                    notice: None,
                };
            }
            (snapshot, _) => snapshot,
        };

        let (ticket, source) = self.begin_fetch();
        let result = source.fetch().await;
        let notice = match self.finish_fetch(ticket, result, now_ms) {
            FetchOutcome::Applied { points } => {
                return LoadReport {
                    origin: LoadOrigin::Remote,
                    points,
                    notice: None,
                }
            }
            // A newer fetch already installed its points.
            FetchOutcome::Superseded => {
                return LoadReport {
                    origin: LoadOrigin::Remote,
                    points: self.store.len(),
                    notice: None,
                }
            }
            FetchOutcome::Failed { notice } => notice,
        };

        let origin = match snapshot {
            Some(points) => {
                self.store.replace(points);
                LoadOrigin::StaleSnapshot
            }
            None => {
                self.store.replace(Vec::new());
                LoadOrigin::Empty
            }
        };
        LoadReport {
            origin,
            points: self.store.len(),
            notice: Some(notice),
        }
    }

    pub fn begin_fetch(&mut self) -> (FetchTicket, Arc<S>) {
        self.issued_generation += 1;
        (
            FetchTicket {
                generation: self.issued_generation,
            },
            Arc::clone(&self.source),
        )
    }

    pub fn finish_fetch(
        &mut self,
        ticket: FetchTicket,
        result: Result<Vec<Point>, LoadError>,
        now_ms: i64,
    ) -> FetchOutcome {
        let points = match result {
            Ok(points) => points,
            Err(e) => {
                warn!(error = %e, "Error fetching point data");
                return FetchOutcome::Failed {
                    notice: "Error loading points data".to_string(),
                };
            }
        };

        if ticket.generation <= self.applied_generation {
            info!(
                generation = ticket.generation,
                applied = self.applied_generation,
                "Discarding superseded fetch result"
            );
            return FetchOutcome::Superseded;
        }

        self.applied_generation = ticket.generation;
        self.store.replace(points);
        if let Err(e) = self.storage.set(LAST_FETCH_KEY, &now_ms.to_string()) {
            warn!(error = %e, "Could not record fetch time");
        }
        info!(count = self.store.len(), "Loaded points from remote source");
        FetchOutcome::Applied {
            points: self.store.len(),
        }
    }

    /// Operator-triggered refetch. On failure the current points stay.
    pub async fn refresh(&mut self, now_ms: i64) -> FetchOutcome {
        let (ticket, source) = self.begin_fetch();
        let result = source.fetch().await;
        self.finish_fetch(ticket, result, now_ms)
    }

    fn read_snapshot(&self) -> Option<Vec<Point>> {
        let text = match self.storage.get(SNAPSHOT_KEY) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Could not read saved session");
                return None;
            }
        };
        match data::parse_collection(&text) {
            Ok(points) => Some(points),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable saved session");
                None
            }
        }
    }

    fn last_fetch_ms(&self) -> Option<i64> {
        match self.storage.get(LAST_FETCH_KEY) {
            Ok(value) => value.and_then(|v| v.trim().parse().ok()),
            Err(e) => {
                warn!(error = %e, "Could not read last fetch time");
                None
            }
        }
    }

    /// Explicit save of the current points.
    pub fn persist(&mut self) -> Result<usize, SessionError> {
        self.storage.set(SNAPSHOT_KEY, &self.store.encode_snapshot())?;
        info!(count = self.store.len(), "Session saved");
        Ok(self.store.len())
    }

    pub fn toggle_add_mode(&mut self) -> bool {
        self.add_mode = !self.add_mode;
        self.add_mode
    }

    pub fn map_click(&mut self, lon: f64, lat: f64) -> ClickOutcome {
        let hit = self
            .store
            .hit_test(lon, lat, self.settings.hit_tolerance_deg)
            .map(PopupInfo::from);

        match (self.add_mode, hit) {
            (true, None) => {
                let id = self.store.add_point(lon, lat).id;
                self.add_mode = false;
                ClickOutcome::Added {
                    id,
                    notice: "New point added. Click the point to set Watch/Archive/Remediated."
                        .to_string(),
                }
            }
            (false, Some(popup)) => ClickOutcome::Popup(popup),
            _ => ClickOutcome::Ignored,
        }
    }

    pub fn add_point(&mut self, lon: f64, lat: f64) -> &Point {
        self.store.add_point(lon, lat)
    }

    /// Popup form submission: one action plus the notes box.
    pub fn submit_popup(
        &mut self,
        id: PointId,
        action: Option<Flag>,
        notes: String,
        now_ms: i64,
    ) -> Result<(), SessionError> {
        let flag = action.ok_or(SessionError::MissingAction)?;
        if !self.store.set_status(id, &StatusUpdate::exclusive(flag, notes)) {
            return Err(SessionError::UnknownPoint(id));
        }
        if flag == Flag::Watched {
            self.store.start_pulse(id, now_ms);
        }
        Ok(())
    }

    pub fn set_status(&mut self, id: PointId, update: &StatusUpdate) -> bool {
        self.store.set_status(id, update)
    }

    pub fn tick(&mut self, now_ms: i64) -> usize {
        self.store.tick(now_ms)
    }

    pub fn reset_all(&mut self) {
        self.store.reset_all();
    }

    pub fn bulk_mark(&mut self, flag: Flag) {
        self.store.bulk_mark(flag);
    }

    pub fn export_csv(&self, now: DateTime<Utc>) -> Result<String, SessionError> {
        Ok(export::to_csv_string(&self.store.export_rows(now))?)
    }

    pub fn fly_to_all(&self) -> Option<Bounds> {
        self.store.bounds()
    }

    pub fn regional_view(&self) -> ViewConfig {
        self.settings.view
    }

    pub fn filter_forest(&self, forest: &str) -> ForestSelection {
        let points = self.store.filter_by_forest(forest);
        ForestSelection {
            forest: forest.to_string(),
            ids: points.iter().map(|p| p.id).collect(),
            bounds: render::bounds(points.iter().copied()),
        }
    }

    pub fn series(&self, id: PointId) -> Option<Vec<SeriesPoint>> {
        self.store
            .get(id)
            .map(|p| series::generate(&p.priority, p.id))
    }

    pub fn tooltip(&self, id: PointId) -> Option<String> {
        self.store.get(id).map(|p| render::tooltip(&p.status))
    }
}
