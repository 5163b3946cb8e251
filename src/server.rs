use crate::config::AppConfig;
use crate::export;
use crate::render;
use crate::session::{Session, SessionError};
use crate::source::PointSource;
use crate::types::{Flag, PointId, StatusUpdate};
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

pub struct AppState<S> {
    pub session: Mutex<Session<S>>,
}

impl<S> AppState<S> {
    pub fn new(session: Session<S>) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(session),
        })
    }
}

/// Every command answers with a short human-readable message for the toast.
#[derive(Serialize)]
struct Notice {
    notice: String,
}

fn notice(message: impl Into<String>) -> Json<Notice> {
    Json(Notice {
        notice: message.into(),
    })
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, notice(self.1)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        let status = match e {
            SessionError::MissingAction => StatusCode::BAD_REQUEST,
            SessionError::UnknownPoint(_) => StatusCode::NOT_FOUND,
            SessionError::Storage(_) | SessionError::Export(_) => {
                warn!(error = %e, "Command failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError(status, e.to_string())
    }
}

#[derive(Deserialize)]
pub struct ClickParams {
    lon: f64,
    lat: f64,
}

#[derive(Deserialize)]
pub struct PopupSubmit {
    action: Option<Flag>,
    #[serde(default)]
    notes: String,
}

#[derive(Deserialize)]
pub struct MarkAllParams {
    status: Flag,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn router<S: PointSource + 'static>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/api/points", get(list_points::<S>).post(add_point::<S>))
        .route("/api/style", get(layer_style))
        .route("/api/click", post(map_click::<S>))
        .route("/api/add-mode", post(toggle_add_mode::<S>))
        .route(
            "/api/points/:id/status",
            post(submit_status::<S>).patch(patch_status::<S>),
        )
        .route("/api/points/:id/series", get(point_series::<S>))
        .route("/api/points/:id/tooltip", get(point_tooltip::<S>))
        .route("/api/save", post(save::<S>))
        .route("/api/reset", post(reset::<S>))
        .route("/api/refresh", post(refresh::<S>))
        .route("/api/mark-all", post(mark_all::<S>))
        .route("/api/export.csv", get(export_csv::<S>))
        .route("/api/fly-to", get(fly_to::<S>))
        .route("/api/regional", get(regional::<S>))
        .route("/api/forests", get(list_forests::<S>))
        .route("/api/forests/:name", get(forest::<S>))
        .with_state(state)
}

/// API routes plus the map front end from `server.static_dir`.
pub fn app<S: PointSource + 'static>(config: &AppConfig, state: Arc<AppState<S>>) -> Router {
    let static_dir: PathBuf = config.server.static_dir.clone();
    router(state)
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
}

pub async fn start_server<S: PointSource + 'static>(
    config: &AppConfig,
    state: Arc<AppState<S>>,
) -> Result<()> {
    let port = config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    info!("Starting server on http://{}", addr);

    let app = app(config, state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_points<S: PointSource>(State(state): State<Arc<AppState<S>>>) -> Json<Value> {
    let mut session = state.session.lock().await;
    // Each poll is a render frame for the pulse animation.
    session.tick(now_ms());

    let store = session.store();
    let features: Vec<Value> = store
        .iter()
        .map(|point| {
            let mut feature = json!(crate::data::to_feature(point));
            let visual = store.visual(point.id);
            feature["style"] = json!(render::circle_style(point, &visual));
            feature["status"] = json!(point.status.label());
            feature["pulse"] = json!(visual.pulse);
            feature
        })
        .collect();

    Json(json!({
        "type": "FeatureCollection",
        "features": features,
        "addMode": session.add_mode(),
        "forests": store.forests(),
    }))
}

async fn add_point<S: PointSource>(
    State(state): State<Arc<AppState<S>>>,
    Json(params): Json<ClickParams>,
) -> Json<Value> {
    let mut session = state.session.lock().await;
    let point = session.add_point(params.lon, params.lat);
    Json(json!({ "id": point.id, "notice": "Point added" }))
}

async fn layer_style() -> Json<Value> {
    Json(render::layer_paint())
}

async fn map_click<S: PointSource>(
    State(state): State<Arc<AppState<S>>>,
    Json(params): Json<ClickParams>,
) -> Json<Value> {
    let mut session = state.session.lock().await;
    Json(json!(session.map_click(params.lon, params.lat)))
}

async fn toggle_add_mode<S: PointSource>(State(state): State<Arc<AppState<S>>>) -> Json<Value> {
    let mut session = state.session.lock().await;
    let enabled = session.toggle_add_mode();
    let message = if enabled {
        "Add mode enabled. Click on the map to add a point."
    } else {
        "Add mode disabled."
    };
    Json(json!({ "addMode": enabled, "notice": message }))
}

async fn submit_status<S: PointSource>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<PointId>,
    Json(form): Json<PopupSubmit>,
) -> Result<Json<Notice>, ApiError> {
    let mut session = state.session.lock().await;
    session.submit_popup(id, form.action, form.notes, now_ms())?;
    Ok(notice("Point updated"))
}

async fn patch_status<S: PointSource>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<PointId>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Notice>, ApiError> {
    let mut session = state.session.lock().await;
    if session.set_status(id, &update) {
        Ok(notice("Point updated"))
    } else {
        Err(SessionError::UnknownPoint(id).into())
    }
}

async fn point_series<S: PointSource>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<PointId>,
) -> Result<Json<Value>, ApiError> {
    let session = state.session.lock().await;
    let series = session
        .series(id)
        .ok_or(SessionError::UnknownPoint(id))?;
    Ok(Json(json!({ "id": id, "series": series })))
}

async fn point_tooltip<S: PointSource>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<PointId>,
) -> Result<Json<Value>, ApiError> {
    let session = state.session.lock().await;
    let text = session
        .tooltip(id)
        .ok_or(SessionError::UnknownPoint(id))?;
    Ok(Json(json!({ "id": id, "tooltip": text })))
}

async fn save<S: PointSource>(State(state): State<Arc<AppState<S>>>) -> Result<Json<Notice>, ApiError> {
    let mut session = state.session.lock().await;
    session.persist()?;
    Ok(notice("Session saved"))
}

async fn reset<S: PointSource>(State(state): State<Arc<AppState<S>>>) -> Json<Notice> {
    state.session.lock().await.reset_all();
    notice("All points reset to default")
}

async fn refresh<S: PointSource>(State(state): State<Arc<AppState<S>>>) -> Json<Value> {
    // The fetch runs without the lock; a slower, older fetch cannot
    // overwrite a newer one.
    let (ticket, source) = state.session.lock().await.begin_fetch();
    let result = source.fetch().await;
    let outcome = state.session.lock().await.finish_fetch(ticket, result, now_ms());
    Json(json!(outcome))
}

async fn mark_all<S: PointSource>(
    State(state): State<Arc<AppState<S>>>,
    Json(params): Json<MarkAllParams>,
) -> Json<Notice> {
    state.session.lock().await.bulk_mark(params.status);
    notice(format!("All points marked as {}", params.status.action_name()))
}

async fn export_csv<S: PointSource>(State(state): State<Arc<AppState<S>>>) -> Result<Response, ApiError> {
    let body = state.session.lock().await.export_csv(Utc::now())?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export::FILE_NAME),
            ),
        ],
        body,
    )
        .into_response())
}

async fn fly_to<S: PointSource>(State(state): State<Arc<AppState<S>>>) -> Result<Json<Value>, ApiError> {
    let session = state.session.lock().await;
    match session.fly_to_all() {
        Some(bounds) => Ok(Json(json!({ "bounds": bounds, "padding": 50, "duration": 2000 }))),
        None => Err(ApiError(StatusCode::NOT_FOUND, "No points available".to_string())),
    }
}

async fn regional<S: PointSource>(State(state): State<Arc<AppState<S>>>) -> Json<Value> {
    let view = state.session.lock().await.regional_view();
    Json(json!({
        "center": view.center,
        "zoom": view.zoom,
        "duration": 7000,
        "notice": "Regional view activated",
    }))
}

async fn list_forests<S: PointSource>(State(state): State<Arc<AppState<S>>>) -> Json<Value> {
    let session = state.session.lock().await;
    Json(json!({ "forests": session.store().forests() }))
}

async fn forest<S: PointSource>(
    State(state): State<Arc<AppState<S>>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let selection = state.session.lock().await.filter_forest(&name);
    if selection.ids.is_empty() {
        return Err(ApiError(
            StatusCode::NOT_FOUND,
            format!("No points in forest group {}", name),
        ));
    }
    Ok(Json(json!(selection)))
}
