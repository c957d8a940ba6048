use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use evilmsg_core::config::ServerConfig;
use evilmsg_core::db::format_timestamp;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api_error::ApiError;
use crate::builder::{BeaconBuilder, BeaconFlavor};
use crate::gate::IngestionGate;
use crate::project_id::parse_project_id;
use crate::storage::{AppDatabase, Hit, Project, ProjectStatus};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: AppDatabase,
    pub gate: IngestionGate,
    pub builder: Arc<BeaconBuilder>,
}

impl AppState {
    pub fn new(db: AppDatabase, builder: BeaconBuilder) -> Self {
        Self {
            gate: IngestionGate::new(db.clone()),
            db,
            builder: Arc::new(builder),
        }
    }
}

/// Assemble the API router with CORS, request tracing and the body limit.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route(
            "/api/projects",
            get(list_projects).put(create_project).delete(delete_project),
        )
        .route("/api/projects/{id}", get(get_project).patch(stop_project))
        .route("/api/hit/{id}", get(list_hits).post(ingest_hit))
        .route("/api/agent/{flavor}/raw/{id}", get(download_beacon))
        .layer(DefaultBodyLimit::max(config.max_hit_bytes))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|_| warn!(origin = %origin, "Ignoring invalid CORS origin"))
                .ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::HEAD,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ACCEPT,
            header::ACCEPT_ENCODING,
            header::ACCEPT_LANGUAGE,
        ])
        .allow_credentials(true)
}

/// Project as rendered on the wire.
#[derive(Debug, Serialize)]
pub struct ProjectView {
    pub id: i64,
    pub name: String,
    pub status: ProjectStatus,
    pub time_created: String,
    pub time_stopped: Option<String>,
}

impl From<Project> for ProjectView {
    fn from(p: Project) -> Self {
        Self {
            id: p.id,
            name: p.name,
            status: p.status,
            time_created: format_timestamp(p.time_created),
            time_stopped: p.time_stopped.map(format_timestamp),
        }
    }
}

/// Hit as rendered on the wire. The payload is shown as lossy UTF-8.
#[derive(Debug, Serialize)]
pub struct HitView {
    pub id: i64,
    pub time: String,
    pub ip: String,
    pub data: String,
}

impl From<Hit> for HitView {
    fn from(h: Hit) -> Self {
        Self {
            id: h.id,
            time: format_timestamp(h.time),
            ip: h.ip,
            data: String::from_utf8_lossy(&h.data).into_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteProjectRequest {
    pub id: i64,
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// `GET /api/projects`
pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProjectView>>, ApiError> {
    let projects = state.db.list_projects().await?;
    Ok(Json(projects.into_iter().map(ProjectView::from).collect()))
}

/// `PUT /api/projects`
pub async fn create_project(
    State(state): State<AppState>,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let request = json_body(payload)?;
    state.db.create_project(&request.name).await?;
    Ok(StatusCode::OK)
}

/// `DELETE /api/projects`
pub async fn delete_project(
    State(state): State<AppState>,
    payload: Result<Json<DeleteProjectRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let request = json_body(payload)?;
    if request.id <= 0 {
        return Err(ApiError::BadRequest("id is empty".to_string()));
    }
    state.db.delete_project(request.id).await?;
    Ok(StatusCode::OK)
}

/// `GET /api/projects/{id}`
pub async fn get_project(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<ProjectView>, ApiError> {
    let id = parse_project_id(&raw_id)?;
    let project = state.db.get_project(id).await?;
    Ok(Json(project.into()))
}

/// `PATCH /api/projects/{id}`: stop the project.
pub async fn stop_project(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_project_id(&raw_id)?;
    state.db.stop_project(id).await?;
    Ok(StatusCode::OK)
}

/// `POST /api/hit/{id}`: beacon callback.
pub async fn ingest_hit(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state
        .gate
        .ingest(&raw_id, &peer.ip().to_string(), &body)
        .await?;
    Ok(StatusCode::OK)
}

/// `GET /api/hit/{id}`
pub async fn list_hits(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Vec<HitView>>, ApiError> {
    let id = parse_project_id(&raw_id)?;
    state.db.get_project(id).await?;
    let hits = state.db.list_hits(id).await?;
    Ok(Json(hits.into_iter().map(HitView::from).collect()))
}

/// `GET /api/agent/{flavor}/raw/{id}`: build and download a beacon.
pub async fn download_beacon(
    State(state): State<AppState>,
    Path((flavor, raw_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let flavor: BeaconFlavor = flavor.parse()?;
    let id = parse_project_id(&raw_id)?;
    state.db.get_project(id).await?;

    let artifact = state.builder.build(flavor, id).await?;
    info!(
        project_id = artifact.project_id,
        %flavor,
        file_name = %artifact.file_name,
        "Serving beacon"
    );

    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response())
}
