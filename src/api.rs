//! Snapshot REST API handlers.
//!
//! JSON control surface over [`BackupService`] for operators and the bot's
//! command layer. Every response is wrapped in [`ApiResponse`].

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::backup::{BackupService, CaptureRequest};
use crate::error::Error;
use crate::platform::GuildConnector;
use crate::snapshot::SnapshotSummary;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: BackupService,
    pub guilds: Arc<dyn GuildConnector>,
}

// ── Request / Response Types ─────────────────────────────────────────────────

/// POST /api/snapshots/:guild_id
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureBody {
    pub name: String,
    /// Per-channel history cap; omitted captures everything.
    #[serde(default)]
    pub message_limit: Option<usize>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// GET /api/snapshots/:guild_id
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    /// Include snapshots captured from other guilds.
    #[serde(default)]
    pub all: bool,
}

/// POST /api/restore/:guild_id
#[derive(Debug, Deserialize)]
pub struct RestoreBody {
    /// Snapshot id or name.
    pub snapshot: String,
}

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            ok: true,
            data: Some(data),
            error: None,
        })
    }
}

/// HTTP status for an engine error.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::DuplicateName { .. } | Error::AlreadyInProgress(_) => StatusCode::CONFLICT,
        Error::ForeignOwnership { .. } => StatusCode::FORBIDDEN,
        Error::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            ok: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        error_response(status, &self.to_string())
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/snapshots/:guild_id",
            post(create_snapshot).get(list_snapshots),
        )
        .route(
            "/api/snapshots/:guild_id/:id_or_name",
            get(get_snapshot).delete(delete_snapshot),
        )
        .route("/api/restore/:guild_id", post(restore_snapshot))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "umbra-guild-backup",
        "version": env!("CARGO_PKG_VERSION"),
        "snapshots": state.service.store().count(),
    }))
}

/// POST /api/snapshots/:guild_id: Capture the guild into a new snapshot.
async fn create_snapshot(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    Json(body): Json<CaptureBody>,
) -> Response {
    if body.name.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Snapshot name is required");
    }

    let request = CaptureRequest {
        name: body.name,
        message_limit: body.message_limit,
        created_by: body.created_by.unwrap_or_else(|| "api".to_string()),
    };
    let guild = state.guilds.connect(&guild_id);

    match state.service.capture(guild.as_ref(), &request).await {
        Ok(snapshot) => (
            StatusCode::CREATED,
            ApiResponse::success(SnapshotSummary::from(&snapshot)),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /api/snapshots/:guild_id: Snapshot summaries, newest first.
async fn list_snapshots(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    ApiResponse::success(state.service.list(&guild_id, query.limit, query.all))
}

/// GET /api/snapshots/:guild_id/:id_or_name: Full snapshot.
async fn get_snapshot(
    State(state): State<AppState>,
    Path((guild_id, id_or_name)): Path<(String, String)>,
) -> Response {
    match state.service.read(&guild_id, &id_or_name) {
        Ok(snapshot) => ApiResponse::success(snapshot).into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /api/snapshots/:guild_id/:id_or_name: Delete a snapshot owned by the guild.
async fn delete_snapshot(
    State(state): State<AppState>,
    Path((guild_id, id_or_name)): Path<(String, String)>,
) -> Response {
    match state.service.delete(&guild_id, &id_or_name) {
        Ok(summary) => ApiResponse::success(summary).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/restore/:guild_id: Restore a snapshot into the guild.
///
/// Runs to completion before responding; progress goes to the log.
async fn restore_snapshot(
    State(state): State<AppState>,
    Path(guild_id): Path<String>,
    Json(body): Json<RestoreBody>,
) -> Response {
    let guild = state.guilds.connect(&guild_id);
    let log_guild = guild_id.clone();
    let progress = move |status: &str| {
        tracing::info!(guild_id = log_guild.as_str(), status, "[Restore] Progress");
    };

    match state
        .service
        .restore(&guild_id, guild.as_ref(), &body.snapshot, Some(&progress))
        .await
    {
        Ok(report) => ApiResponse::success(report).into_response(),
        Err(e) => e.into_response(),
    }
}
