//! API handlers for the engine control surface

use crate::db::snapshots;
use crate::engine::{SessionStatus, TrackSummary};
use crate::error::{ApiError, ApiResult};
use crate::models::GroupState;
use crate::taxonomy;
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use fundscout_common::{GroupId, Stage, TrackId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// GET /health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: i64,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: (Utc::now() - state.startup_time).num_seconds(),
    })
}

/// GET /session/status
pub async fn session_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.engine.session_status().await)
}

/// POST /session/end response
#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    pub session_id: uuid::Uuid,
    pub completion_percentage: u8,
    pub total_events: usize,
}

/// POST /session/end
///
/// Ends the session and persists its analytics snapshot.
pub async fn end_session(State(state): State<AppState>) -> ApiResult<Json<EndSessionResponse>> {
    let snapshot = state.engine.end_session().await?;

    Ok(Json(EndSessionResponse {
        session_id: snapshot.session_id,
        completion_percentage: snapshot.completion_percentage,
        total_events: snapshot.events.len(),
    }))
}

/// POST /stage/switch request
#[derive(Debug, Deserialize)]
pub struct SwitchStageRequest {
    pub stage: String,
}

/// POST /stage/switch response
#[derive(Debug, Serialize)]
pub struct SwitchStageResponse {
    pub old_stage: Stage,
    pub new_stage: Stage,
}

/// POST /stage/switch
///
/// 409 Conflict when the target stage's prerequisite is unmet.
pub async fn switch_stage(
    State(state): State<AppState>,
    Json(request): Json<SwitchStageRequest>,
) -> ApiResult<Json<SwitchStageResponse>> {
    let stage: Stage = request.stage.parse()?;
    let transition = state.engine.switch_stage(stage).await?;

    Ok(Json(SwitchStageResponse {
        old_stage: transition.old_stage,
        new_stage: transition.new_stage,
    }))
}

/// POST /stage/complete request
#[derive(Debug, Deserialize)]
pub struct CompleteStageRequest {
    pub stage: String,
}

/// POST /stage/complete response
#[derive(Debug, Serialize)]
pub struct CompleteStageResponse {
    pub stage: Stage,
    pub newly_completed: bool,
    pub completion_percentage: u8,
}

/// POST /stage/complete
pub async fn complete_stage(
    State(state): State<AppState>,
    Json(request): Json<CompleteStageRequest>,
) -> ApiResult<Json<CompleteStageResponse>> {
    let stage: Stage = request.stage.parse()?;
    let newly_completed = state.engine.mark_stage_complete(stage).await;
    let status = state.engine.session_status().await;

    Ok(Json(CompleteStageResponse {
        stage,
        newly_completed,
        completion_percentage: status.completion_percentage,
    }))
}

/// POST /profile response
#[derive(Debug, Serialize)]
pub struct CreateProfileResponse {
    pub profile_count: usize,
}

/// POST /profile
pub async fn create_profile(
    State(state): State<AppState>,
    Json(profile): Json<Value>,
) -> Json<CreateProfileResponse> {
    let profile_count = state.engine.create_profile(profile).await;
    Json(CreateProfileResponse { profile_count })
}

/// POST /export response
#[derive(Debug, Serialize)]
pub struct RecordExportResponse {
    pub export_count: usize,
}

/// POST /export
pub async fn record_export(
    State(state): State<AppState>,
    Json(artifact): Json<Value>,
) -> Json<RecordExportResponse> {
    let export_count = state.engine.record_export(artifact).await;
    Json(RecordExportResponse { export_count })
}

/// GET /tracks
pub async fn track_states(State(state): State<AppState>) -> Json<Vec<TrackSummary>> {
    Json(state.engine.track_states().await)
}

/// Optional search parameters for track/group runs
#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub params: Option<Value>,
}

impl RunRequest {
    fn params(self) -> Value {
        self.params.unwrap_or_else(|| serde_json::json!({}))
    }
}

/// POST /tracks/run response
#[derive(Debug, Serialize)]
pub struct RunStartedResponse {
    pub started: bool,
}

/// POST /tracks/run
///
/// Launches all four discovery tracks concurrently in the background and
/// returns immediately; progress arrives on `/events`.
pub async fn run_all_tracks(
    State(state): State<AppState>,
    request: Option<Json<RunRequest>>,
) -> Json<RunStartedResponse> {
    let params = request.map(|Json(r)| r.params()).unwrap_or_else(|| serde_json::json!({}));

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let results = engine.run_all_tracks(params).await;
        tracing::info!(tracks = results.len(), "Track fan-out finished");
    });

    Json(RunStartedResponse { started: true })
}

/// POST /tracks/{track}/run response
#[derive(Debug, Serialize)]
pub struct RunTrackResponse {
    pub track: TrackId,
    pub started: bool,
}

/// POST /tracks/{track}/run
///
/// 409 Conflict when the track is already processing.
pub async fn run_track(
    State(state): State<AppState>,
    Path(track): Path<String>,
    request: Option<Json<RunRequest>>,
) -> ApiResult<Json<RunTrackResponse>> {
    let track: TrackId = track.parse()?;
    let params = request.map(|Json(r)| r.params()).unwrap_or_else(|| serde_json::json!({}));

    // Reject already-processing synchronously; the run itself is detached
    if state
        .engine
        .track_states()
        .await
        .iter()
        .any(|t| t.track == track && t.state.status == crate::models::TrackStatus::Processing)
    {
        return Err(ApiError::Conflict(format!(
            "track '{track}' is already running"
        )));
    }

    let engine = state.engine.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.run_track(track, params).await {
            tracing::warn!(track = %track, error = %e, "Track run rejected");
        }
    });

    Ok(Json(RunTrackResponse {
        track,
        started: true,
    }))
}

/// GET /groups/{group}
pub async fn group_status(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> ApiResult<Json<GroupState>> {
    let group: GroupId = group.parse()?;
    Ok(Json(state.engine.group_status(group).await))
}

/// POST /groups/{group}/start
///
/// 409 Conflict when the group is already running.
pub async fn start_group(
    State(state): State<AppState>,
    Path(group): Path<String>,
    request: Option<Json<RunRequest>>,
) -> ApiResult<Json<RunStartedResponse>> {
    let group: GroupId = group.parse()?;
    let params = request.map(|Json(r)| r.params()).unwrap_or_else(|| serde_json::json!({}));

    state.engine.start_group(group, params).await?;

    Ok(Json(RunStartedResponse { started: true }))
}

/// POST /groups/{group}/stop response
#[derive(Debug, Serialize)]
pub struct StopGroupResponse {
    pub stopped: bool,
}

/// POST /groups/{group}/stop
pub async fn stop_group(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> ApiResult<Json<StopGroupResponse>> {
    let group: GroupId = group.parse()?;
    let stopped = state.engine.stop_group(group).await;

    Ok(Json(StopGroupResponse { stopped }))
}

/// GET /analytics/report
pub async fn analytics_report(
    State(state): State<AppState>,
) -> Json<crate::analytics::AnalyticsReport> {
    Json(state.engine.analytics_report())
}

/// GET /analytics/history
pub async fn analytics_history(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<snapshots::CompletionRecord>>> {
    let history = snapshots::load_history(&state.db)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(history))
}

/// GET /taxonomy
pub async fn taxonomy_keys() -> Json<Vec<&'static str>> {
    Json(taxonomy::keys())
}

/// GET /taxonomy/{key}
pub async fn taxonomy_lookup(
    Path(key): Path<String>,
) -> ApiResult<Json<&'static taxonomy::FocusArea>> {
    taxonomy::lookup(&key)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("unknown focus area: {key}")))
}
