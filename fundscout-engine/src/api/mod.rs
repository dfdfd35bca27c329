//! HTTP control surface
//!
//! UI intents enter the engine through these routes; engine events flow
//! back out over the `/events` SSE relay.

mod handlers;
mod sse;

pub use handlers::*;
pub use sse::event_stream;

use crate::AppState;
use axum::routing::{get, post};
use axum::Router;

/// Build the API route table
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/session/status", get(handlers::session_status))
        .route("/session/end", post(handlers::end_session))
        .route("/stage/switch", post(handlers::switch_stage))
        .route("/stage/complete", post(handlers::complete_stage))
        .route("/profile", post(handlers::create_profile))
        .route("/export", post(handlers::record_export))
        .route("/tracks", get(handlers::track_states))
        .route("/tracks/run", post(handlers::run_all_tracks))
        .route("/tracks/:track/run", post(handlers::run_track))
        .route("/groups/:group", get(handlers::group_status))
        .route("/groups/:group/start", post(handlers::start_group))
        .route("/groups/:group/stop", post(handlers::stop_group))
        .route("/analytics/report", get(handlers::analytics_report))
        .route("/analytics/history", get(handlers::analytics_history))
        .route("/taxonomy", get(handlers::taxonomy_keys))
        .route("/taxonomy/:key", get(handlers::taxonomy_lookup))
        .route("/events", get(sse::event_stream))
}
