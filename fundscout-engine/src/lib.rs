//! fundscout-engine library interface
//!
//! Client-resident orchestration engine for the multi-stage, multi-source
//! funding-opportunity discovery workflow: the five-stage funnel state
//! machine, four parallel discovery tracks, two sequential processor-group
//! pipelines, per-job progress streaming, and session analytics.

pub mod analytics;
pub mod api;
pub mod db;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod groups;
pub mod models;
pub mod stages;
pub mod stream;
pub mod taxonomy;
pub mod tracks;

pub use crate::engine::WorkflowEngine;
pub use crate::error::{ApiError, ApiResult, EngineError, EngineResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// The orchestration engine and its session
    pub engine: Arc<WorkflowEngine>,
    /// Database connection pool
    pub db: SqlitePool,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: Arc<WorkflowEngine>, db: SqlitePool) -> Self {
        Self {
            engine,
            db,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    api::routes()
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
