//! Session snapshot persistence
//!
//! On session end the event log and derived report are written as one JSON
//! blob under a fixed settings key. On the next startup the snapshot is
//! merged into the completion history, so history survives even though only
//! the most recent full log is retained.

use crate::analytics::{AnalyticsEvent, AnalyticsReport};
use anyhow::Result;
use chrono::{DateTime, Utc};
use fundscout_common::Stage;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

const SNAPSHOT_KEY: &str = "analytics.last_session";
const HISTORY_KEY: &str = "analytics.completion_history";

/// Full snapshot of one ended session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub completion_percentage: u8,
    pub events: Vec<AnalyticsEvent>,
    pub report: AnalyticsReport,
}

/// Compact history record kept per ended session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub session_id: Uuid,
    pub ended_at: DateTime<Utc>,
    pub completion_percentage: u8,
    pub most_engaging_stage: Option<Stage>,
}

impl From<&SessionSnapshot> for CompletionRecord {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id,
            ended_at: snapshot.ended_at,
            completion_percentage: snapshot.completion_percentage,
            most_engaging_stage: snapshot.report.most_engaging_stage,
        }
    }
}

/// Persist the last-session snapshot
pub async fn save_snapshot(db: &Pool<Sqlite>, snapshot: &SessionSnapshot) -> Result<()> {
    let value = serde_json::to_string(snapshot)?;
    crate::db::set_setting(db, SNAPSHOT_KEY, &value).await?;

    tracing::info!(
        session_id = %snapshot.session_id,
        events = snapshot.events.len(),
        "Session snapshot persisted"
    );

    Ok(())
}

/// Load the last-session snapshot, if any
pub async fn load_snapshot(db: &Pool<Sqlite>) -> Result<Option<SessionSnapshot>> {
    let Some(value) = crate::db::get_setting(db, SNAPSHOT_KEY).await? else {
        return Ok(None);
    };

    match serde_json::from_str(&value) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unreadable session snapshot");
            Ok(None)
        }
    }
}

/// Load the completion history
pub async fn load_history(db: &Pool<Sqlite>) -> Result<Vec<CompletionRecord>> {
    let Some(value) = crate::db::get_setting(db, HISTORY_KEY).await? else {
        return Ok(Vec::new());
    };

    match serde_json::from_str(&value) {
        Ok(history) => Ok(history),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unreadable completion history");
            Ok(Vec::new())
        }
    }
}

async fn save_history(db: &Pool<Sqlite>, history: &[CompletionRecord]) -> Result<()> {
    let value = serde_json::to_string(history)?;
    crate::db::set_setting(db, HISTORY_KEY, &value).await?;
    Ok(())
}

/// Merge the last-session snapshot into the completion history
///
/// Called on startup. Idempotent: a session already present in the history
/// is not appended twice.
pub async fn merge_last_session(db: &Pool<Sqlite>) -> Result<Vec<CompletionRecord>> {
    let mut history = load_history(db).await?;

    if let Some(snapshot) = load_snapshot(db).await? {
        let already_merged = history
            .iter()
            .any(|record| record.session_id == snapshot.session_id);

        if !already_merged {
            history.push(CompletionRecord::from(&snapshot));
            save_history(db, &history).await?;

            tracing::info!(
                session_id = %snapshot.session_id,
                history_len = history.len(),
                "Previous session merged into completion history"
            );
        }
    }

    Ok(history)
}
