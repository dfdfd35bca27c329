//! Discovery track state

use chrono::{DateTime, Utc};
use fundscout_common::TrackId;
use serde::{Deserialize, Serialize};

/// Track lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    /// Never run, or reset
    Ready,
    /// Remote call or progress subscription in flight
    Processing,
    /// Last run finished with results
    Complete,
    /// Last run failed
    Error,
}

impl TrackStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TrackStatus::Complete | TrackStatus::Error)
    }
}

/// Mutable per-track state, owned exclusively by the track's runner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackState {
    pub status: TrackStatus,
    pub result_count: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Default for TrackState {
    fn default() -> Self {
        Self {
            status: TrackStatus::Ready,
            result_count: 0,
            last_run_at: None,
        }
    }
}

/// Outcome of a single track run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackResult {
    pub track: TrackId,
    pub status: TrackStatus,
    pub result_count: u64,
}
