//! Processor group state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Group lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Idle,
    Running,
    Success,
    Error,
}

/// Outcome of a single step within a group run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum StepOutcome {
    /// Not yet run this run, or reset after a stop
    Idle,
    Succeeded {
        result_count: u64,
    },
    Failed {
        error: String,
    },
}

/// One step slot within a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub label: String,
    pub outcome: StepOutcome,
}

/// Mutable per-group state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupState {
    pub status: GroupStatus,
    pub running: bool,
    /// Fraction of steps started, in [0, 1]
    pub progress_fraction: f64,
    pub current_step_label: Option<String>,
    pub can_cancel: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepState>,
}

impl GroupState {
    pub fn new(step_labels: &[&str]) -> Self {
        Self {
            status: GroupStatus::Idle,
            running: false,
            progress_fraction: 0.0,
            current_step_label: None,
            can_cancel: false,
            last_run_at: None,
            steps: step_labels
                .iter()
                .map(|label| StepState {
                    label: (*label).to_string(),
                    outcome: StepOutcome::Idle,
                })
                .collect(),
        }
    }

    /// Steps whose outcome from the current run is settled
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.outcome != StepOutcome::Idle)
            .count()
    }
}
