//! Workflow session state machine
//!
//! The session progresses through the five funnel stages:
//! profiler → discover → analyze → plan → execute
//!
//! Stage completion is monotonic: once a stage is complete it never reverts.
//! The session is a single owned aggregate; all mutation goes through the
//! narrow methods here, called from the engine's serialized control flow.

use chrono::{DateTime, Utc};
use fundscout_common::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Stage transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub session_id: Uuid,
    pub old_stage: Stage,
    pub new_stage: Stage,
    pub transitioned_at: DateTime<Utc>,
}

/// Workflow session (in-memory aggregate)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSession {
    /// Unique session identifier
    pub session_id: Uuid,

    /// Session start time
    pub started_at: DateTime<Utc>,

    /// Currently active funnel stage
    pub current_stage: Stage,

    /// Per-stage completion flags; monotonic, never unset
    pub stage_completion: BTreeMap<Stage, bool>,

    /// When the current stage was entered (dwell timer start)
    pub stage_entered_at: DateTime<Utc>,

    /// Accumulated dwell time per stage in milliseconds
    pub time_in_stage_ms: BTreeMap<Stage, i64>,

    /// Organization profiles captured this session
    pub profile_count: usize,

    /// Export artifacts produced this session
    pub export_count: usize,

    /// Aggregate result count across all discovery tracks
    pub aggregate_results: u64,

    /// Session end time (set exactly once, by `end`)
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowSession {
    /// Create a new session starting at the profiler stage
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            started_at: now,
            current_stage: Stage::Profiler,
            stage_completion: Stage::ALL.iter().map(|s| (*s, false)).collect(),
            stage_entered_at: now,
            time_in_stage_ms: Stage::ALL.iter().map(|s| (*s, 0)).collect(),
            profile_count: 0,
            export_count: 0,
            aggregate_results: 0,
            ended_at: None,
        }
    }

    /// Switch the active stage
    ///
    /// Accumulates the outgoing stage's dwell time and starts the incoming
    /// stage's timer. Availability checks happen in the stage machine before
    /// this is called.
    pub fn transition_to(&mut self, new_stage: Stage) -> StageTransition {
        let now = Utc::now();
        self.accumulate_dwell(now);

        let transition = StageTransition {
            session_id: self.session_id,
            old_stage: self.current_stage,
            new_stage,
            transitioned_at: now,
        };

        self.current_stage = new_stage;
        self.stage_entered_at = now;
        transition
    }

    /// Mark a stage complete
    ///
    /// Idempotent: returns true only when the flag newly flipped.
    pub fn mark_complete(&mut self, stage: Stage) -> bool {
        let flag = self.stage_completion.entry(stage).or_insert(false);
        if *flag {
            false
        } else {
            *flag = true;
            true
        }
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        self.stage_completion.get(&stage).copied().unwrap_or(false)
    }

    /// Completed stages as a percentage of the five-stage funnel
    pub fn completion_percentage(&self) -> u8 {
        let completed = self
            .stage_completion
            .values()
            .filter(|done| **done)
            .count();
        (completed * 100 / Stage::ALL.len()) as u8
    }

    /// Accumulated dwell for a stage, including the live tail when it is
    /// the current stage of an unended session
    pub fn dwell_ms(&self, stage: Stage) -> i64 {
        let mut total = self.time_in_stage_ms.get(&stage).copied().unwrap_or(0);
        if self.ended_at.is_none() && stage == self.current_stage {
            total += (Utc::now() - self.stage_entered_at).num_milliseconds();
        }
        total
    }

    /// End the session, closing the current stage's dwell timer
    pub fn end(&mut self) {
        if self.ended_at.is_some() {
            return;
        }
        let now = Utc::now();
        self.accumulate_dwell(now);
        self.ended_at = Some(now);
    }

    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    fn accumulate_dwell(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.stage_entered_at).num_milliseconds();
        *self.time_in_stage_ms.entry(self.current_stage).or_insert(0) += elapsed.max(0);
        self.stage_entered_at = now;
    }
}

impl Default for WorkflowSession {
    fn default() -> Self {
        Self::new()
    }
}
