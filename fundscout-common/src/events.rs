//! Event types for the FundScout event system
//!
//! Provides the shared `EngineEvent` enum and `EventBus` used by the engine
//! and every output surface (SSE relay, analytics mirror, notifications).
//!
//! Events are broadcast via EventBus and can be serialized for SSE
//! transmission. All events use this central enum for type safety and
//! exhaustive matching.

use crate::types::{GroupId, Stage, TrackId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Severity of a user-visible notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// FundScout engine event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// Workflow session created
    SessionStarted {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Workflow session ended; snapshot persisted
    SessionEnded {
        session_id: Uuid,
        completion_percentage: u8,
        timestamp: DateTime<Utc>,
    },

    /// Active funnel stage switched
    ///
    /// Triggers:
    /// - SSE: highlight the new stage in connected UIs
    /// - Analytics: dwell-time accumulation for the outgoing stage
    StageChanged {
        session_id: Uuid,
        old_stage: Stage,
        new_stage: Stage,
        timestamp: DateTime<Utc>,
    },

    /// A stage reached completion (explicit or via auto-completion)
    ///
    /// Completion is monotonic; this event fires at most once per stage
    /// per session.
    StageCompleted {
        session_id: Uuid,
        stage: Stage,
        timestamp: DateTime<Utc>,
    },

    /// An organization profile was captured
    ProfileCreated {
        session_id: Uuid,
        profile_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// An export artifact was produced
    ExportProduced {
        session_id: Uuid,
        export_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A discovery track began processing
    TrackStarted {
        track: TrackId,
        timestamp: DateTime<Utc>,
    },

    /// A discovery track finished with results
    TrackCompleted {
        track: TrackId,
        result_count: u64,
        timestamp: DateTime<Utc>,
    },

    /// A discovery track failed; siblings are unaffected
    TrackFailed {
        track: TrackId,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Aggregate result statistics recomputed across all tracks
    ///
    /// Emitted once per fan-out, after every track reaches a terminal
    /// status. Auto-completion predicates observe this event.
    AggregateUpdated {
        total_results: u64,
        timestamp: DateTime<Utc>,
    },

    /// A processor group run began
    GroupStarted {
        group: GroupId,
        step_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A group step is about to execute
    GroupStepStarted {
        group: GroupId,
        step: String,
        step_index: usize,
        step_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A group step completed successfully
    GroupStepCompleted {
        group: GroupId,
        step: String,
        timestamp: DateTime<Utc>,
    },

    /// A group step failed; the sequencer proceeds to the next step
    GroupStepFailed {
        group: GroupId,
        step: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A group run finished all steps (success or error)
    GroupFinished {
        group: GroupId,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A group run was stopped before finishing; completed step outcomes
    /// are preserved, remaining steps reset
    GroupStopped {
        group: GroupId,
        completed_steps: usize,
        timestamp: DateTime<Utc>,
    },

    /// Progress frame relayed from a remote job subscription
    JobProgress {
        job_id: String,
        status: String,
        progress_percentage: Option<f64>,
        timestamp: DateTime<Utc>,
    },

    /// User-visible notification for the output sink
    Notification {
        message: String,
        severity: Severity,
        timestamp: DateTime<Utc>,
    },

    /// Progress-display update for the output sink
    ProgressDisplay {
        stage: Stage,
        percent: f64,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Event type name, matching the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::SessionStarted { .. } => "SessionStarted",
            EngineEvent::SessionEnded { .. } => "SessionEnded",
            EngineEvent::StageChanged { .. } => "StageChanged",
            EngineEvent::StageCompleted { .. } => "StageCompleted",
            EngineEvent::ProfileCreated { .. } => "ProfileCreated",
            EngineEvent::ExportProduced { .. } => "ExportProduced",
            EngineEvent::TrackStarted { .. } => "TrackStarted",
            EngineEvent::TrackCompleted { .. } => "TrackCompleted",
            EngineEvent::TrackFailed { .. } => "TrackFailed",
            EngineEvent::AggregateUpdated { .. } => "AggregateUpdated",
            EngineEvent::GroupStarted { .. } => "GroupStarted",
            EngineEvent::GroupStepStarted { .. } => "GroupStepStarted",
            EngineEvent::GroupStepCompleted { .. } => "GroupStepCompleted",
            EngineEvent::GroupStepFailed { .. } => "GroupStepFailed",
            EngineEvent::GroupFinished { .. } => "GroupFinished",
            EngineEvent::GroupStopped { .. } => "GroupStopped",
            EngineEvent::JobProgress { .. } => "JobProgress",
            EngineEvent::Notification { .. } => "Notification",
            EngineEvent::ProgressDisplay { .. } => "ProgressDisplay",
        }
    }
}

/// Broadcast event bus for engine events
///
/// Thin wrapper around `tokio::sync::broadcast` so every surface shares the
/// same subscribe/emit contract.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    ///
    /// Capacity bounds how many events a slow subscriber may lag behind
    /// before old events are dropped for it.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` if no subscribers are
    /// listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngineEvent,
    ) -> Result<usize, broadcast::error::SendError<EngineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscribers case
    ///
    /// Used for high-frequency events (progress frames, display updates)
    /// where nobody listening is a normal condition.
    pub fn emit_lossy(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event bus has no subscribers, event dropped");
        }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
