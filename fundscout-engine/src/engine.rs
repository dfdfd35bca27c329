//! Workflow engine
//!
//! The engine owns the session aggregate and is the only writer of
//! session/stage state. UI intents enter through the narrow methods here;
//! concurrency arises only from interleaved remote-call completions inside
//! track runners and group runs, which report back through these methods.
//!
//! Every transition and action is mirrored into the analytics log and onto
//! the event bus.

use crate::analytics::{AnalyticsRecorder, AnalyticsReport};
use crate::db::snapshots::{self, SessionSnapshot};
use crate::error::{EngineError, EngineResult};
use crate::gateway::JobGateway;
use crate::groups::GroupSequencer;
use crate::models::{GroupState, StageTransition, TrackResult, TrackState, WorkflowSession};
use crate::stages;
use crate::stream::{FrameSource, ProgressStreamClient, StreamConfig};
use crate::tracks::TrackRunner;
use chrono::Utc;
use fundscout_common::events::{EngineEvent, EventBus, Severity};
use fundscout_common::{GroupId, Stage, TrackId};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Point-in-time view of the session for status queries
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: uuid::Uuid,
    pub started_at: chrono::DateTime<Utc>,
    pub current_stage: Stage,
    pub completion_percentage: u8,
    pub stage_completion: BTreeMap<Stage, bool>,
    pub stage_availability: BTreeMap<Stage, bool>,
    pub next_recommended_stage: Option<Stage>,
    pub profile_count: usize,
    pub export_count: usize,
    pub aggregate_results: u64,
    pub ended_at: Option<chrono::DateTime<Utc>>,
}

/// Track state plus identity, for status queries
#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    pub track: TrackId,
    #[serde(flatten)]
    pub state: TrackState,
}

/// Client-resident orchestration engine
pub struct WorkflowEngine {
    session: Mutex<WorkflowSession>,
    runners: HashMap<TrackId, Arc<TrackRunner>>,
    sequencer: GroupSequencer,
    analytics: AnalyticsRecorder,
    event_bus: EventBus,
    db: SqlitePool,
}

impl WorkflowEngine {
    /// Create the engine and its session
    ///
    /// One session per engine lifetime, created here and ended exactly once
    /// by `end_session`.
    pub fn new(
        gateway: Arc<dyn JobGateway>,
        frame_source: Arc<dyn FrameSource>,
        stream_config: StreamConfig,
        event_bus: EventBus,
        db: SqlitePool,
    ) -> Self {
        let session = WorkflowSession::new();
        let analytics = AnalyticsRecorder::new(session.session_id, session.started_at);

        let stream = Arc::new(ProgressStreamClient::new(
            frame_source,
            stream_config,
            event_bus.clone(),
        ));

        let runners: HashMap<TrackId, Arc<TrackRunner>> = TrackId::ALL
            .iter()
            .map(|id| {
                (
                    *id,
                    Arc::new(TrackRunner::new(
                        *id,
                        gateway.clone(),
                        stream.clone(),
                        event_bus.clone(),
                    )),
                )
            })
            .collect();

        let sequencer = GroupSequencer::new(
            runners.clone(),
            gateway,
            stream,
            event_bus.clone(),
        );

        tracing::info!(session_id = %session.session_id, "Workflow session created");

        analytics.record("session_started", json!({}), session.current_stage);
        event_bus.emit_lossy(EngineEvent::SessionStarted {
            session_id: session.session_id,
            timestamp: Utc::now(),
        });

        Self {
            session: Mutex::new(session),
            runners,
            sequencer,
            analytics,
            event_bus,
            db,
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn analytics(&self) -> &AnalyticsRecorder {
        &self.analytics
    }

    // ------------------------------------------------------------------
    // Session & stage intents
    // ------------------------------------------------------------------

    /// Status view of the session aggregate
    pub async fn session_status(&self) -> SessionStatus {
        let session = self.session.lock().await;
        SessionStatus {
            session_id: session.session_id,
            started_at: session.started_at,
            current_stage: session.current_stage,
            completion_percentage: session.completion_percentage(),
            stage_completion: session.stage_completion.clone(),
            stage_availability: Stage::ALL
                .iter()
                .map(|s| (*s, stages::is_available(&session, *s)))
                .collect(),
            next_recommended_stage: stages::next_recommended(&session),
            profile_count: session.profile_count,
            export_count: session.export_count,
            aggregate_results: session.aggregate_results,
            ended_at: session.ended_at,
        }
    }

    /// Whether a stage can currently be switched to
    pub async fn is_stage_available(&self, stage: Stage) -> bool {
        let session = self.session.lock().await;
        stages::is_available(&session, stage)
    }

    /// Switch the active funnel stage
    ///
    /// An unavailable target is a local synchronous rejection: a warning
    /// notification goes out and the error never aborts anything else.
    pub async fn switch_stage(&self, target: Stage) -> EngineResult<StageTransition> {
        let transition = {
            let mut session = self.session.lock().await;

            if session.is_ended() {
                return Err(EngineError::NoSession);
            }

            if !stages::is_available(&session, target) {
                let reason = stages::unavailable_reason(target);
                drop(session);

                self.record("stage_blocked", json!({"stage": target, "reason": &reason}))
                    .await;
                self.event_bus.emit_lossy(EngineEvent::Notification {
                    message: format!("Stage '{target}' is not available yet"),
                    severity: Severity::Warning,
                    timestamp: Utc::now(),
                });

                return Err(EngineError::PrerequisiteNotMet {
                    stage: target,
                    reason,
                });
            }

            if session.current_stage == target {
                // Idempotent: re-selecting the active stage moves nothing
                return Ok(StageTransition {
                    session_id: session.session_id,
                    old_stage: target,
                    new_stage: target,
                    transitioned_at: Utc::now(),
                });
            }

            session.transition_to(target)
        };

        tracing::info!(
            session_id = %transition.session_id,
            from = %transition.old_stage,
            to = %transition.new_stage,
            "Stage switched"
        );

        self.record(
            "stage_transition",
            json!({"from": transition.old_stage, "to": transition.new_stage}),
        )
        .await;
        self.event_bus.emit_lossy(EngineEvent::StageChanged {
            session_id: transition.session_id,
            old_stage: transition.old_stage,
            new_stage: transition.new_stage,
            timestamp: transition.transitioned_at,
        });

        Ok(transition)
    }

    /// Explicitly mark a stage complete (e.g. plan has no auto-completion)
    ///
    /// Idempotent; returns true only when the flag newly flipped.
    pub async fn mark_stage_complete(&self, stage: Stage) -> bool {
        let newly = {
            let mut session = self.session.lock().await;
            session.mark_complete(stage)
        };

        if newly {
            self.emit_stage_completed(stage).await;
        }
        newly
    }

    /// Capture an organization profile
    pub async fn create_profile(&self, profile: Value) -> usize {
        let (event, newly_completed, profile_count) = {
            let mut session = self.session.lock().await;
            session.profile_count += 1;

            let event = EngineEvent::ProfileCreated {
                session_id: session.session_id,
                profile_count: session.profile_count,
                timestamp: Utc::now(),
            };
            let newly_completed = stages::observe(&mut session, &event);
            (event, newly_completed, session.profile_count)
        };

        self.record("profile_created", json!({"profile": profile})).await;
        self.event_bus.emit_lossy(event);

        for stage in newly_completed {
            self.emit_stage_completed(stage).await;
        }

        profile_count
    }

    /// Record a produced export artifact
    pub async fn record_export(&self, artifact: Value) -> usize {
        let (event, newly_completed, export_count) = {
            let mut session = self.session.lock().await;
            session.export_count += 1;

            let event = EngineEvent::ExportProduced {
                session_id: session.session_id,
                export_count: session.export_count,
                timestamp: Utc::now(),
            };
            let newly_completed = stages::observe(&mut session, &event);
            (event, newly_completed, session.export_count)
        };

        self.record("export_produced", json!({"artifact": artifact}))
            .await;
        self.event_bus.emit_lossy(event);

        for stage in newly_completed {
            self.emit_stage_completed(stage).await;
        }

        export_count
    }

    // ------------------------------------------------------------------
    // Tracks
    // ------------------------------------------------------------------

    /// Current state of every track
    pub async fn track_states(&self) -> Vec<TrackSummary> {
        let mut summaries = Vec::with_capacity(TrackId::ALL.len());
        for id in TrackId::ALL {
            let runner = &self.runners[&id];
            summaries.push(TrackSummary {
                track: id,
                state: runner.state().await,
            });
        }
        summaries
    }

    /// Run a single discovery track, then refresh the aggregate
    pub async fn run_track(&self, track: TrackId, params: Value) -> EngineResult<TrackResult> {
        let runner = self.runners[&track].clone();
        let result = runner.run(params, &CancellationToken::new()).await?;

        self.record(
            "track_run",
            json!({
                "track": result.track,
                "status": result.status,
                "result_count": result.result_count,
            }),
        )
        .await;

        self.recompute_aggregate().await;
        Ok(result)
    }

    /// Run all four discovery tracks concurrently
    ///
    /// Fan-out with no ordering guarantee. The aggregate recompute is a
    /// barrier: it happens exactly once, after every track reaches a
    /// terminal status, regardless of individual failures.
    pub async fn run_all_tracks(&self, params: Value) -> Vec<TrackResult> {
        let mut fan_out = FuturesUnordered::new();
        for id in TrackId::ALL {
            let runner = self.runners[&id].clone();
            let params = params.clone();
            fan_out.push(async move {
                runner.run(params, &CancellationToken::new()).await
            });
        }

        let mut results = Vec::new();
        while let Some(outcome) = fan_out.next().await {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    // A track already processing elsewhere; it will reach a
                    // terminal state under its original run.
                    tracing::warn!(error = %e, "Track skipped during fan-out");
                }
            }
        }

        for result in &results {
            self.record(
                "track_run",
                json!({
                    "track": result.track,
                    "status": result.status,
                    "result_count": result.result_count,
                }),
            )
            .await;
        }

        // Barrier: all tracks are terminal here
        self.recompute_aggregate().await;

        results
    }

    /// Recompute aggregate result statistics across all tracks
    async fn recompute_aggregate(&self) {
        let mut total = 0;
        for runner in self.runners.values() {
            total += runner.state().await.result_count;
        }

        let (event, newly_completed) = {
            let mut session = self.session.lock().await;
            session.aggregate_results = total;

            let event = EngineEvent::AggregateUpdated {
                total_results: total,
                timestamp: Utc::now(),
            };
            let newly_completed = stages::observe(&mut session, &event);
            (event, newly_completed)
        };

        tracing::info!(total_results = total, "Aggregate statistics recomputed");

        self.record("aggregate_updated", json!({"total_results": total}))
            .await;
        self.event_bus.emit_lossy(event);

        for stage in newly_completed {
            self.emit_stage_completed(stage).await;
        }
    }

    // ------------------------------------------------------------------
    // Processor groups
    // ------------------------------------------------------------------

    /// Start a processor group run in the background
    ///
    /// Rejected while the group is already running.
    pub async fn start_group(self: &Arc<Self>, group: GroupId, params: Value) -> EngineResult<()> {
        let token = self.sequencer.start(group).await?;

        self.record("group_started", json!({"group": group})).await;

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let state = engine
                .sequencer
                .run_to_completion(group, params, token)
                .await;

            // A finished discovery pipeline leaves all tracks terminal
            if group == GroupId::DiscoveryGroup {
                engine.recompute_aggregate().await;
            }

            let event_type = match state.status {
                crate::models::GroupStatus::Idle => "group_stopped",
                _ => "group_finished",
            };
            engine
                .record(event_type, json!({"group": group, "status": state.status}))
                .await;
        });

        Ok(())
    }

    /// Request a running group to stop (cooperative, cancel-before-next-step)
    pub async fn stop_group(&self, group: GroupId) -> bool {
        let stopped = self.sequencer.stop(group).await;
        if stopped {
            self.record("group_stop_requested", json!({"group": group}))
                .await;
        }
        stopped
    }

    /// Current state of a processor group
    pub async fn group_status(&self, group: GroupId) -> GroupState {
        self.sequencer.status(group).await
    }

    // ------------------------------------------------------------------
    // Analytics & session end
    // ------------------------------------------------------------------

    /// Derive the analytics report from the live log
    pub fn analytics_report(&self) -> AnalyticsReport {
        self.analytics.compute_report()
    }

    /// End the session and persist its snapshot
    ///
    /// Idempotent at the error level: a second call is rejected rather than
    /// double-persisting.
    pub async fn end_session(&self) -> EngineResult<SessionSnapshot> {
        let (session_id, started_at, ended_at, completion_percentage) = {
            let mut session = self.session.lock().await;
            if session.is_ended() {
                return Err(EngineError::NoSession);
            }
            session.end();
            (
                session.session_id,
                session.started_at,
                session.ended_at.expect("just ended"),
                session.completion_percentage(),
            )
        };

        self.record("session_ended", json!({})).await;

        let report = self.analytics.compute_report();
        let snapshot = SessionSnapshot {
            session_id,
            started_at,
            ended_at,
            completion_percentage,
            events: self.analytics.events(),
            report,
        };

        snapshots::save_snapshot(&self.db, &snapshot)
            .await
            .map_err(|e| {
                EngineError::Common(fundscout_common::Error::Internal(e.to_string()))
            })?;

        tracing::info!(
            session_id = %session_id,
            completion_percentage,
            "Workflow session ended"
        );

        self.event_bus.emit_lossy(EngineEvent::SessionEnded {
            session_id,
            completion_percentage,
            timestamp: ended_at,
        });

        Ok(snapshot)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn emit_stage_completed(&self, stage: Stage) {
        let session_id = {
            let session = self.session.lock().await;
            session.session_id
        };

        self.record("stage_completed", json!({"stage": stage})).await;
        self.event_bus.emit_lossy(EngineEvent::StageCompleted {
            session_id,
            stage,
            timestamp: Utc::now(),
        });
        self.event_bus.emit_lossy(EngineEvent::Notification {
            message: format!("Stage '{stage}' complete"),
            severity: Severity::Success,
            timestamp: Utc::now(),
        });
    }

    /// Mirror an action into the analytics log, stamped with the stage
    /// active at record time
    async fn record(&self, event_type: &str, data: Value) {
        let current_stage = {
            let session = self.session.lock().await;
            session.current_stage
        };
        self.analytics.record(event_type, data, current_stage);
    }
}
