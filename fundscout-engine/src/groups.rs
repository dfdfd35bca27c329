//! Processor group sequencer
//!
//! A group is a named, ordered pipeline of steps run strictly sequentially,
//! deliberately asymmetric with the run-all-tracks fan-out. One run per
//! group at a time; a second start is rejected.
//!
//! Failure and cancellation policy:
//! - A step failure marks the group errored but the sequencer proceeds to
//!   the next step (partial-failure tolerance).
//! - `stop` is cooperative: the cancellation token is observed before the
//!   next step starts and never preempts an in-flight step. An in-flight
//!   step's result is discarded once stop was requested; steps that
//!   completed beforehand keep their outcomes, remaining steps reset to
//!   idle without being marked failed.

use crate::error::{EngineError, EngineResult};
use crate::gateway::{extract_result_count, GatewayResponse, Invocation, JobGateway};
use crate::models::{GroupState, GroupStatus, StepOutcome, TrackStatus};
use crate::stream::{JobStatus, ProgressStreamClient};
use crate::tracks::TrackRunner;
use chrono::Utc;
use fundscout_common::events::{EngineEvent, EventBus, Severity};
use fundscout_common::{GroupId, Stage, TrackId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// What a group step executes
#[derive(Debug, Clone, Copy)]
pub enum StepKind {
    /// Run one discovery track through its runner
    Track(TrackId),
    /// Invoke a remote analysis processor directly
    Processor { resource: &'static str },
}

/// Static description of one group step
#[derive(Debug, Clone, Copy)]
pub struct StepDescriptor {
    pub label: &'static str,
    pub kind: StepKind,
}

/// Ordered steps for a group
pub fn steps_for(group: GroupId) -> &'static [StepDescriptor] {
    match group {
        GroupId::DiscoveryGroup => &[
            StepDescriptor {
                label: "Nonprofit grant search",
                kind: StepKind::Track(TrackId::Nonprofit),
            },
            StepDescriptor {
                label: "Federal program search",
                kind: StepKind::Track(TrackId::Federal),
            },
            StepDescriptor {
                label: "State program search",
                kind: StepKind::Track(TrackId::State),
            },
            StepDescriptor {
                label: "Commercial funding search",
                kind: StepKind::Track(TrackId::Commercial),
            },
        ],
        GroupId::AnalysisGroup => &[
            StepDescriptor {
                label: "Opportunity filtering",
                kind: StepKind::Processor {
                    resource: "analysis/filter",
                },
            },
            StepDescriptor {
                label: "Financial analysis",
                kind: StepKind::Processor {
                    resource: "analysis/financials",
                },
            },
            StepDescriptor {
                label: "Data enrichment",
                kind: StepKind::Processor {
                    resource: "analysis/enrich",
                },
            },
            StepDescriptor {
                label: "Opportunity scoring",
                kind: StepKind::Processor {
                    resource: "analysis/score",
                },
            },
        ],
    }
}

/// Stage whose progress display a group's steps feed
fn display_stage(group: GroupId) -> Stage {
    match group {
        GroupId::DiscoveryGroup => Stage::Discover,
        GroupId::AnalysisGroup => Stage::Analyze,
    }
}

/// Sequencer owning both groups' state
pub struct GroupSequencer {
    states: HashMap<GroupId, Arc<Mutex<GroupState>>>,
    tokens: Mutex<HashMap<GroupId, CancellationToken>>,
    runners: HashMap<TrackId, Arc<TrackRunner>>,
    gateway: Arc<dyn JobGateway>,
    stream: Arc<ProgressStreamClient>,
    event_bus: EventBus,
}

impl GroupSequencer {
    pub fn new(
        runners: HashMap<TrackId, Arc<TrackRunner>>,
        gateway: Arc<dyn JobGateway>,
        stream: Arc<ProgressStreamClient>,
        event_bus: EventBus,
    ) -> Self {
        let states = GroupId::ALL
            .iter()
            .map(|group| {
                let labels: Vec<&str> = steps_for(*group).iter().map(|s| s.label).collect();
                (*group, Arc::new(Mutex::new(GroupState::new(&labels))))
            })
            .collect();

        Self {
            states,
            tokens: Mutex::new(HashMap::new()),
            runners,
            gateway,
            stream,
            event_bus,
        }
    }

    /// Current state snapshot
    pub async fn status(&self, group: GroupId) -> GroupState {
        self.state_arc(group).lock().await.clone()
    }

    /// Begin a group run
    ///
    /// Rejected while a run is in progress. On success the group is marked
    /// running with all step outcomes reset, and the run's cancellation
    /// token is returned for `run_to_completion`.
    pub async fn start(&self, group: GroupId) -> EngineResult<CancellationToken> {
        let state_arc = self.state_arc(group);
        let mut state = state_arc.lock().await;

        if state.running {
            return Err(EngineError::concurrent_group(group));
        }

        state.running = true;
        state.status = GroupStatus::Running;
        state.progress_fraction = 0.0;
        state.current_step_label = None;
        state.can_cancel = true;
        state.last_run_at = Some(Utc::now());
        for step in &mut state.steps {
            step.outcome = StepOutcome::Idle;
        }

        let token = CancellationToken::new();
        self.tokens.lock().await.insert(group, token.clone());

        tracing::info!(group = %group, steps = state.steps.len(), "Processor group started");

        self.event_bus.emit_lossy(EngineEvent::GroupStarted {
            group,
            step_count: state.steps.len(),
            timestamp: Utc::now(),
        });

        Ok(token)
    }

    /// Request a running group to stop
    ///
    /// Cooperative: remaining steps are skipped once the current step (if
    /// any) finishes. Returns false if the group was not running.
    pub async fn stop(&self, group: GroupId) -> bool {
        {
            let state_arc = self.state_arc(group);
            let state = state_arc.lock().await;
            if !state.running {
                return false;
            }
        }

        if let Some(token) = self.tokens.lock().await.get(&group) {
            tracing::info!(group = %group, "Processor group stop requested");
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Execute all steps of a started run
    ///
    /// Call after `start`; runs to completion, stop, or both, and returns
    /// the final state snapshot.
    pub async fn run_to_completion(
        &self,
        group: GroupId,
        params: Value,
        cancel: CancellationToken,
    ) -> GroupState {
        let steps = steps_for(group);
        let state_arc = self.state_arc(group);
        let step_count = steps.len();
        let mut any_failed = false;

        for (idx, step) in steps.iter().enumerate() {
            // Cancel-before-next-step: stop is observed here, never mid-step
            if cancel.is_cancelled() {
                return self.finish_stopped(group, &state_arc).await;
            }

            {
                let mut state = state_arc.lock().await;
                state.progress_fraction = idx as f64 / step_count as f64;
                state.current_step_label = Some(step.label.to_string());
            }

            self.event_bus.emit_lossy(EngineEvent::GroupStepStarted {
                group,
                step: step.label.to_string(),
                step_index: idx,
                step_count,
                timestamp: Utc::now(),
            });
            self.event_bus.emit_lossy(EngineEvent::ProgressDisplay {
                stage: display_stage(group),
                percent: idx as f64 * 100.0 / step_count as f64,
                message: step.label.to_string(),
                timestamp: Utc::now(),
            });

            let outcome = self.execute_step(step, &params, &cancel).await;

            if cancel.is_cancelled() {
                // Stop arrived while the step was in flight; its result is
                // discarded and the step stays idle.
                tracing::debug!(group = %group, step = step.label, "Discarding in-flight step result after stop");
                return self.finish_stopped(group, &state_arc).await;
            }

            let mut state = state_arc.lock().await;
            match outcome {
                Ok(result_count) => {
                    state.steps[idx].outcome = StepOutcome::Succeeded { result_count };
                    self.event_bus.emit_lossy(EngineEvent::GroupStepCompleted {
                        group,
                        step: step.label.to_string(),
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    any_failed = true;
                    state.status = GroupStatus::Error;
                    state.steps[idx].outcome = StepOutcome::Failed {
                        error: e.to_string(),
                    };

                    tracing::warn!(group = %group, step = step.label, error = %e, "Group step failed, continuing");

                    self.event_bus.emit_lossy(EngineEvent::GroupStepFailed {
                        group,
                        step: step.label.to_string(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    // Track steps notify through their runner; processor
                    // steps notify here.
                    if matches!(step.kind, StepKind::Processor { .. }) {
                        self.event_bus.emit_lossy(EngineEvent::Notification {
                            message: format!("{} failed", step.label),
                            severity: Severity::Error,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        }

        let snapshot = {
            let mut state = state_arc.lock().await;
            state.running = false;
            state.can_cancel = false;
            state.current_step_label = None;
            state.progress_fraction = 1.0;
            state.status = if any_failed {
                GroupStatus::Error
            } else {
                GroupStatus::Success
            };
            state.clone()
        };

        tracing::info!(group = %group, status = ?snapshot.status, "Processor group finished");

        self.event_bus.emit_lossy(EngineEvent::GroupFinished {
            group,
            success: !any_failed,
            timestamp: Utc::now(),
        });

        snapshot
    }

    async fn execute_step(
        &self,
        step: &StepDescriptor,
        params: &Value,
        cancel: &CancellationToken,
    ) -> EngineResult<u64> {
        match step.kind {
            StepKind::Track(id) => {
                let runner = self
                    .runners
                    .get(&id)
                    .expect("every track id has a runner");
                let result = runner.run(params.clone(), cancel).await?;
                match result.status {
                    TrackStatus::Complete => Ok(result.result_count),
                    _ => Err(EngineError::RemoteInvocation(format!(
                        "track '{id}' did not complete"
                    ))),
                }
            }
            StepKind::Processor { resource } => {
                let invocation = Invocation::new(resource, params.clone());
                match self.gateway.invoke(&invocation).await? {
                    GatewayResponse::Completed(result) => {
                        Ok(extract_result_count(&result.data))
                    }
                    GatewayResponse::Job(handle) => {
                        let frame = self.stream.await_terminal(&handle.job_id, cancel).await?;
                        if frame.status == JobStatus::Completed {
                            Ok(frame.result_count())
                        } else {
                            Err(EngineError::RemoteInvocation(format!(
                                "{resource}: job {} failed: {}",
                                handle.job_id,
                                frame.error.unwrap_or_else(|| "unspecified error".to_string())
                            )))
                        }
                    }
                }
            }
        }
    }

    /// Settle a stopped run: completed outcomes preserved, remaining steps
    /// idle, group back to idle
    async fn finish_stopped(
        &self,
        group: GroupId,
        state_arc: &Arc<Mutex<GroupState>>,
    ) -> GroupState {
        let snapshot = {
            let mut state = state_arc.lock().await;
            state.running = false;
            state.can_cancel = false;
            state.current_step_label = None;
            state.progress_fraction = 0.0;
            state.status = GroupStatus::Idle;
            state.clone()
        };

        tracing::info!(
            group = %group,
            completed_steps = snapshot.completed_steps(),
            "Processor group stopped"
        );

        self.event_bus.emit_lossy(EngineEvent::GroupStopped {
            group,
            completed_steps: snapshot.completed_steps(),
            timestamp: Utc::now(),
        });

        snapshot
    }

    fn state_arc(&self, group: GroupId) -> Arc<Mutex<GroupState>> {
        self.states
            .get(&group)
            .expect("every group id has state")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Scripted, SimulatedGateway};
    use crate::stream::{ScriptedFrameSource, ScriptedSegment, StreamConfig};
    use std::time::Duration;

    fn build_sequencer(
        gateway: Arc<SimulatedGateway>,
        segments: Vec<ScriptedSegment>,
    ) -> Arc<GroupSequencer> {
        let bus = EventBus::new(256);
        let stream = Arc::new(ProgressStreamClient::new(
            Arc::new(ScriptedFrameSource::new(segments)),
            StreamConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            bus.clone(),
        ));

        let runners = TrackId::ALL
            .iter()
            .map(|id| {
                (
                    *id,
                    Arc::new(TrackRunner::new(
                        *id,
                        gateway.clone() as Arc<dyn JobGateway>,
                        stream.clone(),
                        bus.clone(),
                    )),
                )
            })
            .collect();

        Arc::new(GroupSequencer::new(
            runners,
            gateway as Arc<dyn JobGateway>,
            stream,
            bus,
        ))
    }

    #[tokio::test]
    async fn all_steps_succeed_yields_success() {
        let gateway = Arc::new(SimulatedGateway::with_fallback(Scripted::Complete {
            result_count: 2,
        }));
        let sequencer = build_sequencer(gateway, vec![]);

        let token = sequencer.start(GroupId::AnalysisGroup).await.unwrap();
        let state = sequencer
            .run_to_completion(GroupId::AnalysisGroup, serde_json::json!({}), token)
            .await;

        assert_eq!(state.status, GroupStatus::Success);
        assert!(!state.running);
        assert_eq!(state.progress_fraction, 1.0);
        assert!(state
            .steps
            .iter()
            .all(|s| matches!(s.outcome, StepOutcome::Succeeded { .. })));
    }

    #[tokio::test]
    async fn second_start_while_running_is_rejected() {
        let gateway = Arc::new(SimulatedGateway::with_fallback(Scripted::Complete {
            result_count: 0,
        }));
        let sequencer = build_sequencer(gateway, vec![]);

        let _token = sequencer.start(GroupId::DiscoveryGroup).await.unwrap();

        let second = sequencer.start(GroupId::DiscoveryGroup).await;
        assert!(matches!(
            second,
            Err(EngineError::ConcurrentRunRejected { .. })
        ));

        // The other group is unaffected
        assert!(sequencer.start(GroupId::AnalysisGroup).await.is_ok());
    }

    #[tokio::test]
    async fn step_failure_is_tolerated_and_run_continues() {
        let gateway = Arc::new(SimulatedGateway::with_fallback(Scripted::Complete {
            result_count: 1,
        }));
        gateway
            .script(
                "analysis/financials",
                Scripted::Fail {
                    message: "model unavailable".to_string(),
                },
            )
            .await;
        let sequencer = build_sequencer(gateway, vec![]);

        let token = sequencer.start(GroupId::AnalysisGroup).await.unwrap();
        let state = sequencer
            .run_to_completion(GroupId::AnalysisGroup, serde_json::json!({}), token)
            .await;

        assert_eq!(state.status, GroupStatus::Error);
        assert_eq!(state.progress_fraction, 1.0);
        assert!(matches!(state.steps[0].outcome, StepOutcome::Succeeded { .. }));
        assert!(matches!(state.steps[1].outcome, StepOutcome::Failed { .. }));
        // Later steps still ran
        assert!(matches!(state.steps[2].outcome, StepOutcome::Succeeded { .. }));
        assert!(matches!(state.steps[3].outcome, StepOutcome::Succeeded { .. }));
    }

    #[tokio::test]
    async fn stop_after_first_step_preserves_its_outcome() {
        let gateway = Arc::new(SimulatedGateway::with_fallback(Scripted::Complete {
            result_count: 0,
        }));
        // Step 1 resolves synchronously; step 2 hangs on a silent job stream
        gateway
            .script("analysis/filter", Scripted::Complete { result_count: 3 })
            .await;
        gateway
            .script(
                "analysis/financials",
                Scripted::Job {
                    job_id: "job-slow".to_string(),
                },
            )
            .await;

        let sequencer = build_sequencer(
            gateway,
            vec![ScriptedSegment::Frames(vec![
                "{\"status\":\"running\"}".to_string(),
            ])],
        );

        let token = sequencer.start(GroupId::AnalysisGroup).await.unwrap();
        let task = {
            let sequencer = sequencer.clone();
            let token = token.clone();
            tokio::spawn(async move {
                sequencer
                    .run_to_completion(GroupId::AnalysisGroup, serde_json::json!({}), token)
                    .await
            })
        };

        // Wait until step 2 is in flight, then request stop
        loop {
            let state = sequencer.status(GroupId::AnalysisGroup).await;
            if state.current_step_label.as_deref() == Some("Financial analysis") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(sequencer.stop(GroupId::AnalysisGroup).await);

        let state = task.await.unwrap();
        assert_eq!(state.status, GroupStatus::Idle);
        assert!(!state.running);
        assert_eq!(state.progress_fraction, 0.0);
        assert_eq!(
            state.steps[0].outcome,
            StepOutcome::Succeeded { result_count: 3 }
        );
        // Remaining steps reset, not failed
        for step in &state.steps[1..] {
            assert_eq!(step.outcome, StepOutcome::Idle);
        }

        // Stopped group can start again
        assert!(sequencer.start(GroupId::AnalysisGroup).await.is_ok());
    }

    #[tokio::test]
    async fn stop_when_idle_reports_false() {
        let gateway = Arc::new(SimulatedGateway::new());
        let sequencer = build_sequencer(gateway, vec![]);
        assert!(!sequencer.stop(GroupId::DiscoveryGroup).await);
    }
}
