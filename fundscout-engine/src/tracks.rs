//! Discovery track runners
//!
//! Each track wraps one discovery source around the gateway and the progress
//! stream client under a uniform run/status contract. A track failure is
//! absorbed here: the track goes to error and a notification goes out, but
//! sibling tracks and any enclosing group keep running.

use crate::error::{EngineError, EngineResult};
use crate::gateway::{extract_result_count, GatewayResponse, Invocation, JobGateway};
use crate::models::{TrackResult, TrackState, TrackStatus};
use crate::stream::{JobStatus, ProgressStreamClient};
use chrono::Utc;
use fundscout_common::events::{EngineEvent, EventBus, Severity};
use fundscout_common::TrackId;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Static description of one discovery source
#[derive(Debug, Clone, Copy)]
pub struct TrackDescriptor {
    pub id: TrackId,
    /// Gateway resource invoked for this source
    pub resource: &'static str,
    /// Stable human-readable label for notifications
    pub label: &'static str,
}

/// The four discovery sources
pub const TRACKS: [TrackDescriptor; 4] = [
    TrackDescriptor {
        id: TrackId::Nonprofit,
        resource: "discovery/nonprofit",
        label: "Nonprofit grant search",
    },
    TrackDescriptor {
        id: TrackId::Federal,
        resource: "discovery/federal",
        label: "Federal program search",
    },
    TrackDescriptor {
        id: TrackId::State,
        resource: "discovery/state",
        label: "State program search",
    },
    TrackDescriptor {
        id: TrackId::Commercial,
        resource: "discovery/commercial",
        label: "Commercial funding search",
    },
];

pub fn descriptor(id: TrackId) -> &'static TrackDescriptor {
    TRACKS
        .iter()
        .find(|d| d.id == id)
        .expect("every track id has a descriptor")
}

/// Runner for one discovery track
///
/// Owns the track's mutable state exclusively.
pub struct TrackRunner {
    descriptor: &'static TrackDescriptor,
    gateway: Arc<dyn JobGateway>,
    stream: Arc<ProgressStreamClient>,
    state: Mutex<TrackState>,
    event_bus: EventBus,
}

impl TrackRunner {
    pub fn new(
        id: TrackId,
        gateway: Arc<dyn JobGateway>,
        stream: Arc<ProgressStreamClient>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            descriptor: descriptor(id),
            gateway,
            stream,
            state: Mutex::new(TrackState::default()),
            event_bus,
        }
    }

    pub fn id(&self) -> TrackId {
        self.descriptor.id
    }

    /// Current state snapshot
    pub async fn state(&self) -> TrackState {
        self.state.lock().await.clone()
    }

    /// Run this track's discovery source
    ///
    /// The status flips to Processing synchronously before the remote call,
    /// so a second run observes it and is rejected. Failure never propagates
    /// past this method as anything other than the returned `TrackResult`
    /// with error status; the `ConcurrentRunRejected` case is the one true
    /// error return.
    pub async fn run(
        &self,
        params: Value,
        cancel: &CancellationToken,
    ) -> EngineResult<TrackResult> {
        {
            let mut state = self.state.lock().await;
            if state.status == TrackStatus::Processing {
                return Err(EngineError::ConcurrentRunRejected {
                    subject: format!("track '{}'", self.descriptor.id),
                });
            }
            state.status = TrackStatus::Processing;
            state.last_run_at = Some(Utc::now());
        }

        self.event_bus.emit_lossy(EngineEvent::TrackStarted {
            track: self.descriptor.id,
            timestamp: Utc::now(),
        });

        tracing::info!(track = %self.descriptor.id, resource = self.descriptor.resource, "Track run started");

        let invocation = Invocation::new(self.descriptor.resource, params);

        let outcome = match self.gateway.invoke(&invocation).await {
            Ok(GatewayResponse::Completed(result)) => {
                Ok(extract_result_count(&result.data))
            }
            Ok(GatewayResponse::Job(handle)) => {
                match self.stream.await_terminal(&handle.job_id, cancel).await {
                    Ok(frame) if frame.status == JobStatus::Completed => {
                        Ok(frame.result_count())
                    }
                    Ok(frame) => Err(EngineError::RemoteInvocation(format!(
                        "{}: job {} failed: {}",
                        self.descriptor.resource,
                        handle.job_id,
                        frame.error.unwrap_or_else(|| "unspecified error".to_string())
                    ))),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result_count) => Ok(self.complete(result_count).await),
            Err(e) => Ok(self.fail(e).await),
        }
    }

    /// Apply a successful outcome
    ///
    /// Results arriving after the track already left Processing (stop was
    /// requested and the run was detached) are discarded.
    async fn complete(&self, result_count: u64) -> TrackResult {
        let mut state = self.state.lock().await;

        if state.status != TrackStatus::Processing {
            tracing::debug!(
                track = %self.descriptor.id,
                result_count,
                "Discarding result for track no longer processing"
            );
            return self.snapshot(&state);
        }

        state.status = TrackStatus::Complete;
        state.result_count = result_count;

        tracing::info!(track = %self.descriptor.id, result_count, "Track run complete");

        self.event_bus.emit_lossy(EngineEvent::TrackCompleted {
            track: self.descriptor.id,
            result_count,
            timestamp: Utc::now(),
        });

        self.snapshot(&state)
    }

    /// Apply a failed outcome
    ///
    /// Exactly one notification per terminal error, with a stable message.
    async fn fail(&self, error: EngineError) -> TrackResult {
        let mut state = self.state.lock().await;

        if state.status != TrackStatus::Processing {
            tracing::debug!(
                track = %self.descriptor.id,
                error = %error,
                "Discarding failure for track no longer processing"
            );
            return self.snapshot(&state);
        }

        state.status = TrackStatus::Error;

        tracing::warn!(track = %self.descriptor.id, error = %error, "Track run failed");

        self.event_bus.emit_lossy(EngineEvent::TrackFailed {
            track: self.descriptor.id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        self.event_bus.emit_lossy(EngineEvent::Notification {
            message: format!("{} failed", self.descriptor.label),
            severity: Severity::Error,
            timestamp: Utc::now(),
        });

        self.snapshot(&state)
    }

    fn snapshot(&self, state: &TrackState) -> TrackResult {
        TrackResult {
            track: self.descriptor.id,
            status: state.status,
            result_count: state.result_count,
        }
    }
}
