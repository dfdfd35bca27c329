//! Session analytics recorder
//!
//! Every stage transition, completion, and user action is mirrored into an
//! append-only event log. The report is a pure fold over that log: dwell
//! time, conversion funnel, and engagement are derived views, always
//! recomputable from the log alone.
//!
//! The log is append-only and safely readable concurrently with writes;
//! readers get a snapshot.

use chrono::{DateTime, Utc};
use fundscout_common::Stage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One recorded analytics event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since session start
    pub session_offset_ms: i64,
    /// Stage active when the event was recorded
    pub current_stage: Stage,
}

/// One funnel row: how many completion events the stage accumulated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelEntry {
    pub stage: Stage,
    pub completions: usize,
}

/// Derived analytics report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub total_events: usize,
    /// Accumulated dwell per stage in milliseconds
    pub dwell_ms: BTreeMap<Stage, i64>,
    /// Conversion funnel in funnel order
    pub funnel: Vec<FunnelEntry>,
    /// Stage with the highest dwell time, if any dwell was recorded
    pub most_engaging_stage: Option<Stage>,
    /// Event counts by type
    pub event_counts: BTreeMap<String, usize>,
}

/// Append-only analytics log for one session
#[derive(Debug, Clone)]
pub struct AnalyticsRecorder {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    log: Arc<Mutex<Vec<AnalyticsEvent>>>,
}

impl AnalyticsRecorder {
    pub fn new(session_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            started_at,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Append one event to the log
    pub fn record(&self, event_type: &str, data: Value, current_stage: Stage) {
        let now = Utc::now();
        let event = AnalyticsEvent {
            event_type: event_type.to_string(),
            data,
            timestamp: now,
            session_offset_ms: (now - self.started_at).num_milliseconds(),
            current_stage,
        };

        tracing::debug!(
            session_id = %self.session_id,
            event_type = %event.event_type,
            "Analytics event recorded"
        );

        self.log.lock().unwrap().push(event);
    }

    /// Snapshot of the full log
    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.log.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Derive the report from the current log
    pub fn compute_report(&self) -> AnalyticsReport {
        fold_report(&self.events())
    }
}

/// Pure fold from an event log to a report
///
/// Dwell per stage sums transition-out minus transition-in timestamp pairs;
/// the session-ended event closes the final stage's open interval. The
/// funnel counts completion events per stage.
pub fn fold_report(events: &[AnalyticsEvent]) -> AnalyticsReport {
    let mut dwell_ms: BTreeMap<Stage, i64> = BTreeMap::new();
    let mut completions: BTreeMap<Stage, usize> = BTreeMap::new();
    let mut event_counts: BTreeMap<String, usize> = BTreeMap::new();

    let mut current_stage: Option<Stage> = None;
    let mut entered_at: Option<DateTime<Utc>> = None;

    for event in events {
        *event_counts.entry(event.event_type.clone()).or_insert(0) += 1;

        if current_stage.is_none() {
            // The first event anchors the dwell clock
            current_stage = Some(event.current_stage);
            entered_at = Some(event.timestamp);
        }

        match event.event_type.as_str() {
            "stage_transition" => {
                let to = event
                    .data
                    .get("to")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Stage>().ok());

                if let (Some(stage), Some(since), Some(to)) = (current_stage, entered_at, to) {
                    let elapsed = (event.timestamp - since).num_milliseconds().max(0);
                    *dwell_ms.entry(stage).or_insert(0) += elapsed;
                    current_stage = Some(to);
                    entered_at = Some(event.timestamp);
                }
            }
            "stage_completed" => {
                if let Some(stage) = event
                    .data
                    .get("stage")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Stage>().ok())
                {
                    *completions.entry(stage).or_insert(0) += 1;
                }
            }
            "session_ended" => {
                if let (Some(stage), Some(since)) = (current_stage, entered_at) {
                    let elapsed = (event.timestamp - since).num_milliseconds().max(0);
                    *dwell_ms.entry(stage).or_insert(0) += elapsed;
                    entered_at = Some(event.timestamp);
                }
            }
            _ => {}
        }
    }

    let funnel = Stage::ALL
        .iter()
        .map(|stage| FunnelEntry {
            stage: *stage,
            completions: completions.get(stage).copied().unwrap_or(0),
        })
        .collect();

    let most_engaging_stage = dwell_ms
        .iter()
        .filter(|(_, ms)| **ms > 0)
        .max_by_key(|(_, ms)| **ms)
        .map(|(stage, _)| *stage);

    AnalyticsReport {
        total_events: events.len(),
        dwell_ms,
        funnel,
        most_engaging_stage,
        event_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(
        event_type: &str,
        data: Value,
        offset_ms: i64,
        base: DateTime<Utc>,
        stage: Stage,
    ) -> AnalyticsEvent {
        AnalyticsEvent {
            event_type: event_type.to_string(),
            data,
            timestamp: base + chrono::Duration::milliseconds(offset_ms),
            session_offset_ms: offset_ms,
            current_stage: stage,
        }
    }

    fn sample_log() -> Vec<AnalyticsEvent> {
        let base = Utc::now();
        vec![
            event("session_started", json!({}), 0, base, Stage::Profiler),
            event(
                "profile_created",
                json!({"profile_count": 1}),
                500,
                base,
                Stage::Profiler,
            ),
            event(
                "stage_completed",
                json!({"stage": "profiler"}),
                500,
                base,
                Stage::Profiler,
            ),
            event(
                "stage_transition",
                json!({"from": "profiler", "to": "discover"}),
                1_000,
                base,
                Stage::Profiler,
            ),
            event(
                "aggregate_updated",
                json!({"total_results": 28}),
                4_000,
                base,
                Stage::Discover,
            ),
            event(
                "stage_completed",
                json!({"stage": "discover"}),
                4_000,
                base,
                Stage::Discover,
            ),
            event(
                "stage_transition",
                json!({"from": "discover", "to": "analyze"}),
                5_000,
                base,
                Stage::Discover,
            ),
            event("session_ended", json!({}), 5_500, base, Stage::Analyze),
        ]
    }

    #[test]
    fn dwell_sums_transition_pairs() {
        let report = fold_report(&sample_log());

        assert_eq!(report.dwell_ms[&Stage::Profiler], 1_000);
        assert_eq!(report.dwell_ms[&Stage::Discover], 4_000);
        assert_eq!(report.dwell_ms[&Stage::Analyze], 500);
    }

    #[test]
    fn funnel_counts_completions_in_order() {
        let report = fold_report(&sample_log());

        assert_eq!(report.funnel.len(), 5);
        assert_eq!(
            report.funnel[0],
            FunnelEntry {
                stage: Stage::Profiler,
                completions: 1
            }
        );
        assert_eq!(
            report.funnel[1],
            FunnelEntry {
                stage: Stage::Discover,
                completions: 1
            }
        );
        assert_eq!(report.funnel[2].completions, 0);
    }

    #[test]
    fn most_engaging_stage_is_argmax_dwell() {
        let report = fold_report(&sample_log());
        assert_eq!(report.most_engaging_stage, Some(Stage::Discover));
    }

    #[test]
    fn empty_log_folds_to_empty_report() {
        let report = fold_report(&[]);
        assert_eq!(report.total_events, 0);
        assert!(report.dwell_ms.is_empty());
        assert_eq!(report.most_engaging_stage, None);
        assert!(report.funnel.iter().all(|f| f.completions == 0));
    }

    #[test]
    fn recorder_report_matches_reference_fold() {
        let recorder = AnalyticsRecorder::new(Uuid::new_v4(), Utc::now());
        recorder.record("session_started", json!({}), Stage::Profiler);
        recorder.record(
            "stage_transition",
            json!({"from": "profiler", "to": "discover"}),
            Stage::Profiler,
        );
        recorder.record("track_run", json!({"track": "federal"}), Stage::Discover);
        recorder.record("session_ended", json!({}), Stage::Discover);

        let via_recorder = recorder.compute_report();
        let via_fold = fold_report(&recorder.events());

        assert_eq!(via_recorder.total_events, via_fold.total_events);
        assert_eq!(via_recorder.dwell_ms, via_fold.dwell_ms);
        assert_eq!(via_recorder.funnel, via_fold.funnel);
        assert_eq!(via_recorder.event_counts, via_fold.event_counts);
    }

    #[test]
    fn log_snapshot_is_stable_while_appending() {
        let recorder = AnalyticsRecorder::new(Uuid::new_v4(), Utc::now());
        recorder.record("session_started", json!({}), Stage::Profiler);

        let snapshot = recorder.events();
        recorder.record("profile_created", json!({}), Stage::Profiler);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(recorder.len(), 2);
    }
}
