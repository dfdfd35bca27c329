//! End-to-end workflow scenarios against the simulated gateway

use fundscout_common::events::{EngineEvent, EventBus};
use fundscout_common::{GroupId, Stage, TrackId};
use fundscout_engine::analytics::fold_report;
use fundscout_engine::db;
use fundscout_engine::db::snapshots;
use fundscout_engine::gateway::{Scripted, SimulatedGateway};
use fundscout_engine::models::{GroupStatus, StepOutcome, TrackStatus};
use fundscout_engine::stream::{ScriptedFrameSource, ScriptedSegment, StreamConfig};
use fundscout_engine::WorkflowEngine;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

async fn build_engine(
    gateway: Arc<SimulatedGateway>,
    segments: Vec<ScriptedSegment>,
) -> (Arc<WorkflowEngine>, SqlitePool, EventBus) {
    let pool = db::init_memory_pool().await.expect("memory pool");
    let bus = EventBus::new(1024);

    let engine = Arc::new(WorkflowEngine::new(
        gateway,
        Arc::new(ScriptedFrameSource::new(segments)),
        StreamConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        },
        bus.clone(),
        pool.clone(),
    ));

    (engine, pool, bus)
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

async fn script_track_results(gateway: &SimulatedGateway, counts: [u64; 4]) {
    let resources = [
        "discovery/nonprofit",
        "discovery/federal",
        "discovery/state",
        "discovery/commercial",
    ];
    for (resource, count) in resources.iter().zip(counts) {
        gateway
            .script(resource, Scripted::Complete { result_count: count })
            .await;
    }
}

#[tokio::test]
async fn empty_session_gates_analyze_and_profile_completes_profiler() {
    let gateway = Arc::new(SimulatedGateway::new());
    let (engine, _pool, _bus) = build_engine(gateway, vec![]).await;

    // No profiles, no results: analyze is unreachable
    assert!(!engine.is_stage_available(Stage::Analyze).await);
    let blocked = engine.switch_stage(Stage::Analyze).await;
    assert!(blocked.is_err());

    // Discovery is always reachable
    assert!(engine.is_stage_available(Stage::Discover).await);

    // One profile auto-completes the profiler stage
    engine
        .create_profile(serde_json::json!({"name": "Riverbend Food Shelf"}))
        .await;

    let status = engine.session_status().await;
    assert!(status.stage_completion[&Stage::Profiler]);
    assert_eq!(status.completion_percentage, 20);

    // Still no results, so analyze stays gated
    assert!(!engine.is_stage_available(Stage::Analyze).await);
}

#[tokio::test]
async fn fan_out_aggregates_results_and_auto_completes_discover() {
    let gateway = Arc::new(SimulatedGateway::new());
    script_track_results(&gateway, [12, 5, 3, 8]).await;

    let (engine, _pool, _bus) = build_engine(gateway, vec![]).await;

    let results = engine.run_all_tracks(serde_json::json!({})).await;
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.status == TrackStatus::Complete));

    let status = engine.session_status().await;
    assert_eq!(status.aggregate_results, 28);
    assert!(status.stage_completion[&Stage::Discover]);

    // The aggregate shortcut now opens analyze
    assert!(engine.is_stage_available(Stage::Analyze).await);
    assert!(engine.switch_stage(Stage::Analyze).await.is_ok());
}

#[tokio::test]
async fn aggregate_recompute_is_a_barrier_across_partial_failure() {
    let gateway = Arc::new(SimulatedGateway::new());
    gateway
        .script("discovery/nonprofit", Scripted::Complete { result_count: 4 })
        .await;
    gateway
        .script(
            "discovery/federal",
            Scripted::Fail {
                message: "service unavailable".to_string(),
            },
        )
        .await;
    gateway
        .script("discovery/state", Scripted::Complete { result_count: 6 })
        .await;
    gateway
        .script(
            "discovery/commercial",
            Scripted::Fail {
                message: "timeout".to_string(),
            },
        )
        .await;

    let (engine, _pool, bus) = build_engine(gateway, vec![]).await;
    let mut rx = bus.subscribe();

    let results = engine.run_all_tracks(serde_json::json!({})).await;
    assert_eq!(results.len(), 4);

    let completes = results
        .iter()
        .filter(|r| r.status == TrackStatus::Complete)
        .count();
    let errors = results
        .iter()
        .filter(|r| r.status == TrackStatus::Error)
        .count();
    assert_eq!((completes, errors), (2, 2));

    let events = drain(&mut rx);
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type()).collect();

    // Exactly one aggregate recompute
    let recomputes = kinds.iter().filter(|k| **k == "AggregateUpdated").count();
    assert_eq!(recomputes, 1);

    // And it happens only after every track reached a terminal status
    let aggregate_idx = kinds.iter().position(|k| *k == "AggregateUpdated").unwrap();
    let terminal_indices: Vec<usize> = kinds
        .iter()
        .enumerate()
        .filter(|(_, k)| **k == "TrackCompleted" || **k == "TrackFailed")
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal_indices.len(), 4);
    assert!(terminal_indices.iter().all(|i| *i < aggregate_idx));

    // Failures did not abort siblings; aggregate counts the successes
    let status = engine.session_status().await;
    assert_eq!(status.aggregate_results, 10);
    assert!(status.stage_completion[&Stage::Discover]);
}

#[tokio::test]
async fn duplicate_terminal_frames_apply_once() {
    let gateway = Arc::new(SimulatedGateway::new());
    gateway
        .script(
            "discovery/federal",
            Scripted::Job {
                job_id: "job-dup".to_string(),
            },
        )
        .await;

    let segments = vec![ScriptedSegment::Frames(vec![
        "{\"status\":\"running\"}".to_string(),
        "{\"status\":\"completed\",\"results\":{\"result_count\":5}}".to_string(),
        "{\"status\":\"completed\",\"results\":{\"result_count\":5}}".to_string(),
    ])];

    let (engine, _pool, bus) = build_engine(gateway, segments).await;
    let mut rx = bus.subscribe();

    let result = engine
        .run_track(TrackId::Federal, serde_json::json!({}))
        .await
        .expect("track run");
    assert_eq!(result.status, TrackStatus::Complete);
    assert_eq!(result.result_count, 5);

    let events = drain(&mut rx);
    let completions = events
        .iter()
        .filter(|e| e.event_type() == "TrackCompleted")
        .count();
    assert_eq!(completions, 1);

    // Exactly one analytics record for the run
    let track_runs = engine
        .analytics()
        .events()
        .iter()
        .filter(|e| e.event_type == "track_run")
        .count();
    assert_eq!(track_runs, 1);
}

#[tokio::test]
async fn stream_reconnect_delivers_completion_exactly_once() {
    let gateway = Arc::new(SimulatedGateway::new());
    gateway
        .script(
            "discovery/state",
            Scripted::Job {
                job_id: "job-flaky".to_string(),
            },
        )
        .await;

    // Disconnect mid-job, fail one reconnect, then complete
    let segments = vec![
        ScriptedSegment::Frames(vec![
            "{\"status\":\"queued\"}".to_string(),
            "{\"status\":\"running\",\"progress_percentage\":35.0}".to_string(),
        ]),
        ScriptedSegment::ConnectError("connection reset".to_string()),
        ScriptedSegment::Frames(vec![
            "{\"status\":\"completed\",\"results\":{\"result_count\":9}}".to_string(),
        ]),
    ];

    let (engine, _pool, bus) = build_engine(gateway, segments).await;
    let mut rx = bus.subscribe();

    let result = engine
        .run_track(TrackId::State, serde_json::json!({}))
        .await
        .expect("track run");

    assert_eq!(result.status, TrackStatus::Complete);
    assert_eq!(result.result_count, 9);

    let events = drain(&mut rx);
    let completions = events
        .iter()
        .filter(|e| e.event_type() == "TrackCompleted")
        .count();
    assert_eq!(completions, 1);

    // The disruption surfaced exactly one warning notification; later
    // reconnect attempts stayed quiet
    let warnings = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                EngineEvent::Notification {
                    severity: fundscout_common::events::Severity::Warning,
                    ..
                }
            )
        })
        .count();
    assert_eq!(warnings, 1);
}

#[tokio::test]
async fn group_stop_preserves_finished_step_and_resets_rest() {
    let gateway = Arc::new(SimulatedGateway::new());
    gateway
        .script("analysis/filter", Scripted::Complete { result_count: 11 })
        .await;
    gateway
        .script(
            "analysis/financials",
            Scripted::Job {
                job_id: "job-slow".to_string(),
            },
        )
        .await;

    // The in-flight step's stream stays silent until cancellation
    let segments = vec![ScriptedSegment::Frames(vec![
        "{\"status\":\"running\"}".to_string(),
    ])];

    let (engine, _pool, _bus) = build_engine(gateway, segments).await;

    engine
        .start_group(GroupId::AnalysisGroup, serde_json::json!({}))
        .await
        .expect("group start");

    // A second start while running is rejected
    let second = engine
        .start_group(GroupId::AnalysisGroup, serde_json::json!({}))
        .await;
    assert!(second.is_err());

    // Wait for step 2 to be in flight, then stop
    loop {
        let state = engine.group_status(GroupId::AnalysisGroup).await;
        if state.current_step_label.as_deref() == Some("Financial analysis") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(engine.stop_group(GroupId::AnalysisGroup).await);

    // Wait for the run to settle
    loop {
        let state = engine.group_status(GroupId::AnalysisGroup).await;
        if !state.running {
            assert_eq!(state.status, GroupStatus::Idle);
            assert_eq!(state.progress_fraction, 0.0);
            assert_eq!(
                state.steps[0].outcome,
                StepOutcome::Succeeded { result_count: 11 }
            );
            for step in &state.steps[1..] {
                assert_eq!(step.outcome, StepOutcome::Idle);
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // The group can start again afterwards
    assert!(engine
        .start_group(GroupId::AnalysisGroup, serde_json::json!({}))
        .await
        .is_ok());
}

#[tokio::test]
async fn explicit_plan_completion_opens_execute_and_export_finishes_funnel() {
    let gateway = Arc::new(SimulatedGateway::new());
    script_track_results(&gateway, [2, 2, 2, 2]).await;

    let (engine, _pool, _bus) = build_engine(gateway, vec![]).await;

    engine.create_profile(serde_json::json!({})).await;
    engine.run_all_tracks(serde_json::json!({})).await;
    engine.mark_stage_complete(Stage::Analyze).await;

    assert!(engine.is_stage_available(Stage::Plan).await);
    assert!(!engine.is_stage_available(Stage::Execute).await);

    // Plan completes only by explicit action
    assert!(engine.mark_stage_complete(Stage::Plan).await);
    assert!(!engine.mark_stage_complete(Stage::Plan).await);
    assert!(engine.is_stage_available(Stage::Execute).await);

    // Producing an export auto-completes execute
    engine
        .record_export(serde_json::json!({"artifact": "funding-plan.pdf"}))
        .await;

    let status = engine.session_status().await;
    assert!(status.stage_completion[&Stage::Execute]);
    assert_eq!(status.completion_percentage, 100);
    assert_eq!(status.next_recommended_stage, None);
}

#[tokio::test]
async fn file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("fundscout.db");

    {
        let pool = db::init_database_pool(&db_path).await.expect("open");
        db::set_setting(&pool, "probe", "42").await.expect("set");
        pool.close().await;
    }

    let pool = db::init_database_pool(&db_path).await.expect("reopen");
    let value = db::get_setting(&pool, "probe").await.expect("get");
    assert_eq!(value.as_deref(), Some("42"));
}

#[tokio::test]
async fn report_is_recomputable_and_snapshot_round_trips() {
    let gateway = Arc::new(SimulatedGateway::new());
    script_track_results(&gateway, [1, 1, 1, 1]).await;

    let (engine, pool, _bus) = build_engine(gateway, vec![]).await;

    engine.create_profile(serde_json::json!({})).await;
    engine.switch_stage(Stage::Discover).await.expect("switch");
    engine.run_all_tracks(serde_json::json!({})).await;
    engine.switch_stage(Stage::Analyze).await.expect("switch");

    let snapshot = engine.end_session().await.expect("end session");

    // The persisted report equals a reference fold over the same log
    let reference = fold_report(&snapshot.events);
    assert_eq!(snapshot.report.total_events, reference.total_events);
    assert_eq!(snapshot.report.dwell_ms, reference.dwell_ms);
    assert_eq!(snapshot.report.funnel, reference.funnel);
    assert_eq!(snapshot.report.event_counts, reference.event_counts);

    // Funnel saw profiler and discover completions
    let profiler_row = snapshot
        .report
        .funnel
        .iter()
        .find(|f| f.stage == Stage::Profiler)
        .unwrap();
    assert_eq!(profiler_row.completions, 1);

    // Ending twice is rejected
    assert!(engine.end_session().await.is_err());

    // The snapshot survives a reload and merges into history once
    let loaded = snapshots::load_snapshot(&pool)
        .await
        .expect("load")
        .expect("snapshot present");
    assert_eq!(loaded.session_id, snapshot.session_id);

    let history = snapshots::merge_last_session(&pool).await.expect("merge");
    assert_eq!(history.len(), 1);
    let history = snapshots::merge_last_session(&pool).await.expect("merge");
    assert_eq!(history.len(), 1);
}
