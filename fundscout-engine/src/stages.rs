//! Funnel stage machine
//!
//! Availability rules are pure functions of the session aggregate. The
//! prerequisite chain follows funnel order with two deliberate exceptions:
//! discover is always reachable, and analyze is reachable while aggregate
//! discovery results exist even if discover was never explicitly completed.
//!
//! Auto-completion predicates are observers: each one names the event kinds
//! that can change its answer and is re-evaluated only when one of those
//! events occurs, never by blanket polling.

use crate::models::WorkflowSession;
use fundscout_common::events::EngineEvent;
use fundscout_common::Stage;

/// Whether a stage can be switched to given the current session state
///
/// Pure and side-effect-free.
pub fn is_available(session: &WorkflowSession, stage: Stage) -> bool {
    match stage {
        // Entry stage, and discovery is always reachable
        Stage::Profiler | Stage::Discover => true,
        // Reachable once discovery completed, or while any aggregate
        // results exist (the shortcut is intentional)
        Stage::Analyze => session.is_complete(Stage::Discover) || session.aggregate_results > 0,
        Stage::Plan => session.is_complete(Stage::Analyze),
        Stage::Execute => session.is_complete(Stage::Plan),
    }
}

/// Human-readable reason a stage is unavailable
pub fn unavailable_reason(stage: Stage) -> String {
    match stage.prerequisite() {
        Some(Stage::Discover) => {
            "discover is not complete and no discovery results exist".to_string()
        }
        Some(prereq) => format!("{prereq} is not complete"),
        None => "stage is always available".to_string(),
    }
}

/// First incomplete stage, in funnel order, that is currently available
pub fn next_recommended(session: &WorkflowSession) -> Option<Stage> {
    Stage::ALL
        .iter()
        .copied()
        .find(|stage| !session.is_complete(*stage) && is_available(session, *stage))
}

type Predicate = fn(&WorkflowSession) -> bool;

/// One auto-completion rule: the stage it completes, the event kinds it
/// observes, and the predicate over the session aggregate
struct AutoCompletion {
    stage: Stage,
    observes: &'static [&'static str],
    predicate: Predicate,
}

/// Auto-completion rules
///
/// The table is visible rather than hidden behind registration calls:
/// profiler completes once a profile exists, discover once aggregate
/// results exist, execute once an export artifact was produced. Plan has no
/// predicate; it completes only by explicit action.
const AUTO_COMPLETIONS: [AutoCompletion; 3] = [
    AutoCompletion {
        stage: Stage::Profiler,
        observes: &["ProfileCreated"],
        predicate: |session| session.profile_count > 0,
    },
    AutoCompletion {
        stage: Stage::Discover,
        observes: &["AggregateUpdated"],
        predicate: |session| session.aggregate_results > 0,
    },
    AutoCompletion {
        stage: Stage::Execute,
        observes: &["ExportProduced"],
        predicate: |session| session.export_count > 0,
    },
];

/// Re-evaluate auto-completion predicates interested in `event`
///
/// Returns the stages that newly completed. Completion is monotonic, so an
/// already-complete stage is never re-evaluated.
pub fn observe(session: &mut WorkflowSession, event: &EngineEvent) -> Vec<Stage> {
    let event_type = event.event_type();
    let mut newly_completed = Vec::new();

    for rule in &AUTO_COMPLETIONS {
        if !rule.observes.contains(&event_type) {
            continue;
        }
        if session.is_complete(rule.stage) {
            continue;
        }
        if (rule.predicate)(session) && session.mark_complete(rule.stage) {
            tracing::info!(
                session_id = %session.session_id,
                stage = %rule.stage,
                "Stage auto-completed"
            );
            newly_completed.push(rule.stage);
        }
    }

    newly_completed
}
