//! Engine data models

mod group;
mod session;
mod track;

pub use group::{GroupState, GroupStatus, StepOutcome, StepState};
pub use session::{StageTransition, WorkflowSession};
pub use track::{TrackResult, TrackState, TrackStatus};
