//! Core workflow vocabulary shared across workspace members.
//!
//! The funnel stages, discovery tracks, and processor groups are closed sets;
//! every other member matches exhaustively on them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One step of the five-part discovery funnel, in funnel order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Organization profile capture
    Profiler,
    /// Multi-source opportunity discovery
    Discover,
    /// Opportunity analysis and scoring
    Analyze,
    /// Funding plan assembly
    Plan,
    /// Application execution and export
    Execute,
}

impl Stage {
    /// All stages in funnel order
    pub const ALL: [Stage; 5] = [
        Stage::Profiler,
        Stage::Discover,
        Stage::Analyze,
        Stage::Plan,
        Stage::Execute,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Profiler => "profiler",
            Stage::Discover => "discover",
            Stage::Analyze => "analyze",
            Stage::Plan => "plan",
            Stage::Execute => "execute",
        }
    }

    /// The stage whose completion normally gates this one.
    ///
    /// Availability has two explicit exceptions on top of this chain:
    /// discover is always reachable, and analyze is also reachable while
    /// aggregate discovery results exist.
    pub fn prerequisite(self) -> Option<Stage> {
        match self {
            Stage::Profiler => None,
            Stage::Discover => Some(Stage::Profiler),
            Stage::Analyze => Some(Stage::Discover),
            Stage::Plan => Some(Stage::Analyze),
            Stage::Execute => Some(Stage::Plan),
        }
    }

    /// Next stage in funnel order, None after execute
    pub fn next(self) -> Option<Stage> {
        let idx = Stage::ALL.iter().position(|s| *s == self)?;
        Stage::ALL.get(idx + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "profiler" => Ok(Stage::Profiler),
            "discover" => Ok(Stage::Discover),
            "analyze" => Ok(Stage::Analyze),
            "plan" => Ok(Stage::Plan),
            "execute" => Ok(Stage::Execute),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown stage: {other}"
            ))),
        }
    }
}

/// One independent discovery source, queried in parallel with its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackId {
    Nonprofit,
    Federal,
    State,
    Commercial,
}

impl TrackId {
    pub const ALL: [TrackId; 4] = [
        TrackId::Nonprofit,
        TrackId::Federal,
        TrackId::State,
        TrackId::Commercial,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrackId::Nonprofit => "nonprofit",
            TrackId::Federal => "federal",
            TrackId::State => "state",
            TrackId::Commercial => "commercial",
        }
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nonprofit" => Ok(TrackId::Nonprofit),
            "federal" => Ok(TrackId::Federal),
            "state" => Ok(TrackId::State),
            "commercial" => Ok(TrackId::Commercial),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown track: {other}"
            ))),
        }
    }
}

/// A named sequential processor pipeline.
///
/// Discovery runs the four tracks as ordered steps; analysis runs the four
/// remote analysis processors. Groups always run their steps one at a time,
/// unlike the run-all-tracks fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupId {
    DiscoveryGroup,
    AnalysisGroup,
}

impl GroupId {
    pub const ALL: [GroupId; 2] = [GroupId::DiscoveryGroup, GroupId::AnalysisGroup];

    pub fn as_str(self) -> &'static str {
        match self {
            GroupId::DiscoveryGroup => "discovery-group",
            GroupId::AnalysisGroup => "analysis-group",
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discovery-group" | "discovery" => Ok(GroupId::DiscoveryGroup),
            "analysis-group" | "analysis" => Ok(GroupId::AnalysisGroup),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown processor group: {other}"
            ))),
        }
    }
}
