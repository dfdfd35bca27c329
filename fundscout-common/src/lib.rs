//! # FundScout Common Library
//!
//! Shared code for the FundScout workspace including:
//! - Workflow vocabulary (stages, tracks, processor groups)
//! - Event types (EngineEvent enum) and EventBus
//! - Error types
//! - Configuration loading

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use types::{GroupId, Stage, TrackId};
