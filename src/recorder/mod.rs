//! Rehearsal recorder
//!
//! This module ties the sessions together:
//! - `Orchestrator` owns capture and playback on a single control task
//! - `OrchestratorHandle` is the cloneable command/observe surface
//! - `Phase`, `EngineState` and `EngineEvent` describe what observers see

pub mod orchestrator;
pub mod state;

pub use orchestrator::{EngineParts, InputFactory, Orchestrator, OrchestratorHandle};
pub use state::{EngineEvent, EngineState, Phase};
