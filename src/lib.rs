//! Cue Rehearsal - record spoken takes in sync with a scripted timeline.
//!
//! This is the engine crate behind the rehearsal app. It captures microphone
//! takes against a cue timeline, persists them through a pluggable store and
//! replays them with the matching cues and optional video.

pub mod capture;
pub mod config;
pub mod playback;
pub mod recorder;
pub mod store;
pub mod timeline;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use config::EngineConfig;
pub use recorder::{EngineEvent, EngineParts, EngineState, Orchestrator, OrchestratorHandle, Phase};
pub use store::{DirectoryStore, RecordingStore, Take, TakeId};
pub use timeline::{DisplayPayload, TimelineDocument, TimelineIndex, TimelineProvider};
pub use utils::{EngineError, EngineResult, ErrorResponse};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter. Calling it twice is a no-op.
pub fn init_tracing() {
    let result = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cue_rehearsal=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::info!("Cue Rehearsal engine v{}", env!("CARGO_PKG_VERSION"));
    }
}
