//! Transcode pipeline: discovery, per-track pumping, muxing and teardown.
//!
//! A transcode runs two sequential passes over one source, video first and
//! then audio, each through its own decoder/encoder pair, into a single
//! container writer shared through [`MuxCoordinator`].

pub mod discovery;
pub mod error;
pub mod mux;
pub mod orchestrator;
pub mod progress;
pub mod teardown;
pub mod track;

#[cfg(test)]
pub(crate) mod test_mocks;

pub use discovery::{DiscoveredTracks, TrackDescriptor, discover_tracks};
pub use error::{SetupError, TranscodeError, TranscodeResult};
pub use mux::{MuxCoordinator, MuxStats};
pub use orchestrator::{
    PipelineOrchestrator, RunSummary, TranscodeOutput, TranscodeRequest, probe_tracks,
};
pub use progress::{PassExtent, PassPosition, PassWindow, ProgressTracker};
pub use teardown::{PipelineResources, TeardownReport};
pub use track::{DrainState, TrackPipeline, TrackStats, register_known_format};
