//! Vidopt Simulation - Deterministic media platform for pipeline testing.
//!
//! Implements the `vidopt-core` platform seams without any real codecs:
//! sources generate seeded compressed samples, codecs turn each input into
//! one output after a configurable delay, and the writer produces a real
//! file in a simple record layout. Faults can be injected at every seam and
//! a shared ledger records each resource's lifecycle.
//!
//! # Example
//!
//! ```rust,no_run
//! use vidopt_core::config::VidoptConfig;
//! use vidopt_sim::TranscodeScenarios;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let scenario = TranscodeScenarios::standard(42);
//! let outcome = scenario.run("out.mp4".as_ref(), &VidoptConfig::for_testing())?;
//! assert!(outcome.is_success());
//! assert!(scenario.backend.ledger().is_balanced());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod catalogue;
pub mod codec;
pub mod error;
pub mod faults;
pub mod ledger;
pub mod media;
pub mod scenarios;
pub mod source;
pub mod writer;

pub use backend::{SUPPORTED_MIME_TYPES, SimulatedBackend};
pub use catalogue::SimulatedCatalogue;
pub use codec::{CodecBehavior, FormatReport, SimulatedCodec};
pub use error::{SimulationError, SimulationResult};
pub use faults::{CodecFaults, CodecTarget, FaultPlan};
pub use ledger::{LedgerAction, LedgerEntry, ResourceId, ResourceKind, ResourceLedger};
pub use media::{SimulatedAudio, SimulatedMedia, SimulatedTrack, SimulatedVideo};
pub use scenarios::{SCENARIO_INPUT, ScenarioOutcome, TranscodeScenario, TranscodeScenarios};
pub use source::SimulatedSource;
pub use writer::{SimulatedWriter, WrittenOutput, WrittenSample};
