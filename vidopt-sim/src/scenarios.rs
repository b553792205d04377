//! Pre-built transcode scenarios over the simulated platform.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use vidopt_core::capabilities::{CapabilityProvider, CapabilityQueryService};
use vidopt_core::config::VidoptConfig;
use vidopt_core::engine::{TranscodeEngine, TranscodeEvent};
use vidopt_core::media::{CodecRole, MediaBackend, TrackKind};
use vidopt_core::pipeline::{TranscodeError, TranscodeOutput, TranscodeResult};
use vidopt_core::strategy::Preset;

use crate::backend::SimulatedBackend;
use crate::catalogue::SimulatedCatalogue;
use crate::codec::{CodecBehavior, FormatReport};
use crate::error::{SimulationError, SimulationResult};
use crate::faults::{CodecTarget, FaultPlan};
use crate::media::{SimulatedAudio, SimulatedMedia, SimulatedVideo};
use crate::writer::WrittenOutput;

/// Path every scenario registers its input under.
pub const SCENARIO_INPUT: &str = "scenario-input.mp4";

/// A backend, catalogue, input and preset ready to run.
pub struct TranscodeScenario {
    pub name: &'static str,
    pub backend: Arc<SimulatedBackend>,
    pub catalogue: Arc<SimulatedCatalogue>,
    pub input: PathBuf,
    pub preset: Preset,
}

/// Everything observed while running a scenario to its end.
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub progress: Vec<u8>,
    pub result: TranscodeResult<TranscodeOutput>,
    pub written: Option<WrittenOutput>,
}

impl ScenarioOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

impl TranscodeScenario {
    /// Scenario serving `media` from `backend` with the standard catalogue.
    pub fn new(name: &'static str, backend: SimulatedBackend, media: SimulatedMedia) -> Self {
        let backend = backend.with_input(SCENARIO_INPUT, media);
        Self {
            name,
            backend: Arc::new(backend),
            catalogue: Arc::new(SimulatedCatalogue::standard()),
            input: PathBuf::from(SCENARIO_INPUT),
            preset: Preset::default(),
        }
    }

    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = preset;
        self
    }

    pub fn with_catalogue(mut self, catalogue: SimulatedCatalogue) -> Self {
        self.catalogue = Arc::new(catalogue);
        self
    }

    /// Engine over this scenario's backend and catalogue.
    pub fn engine(&self, config: &VidoptConfig) -> TranscodeEngine {
        let provider: Arc<dyn CapabilityProvider> = self.catalogue.clone();
        let backend: Arc<dyn MediaBackend> = self.backend.clone();
        let capabilities = Arc::new(CapabilityQueryService::new(provider, &config.strategy));
        TranscodeEngine::new(backend, capabilities, config)
    }

    /// Runs the scenario into `output`, blocking until the worker finishes.
    ///
    /// Must not be called from within an async runtime.
    ///
    /// # Errors
    /// - `VidoptError::Io` - Worker thread could not be spawned
    pub fn run(
        &self,
        output: &Path,
        config: &VidoptConfig,
    ) -> vidopt_core::Result<ScenarioOutcome> {
        let engine = self.engine(config);
        let mut handle = engine.start_transcode(&self.input, output, self.preset.clone())?;
        info!(scenario = self.name, transcode_id = %handle.id(), "Running scenario");

        let mut progress = Vec::new();
        let mut result = None;
        while let Some(event) = handle.blocking_next_event() {
            match event {
                TranscodeEvent::Progress { percent } => progress.push(percent),
                TranscodeEvent::Completed(output) => result = Some(Ok(output)),
                TranscodeEvent::Failed { error } => result = Some(Err(error)),
            }
        }

        let result = result.unwrap_or_else(|| {
            Err(TranscodeError::Worker {
                reason: format!("scenario {} ended without an outcome", self.name),
            })
        });
        Ok(ScenarioOutcome {
            progress,
            result,
            written: self.backend.last_output(),
        })
    }
}

/// Library of scenarios exercising the pipeline's main paths.
pub struct TranscodeScenarios;

impl TranscodeScenarios {
    /// Names accepted by [`TranscodeScenarios::by_name`].
    pub const NAMES: [&'static str; 7] = [
        "standard",
        "video-only",
        "no-video",
        "late-formats",
        "slow-codecs",
        "failing-encoder",
        "long-running",
    ];

    /// Looks up a scenario by name.
    ///
    /// # Errors
    /// - `SimulationError::UnknownScenario` - `name` is not in [`TranscodeScenarios::NAMES`]
    pub fn by_name(name: &str, seed: u64) -> SimulationResult<TranscodeScenario> {
        let scenario = match name {
            "standard" => Self::standard(seed),
            "video-only" => Self::video_only(seed),
            "no-video" => Self::no_video(seed),
            "late-formats" => Self::late_formats(seed),
            "slow-codecs" => Self::slow_codecs(seed),
            "failing-encoder" => Self::failing_encoder(seed),
            "long-running" => Self::long_running(seed),
            _ => {
                return Err(SimulationError::UnknownScenario {
                    name: name.to_string(),
                });
            }
        };
        Ok(scenario)
    }

    /// Two seconds of 1080p30 video with stereo audio, eager encoders.
    pub fn standard(seed: u64) -> TranscodeScenario {
        TranscodeScenario::new(
            "standard",
            SimulatedBackend::new().with_seed(seed),
            SimulatedMedia::hd_clip(2_000_000).with_seed(seed),
        )
    }

    /// Video without any audio track; a subtitle track is ignored.
    pub fn video_only(seed: u64) -> TranscodeScenario {
        let media = SimulatedMedia::new(1_000_000)
            .with_video(SimulatedVideo::avc(1280, 720, 30))
            .with_other_track("text/vtt")
            .with_seed(seed);
        TranscodeScenario::new("video-only", SimulatedBackend::new().with_seed(seed), media)
    }

    /// Audio only; the transcode must be refused.
    pub fn no_video(seed: u64) -> TranscodeScenario {
        let media = SimulatedMedia::new(1_000_000)
            .with_audio(SimulatedAudio::aac(48_000, 2))
            .with_seed(seed);
        TranscodeScenario::new("no-video", SimulatedBackend::new().with_seed(seed), media)
    }

    /// Encoders only announce their formats once output flows.
    ///
    /// The writer cannot start until the audio pass registers its track, so
    /// every encoded video sample of the first pass is dropped.
    pub fn late_formats(seed: u64) -> TranscodeScenario {
        let encoder = CodecBehavior::encoder().with_format_report(FormatReport::Announced);
        let backend = SimulatedBackend::new()
            .with_seed(seed)
            .with_codec_behavior(CodecRole::Encoder, encoder);
        TranscodeScenario::new(
            "late-formats",
            backend,
            SimulatedMedia::hd_clip(1_000_000).with_seed(seed),
        )
    }

    /// Codecs with latency and jitter and few decoder slots.
    pub fn slow_codecs(seed: u64) -> TranscodeScenario {
        let latency = (Duration::from_millis(1), Duration::from_millis(2));
        let backend = SimulatedBackend::new()
            .with_seed(seed)
            .with_codec_behavior(
                CodecRole::Decoder,
                CodecBehavior::decoder()
                    .with_input_slots(2)
                    .with_latency(latency.0, latency.1),
            )
            .with_codec_behavior(
                CodecRole::Encoder,
                CodecBehavior::encoder().with_latency(latency.0, latency.1),
            );
        TranscodeScenario::new(
            "slow-codecs",
            backend,
            SimulatedMedia::hd_clip(1_000_000).with_seed(seed),
        )
    }

    /// The video encoder fails partway through the first pass.
    pub fn failing_encoder(seed: u64) -> TranscodeScenario {
        let faults = FaultPlan::new().codec_error_after(CodecTarget::encoder(TrackKind::Video), 15);
        TranscodeScenario::new(
            "failing-encoder",
            SimulatedBackend::new().with_seed(seed).with_faults(faults),
            SimulatedMedia::hd_clip(2_000_000).with_seed(seed),
        )
    }

    /// A long clip with slow codecs, for cancellation.
    pub fn long_running(seed: u64) -> TranscodeScenario {
        let latency = Duration::from_millis(2);
        let backend = SimulatedBackend::new()
            .with_seed(seed)
            .with_codec_behavior(
                CodecRole::Decoder,
                CodecBehavior::decoder().with_latency(latency, Duration::ZERO),
            );
        TranscodeScenario::new(
            "long-running",
            backend,
            SimulatedMedia::hd_clip(60_000_000).with_seed(seed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidopt_core::pipeline::SetupError;
    use vidopt_core::test_fixtures::create_temp_output;

    #[test]
    fn test_standard_scenario_completes() {
        let (_dir, output) = create_temp_output();
        let scenario = TranscodeScenarios::standard(1);
        let outcome = scenario.run(&output, &VidoptConfig::for_testing()).unwrap();

        let result = outcome.result.as_ref().unwrap();
        assert!(result.output_size_bytes > 0);
        assert_eq!(outcome.progress.last(), Some(&100));
        assert!(outcome.progress.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(scenario.backend.ledger().is_balanced());
    }

    #[test]
    fn test_no_video_scenario_is_refused() {
        let (_dir, output) = create_temp_output();
        let outcome = TranscodeScenarios::no_video(1)
            .run(&output, &VidoptConfig::for_testing())
            .unwrap();

        assert!(matches!(
            outcome.result,
            Err(TranscodeError::Setup(SetupError::NoVideoTrack))
        ));
        assert!(outcome.written.is_none());
    }

    #[test]
    fn test_unknown_scenario_name() {
        assert!(matches!(
            TranscodeScenarios::by_name("meteor-strike", 0),
            Err(SimulationError::UnknownScenario { .. })
        ));
        for name in TranscodeScenarios::NAMES {
            assert_eq!(TranscodeScenarios::by_name(name, 0).unwrap().name, name);
        }
    }
}
