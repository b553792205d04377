//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Subcommand};
use tracing::{error, info, warn};
use vidopt_core::capabilities::{CapabilityProvider, CapabilityQueryService};
use vidopt_core::config::VidoptConfig;
use vidopt_core::engine::{TranscodeEngine, TranscodeEvent, TranscodeHandle, default_output_path};
use vidopt_core::media::{MediaBackend, mime};
use vidopt_core::strategy::{
    NAMED_RESOLUTIONS, Preset, Quality, StrategyError, StrategySelector, parse_audio_bitrate,
};
use vidopt_sim::{SimulatedBackend, SimulatedCatalogue, SimulatedMedia, TranscodeScenarios};

/// Length of the clip served for every path in simulation mode.
const SIMULATED_CLIP_US: i64 = 10_000_000;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Transcode a video file
    Transcode {
        /// Input media file
        #[arg(required_unless_present = "scenario")]
        input: Option<PathBuf>,
        /// Output file (defaults to transcoded_<timestamp>.mp4 next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        preset: PresetArgs,
        /// Use the simulated platform instead of libav
        #[arg(long)]
        simulate: bool,
        /// Run a named simulation scenario (implies --simulate)
        #[arg(long)]
        scenario: Option<String>,
        /// Seed for simulated media and codec timing
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// List encoders and their effective ranges
    Capabilities {
        /// Only show encoders for this mime type or codec name
        #[arg(long)]
        mime: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Use the simulated platform instead of libav
        #[arg(long)]
        simulate: bool,
    },
    /// Estimate target parameters and output size per minute
    Estimate {
        #[command(flatten)]
        preset: PresetArgs,
        /// Use the simulated platform instead of libav
        #[arg(long)]
        simulate: bool,
    },
    /// List named resolutions and preset syntax
    Presets,
}

/// Preset selection shared by `transcode` and `estimate`.
///
/// `--preset` sets every field at once; the individual flags override it.
#[derive(Args, Debug, Clone, Default)]
pub struct PresetArgs {
    /// Preset string, e.g. 720p/Medium/30fps/128kbps or "original"
    #[arg(short, long)]
    pub preset: Option<String>,
    /// Target resolution: original, 360p..4K or WxH
    #[arg(long)]
    pub resolution: Option<String>,
    /// Quality tier: high, medium or low
    #[arg(long)]
    pub quality: Option<String>,
    /// Target frame rate, e.g. 30fps or original
    #[arg(long)]
    pub frame_rate: Option<String>,
    /// Audio bitrate, e.g. 128kbps
    #[arg(long)]
    pub audio_bitrate: Option<String>,
    /// Video format: avc, hevc, vp9, av1 or a mime type
    #[arg(long)]
    pub format: Option<String>,
}

impl PresetArgs {
    /// Builds the preset from the base string and the overriding flags.
    ///
    /// # Errors
    /// - `StrategyError` - Any value fails to parse or the format is unknown
    pub fn to_preset(&self) -> Result<Preset, StrategyError> {
        let mut preset = match &self.preset {
            Some(text) => text.parse()?,
            None => Preset::default(),
        };
        if let Some(resolution) = &self.resolution {
            preset.resolution = resolution.parse()?;
        }
        if let Some(quality) = &self.quality {
            preset.quality = quality.parse()?;
        }
        if let Some(frame_rate) = &self.frame_rate {
            preset.frame_rate = frame_rate.parse()?;
        }
        if let Some(bitrate) = &self.audio_bitrate {
            preset.audio_bitrate_bps = parse_audio_bitrate(bitrate)?;
        }
        if let Some(format) = &self.format {
            preset.video_mime_type = video_mime_type(format).ok_or_else(|| {
                StrategyError::InvalidPreset {
                    input: format.clone(),
                    reason: "unknown video format".to_string(),
                }
            })?;
        }
        Ok(preset)
    }
}

/// Maps a codec short name or a `video/*` mime type to the mime type.
pub fn video_mime_type(format: &str) -> Option<String> {
    let lower = format.trim().to_lowercase();
    let mime_type = match lower.as_str() {
        "avc" | "h264" | "h.264" => mime::VIDEO_AVC,
        "hevc" | "h265" | "h.265" => mime::VIDEO_HEVC,
        "vp9" => mime::VIDEO_VP9,
        "av1" => mime::VIDEO_AV1,
        other if other.starts_with("video/") => return Some(other.to_string()),
        _ => return None,
    };
    Some(mime_type.to_string())
}

/// Backend and capability provider a command runs against.
struct Platform {
    backend: Arc<dyn MediaBackend>,
    provider: Arc<dyn CapabilityProvider>,
}

impl Platform {
    fn simulated(seed: u64) -> Self {
        let media = SimulatedMedia::hd_clip(SIMULATED_CLIP_US).with_seed(seed);
        let backend = SimulatedBackend::new()
            .with_seed(seed)
            .with_fallback_input(media);
        Self {
            backend: Arc::new(backend),
            provider: Arc::new(SimulatedCatalogue::standard()),
        }
    }

    #[cfg(feature = "ffmpeg")]
    fn native() -> anyhow::Result<Self> {
        let backend = vidopt_core::ffmpeg::FfmpegBackend::new()
            .context("failed to initialize libav")?
            .with_hardware_preference(true);
        Ok(Self {
            backend: Arc::new(backend.clone()),
            provider: Arc::new(backend),
        })
    }

    #[cfg(not(feature = "ffmpeg"))]
    fn native() -> anyhow::Result<Self> {
        warn!("Built without the ffmpeg feature, using the simulated platform");
        Ok(Self::simulated(0))
    }

    fn select(simulate: bool, seed: u64) -> anyhow::Result<Self> {
        if simulate {
            Ok(Self::simulated(seed))
        } else {
            Self::native()
        }
    }

    fn engine(self, config: &VidoptConfig) -> TranscodeEngine {
        let capabilities = Arc::new(CapabilityQueryService::new(self.provider, &config.strategy));
        TranscodeEngine::new(self.backend, capabilities, config)
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let config = VidoptConfig::from_env();
    match command {
        Commands::Transcode {
            input,
            output,
            preset,
            simulate,
            scenario,
            seed,
        } => {
            let preset = preset.to_preset()?;
            transcode(&config, input, output, preset, simulate, scenario, seed).await
        }
        Commands::Capabilities {
            mime,
            json,
            simulate,
        } => show_capabilities(&config, mime, json, simulate),
        Commands::Estimate { preset, simulate } => {
            let preset = preset.to_preset()?;
            show_estimate(&config, &preset, simulate)
        }
        Commands::Presets => {
            list_presets();
            Ok(())
        }
    }
}

/// Runs one transcode, printing progress and the completion record.
///
/// # Errors
/// - The worker could not be spawned
/// - The transcode failed or was cancelled
pub async fn transcode(
    config: &VidoptConfig,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    preset: Preset,
    simulate: bool,
    scenario: Option<String>,
    seed: u64,
) -> anyhow::Result<()> {
    let (engine, input) = match scenario {
        Some(name) => {
            let scenario = TranscodeScenarios::by_name(&name, seed)?;
            if input.is_some() {
                warn!(scenario = %name, "Input path ignored, scenario provides its own media");
            }
            (scenario.engine(config), scenario.input.clone())
        }
        None => {
            let input = input.context("an input file is required")?;
            (Platform::select(simulate, seed)?.engine(config), input)
        }
    };

    let output = output.unwrap_or_else(|| default_output_path(output_dir(&input)));
    println!("Transcoding {} -> {}", input.display(), output.display());
    println!("  Preset: {preset}");
    println!("  Backend: {}", engine.backend().name());

    let handle = engine.start_transcode(&input, &output, preset)?;
    info!(transcode_id = %handle.id(), "Transcode submitted");
    follow_transcode(handle).await
}

async fn follow_transcode(mut handle: TranscodeHandle) -> anyhow::Result<()> {
    let mut cancelled = false;
    loop {
        tokio::select! {
            event = handle.next_event() => {
                let Some(event) = event else {
                    bail!("transcode worker exited without an outcome");
                };
                match event {
                    TranscodeEvent::Progress { percent } => {
                        eprint!("\rProgress: {percent:>3}%");
                    }
                    TranscodeEvent::Completed(output) => {
                        eprintln!();
                        println!("Transcode completed");
                        println!("{}", serde_json::to_string_pretty(&output)?);
                        return Ok(());
                    }
                    TranscodeEvent::Failed { error } => {
                        eprintln!();
                        if error.is_cancelled() {
                            bail!("transcode cancelled");
                        }
                        error!(%error, "Transcode failed");
                        bail!("{}", error.user_message());
                    }
                }
            }
            signal = tokio::signal::ctrl_c(), if !cancelled => {
                signal.context("failed to listen for Ctrl-C")?;
                eprintln!();
                println!("Cancelling...");
                handle.cancel();
                cancelled = true;
            }
        }
    }
}

fn output_dir(input: &Path) -> &Path {
    match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Lists encoders and the effective ranges the strategy would use.
///
/// # Errors
/// - The platform failed to initialize
/// - JSON serialization failed
pub fn show_capabilities(
    config: &VidoptConfig,
    filter: Option<String>,
    json: bool,
    simulate: bool,
) -> anyhow::Result<()> {
    let engine = Platform::select(simulate, 0)?.engine(config);
    let capabilities = engine.capabilities();

    let filter = filter.map(|text| video_mime_type(&text).unwrap_or_else(|| text.to_lowercase()));
    let encoders: Vec<_> = capabilities
        .encoders()
        .iter()
        .filter(|encoder| match &filter {
            Some(mime_type) => encoder.mime_type.eq_ignore_ascii_case(mime_type),
            None => true,
        })
        .cloned()
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&encoders)?);
        return Ok(());
    }

    println!("Encoders ({})", engine.backend().name());
    println!("{:-<60}", "");
    if encoders.is_empty() {
        println!("No encoders found.");
    }
    for encoder in &encoders {
        let hardware = if encoder.hardware_accelerated { " [hw]" } else { "" };
        println!("{:<24} {}{hardware}", encoder.name, encoder.mime_type);
    }

    let selector = StrategySelector::new(&config.strategy);
    let mime_types = match &filter {
        Some(mime_type) => vec![mime_type.clone()],
        None => capabilities.supported_video_mime_types(),
    };
    for mime_type in mime_types {
        let effective = capabilities.capabilities_for(&mime_type);
        println!();
        println!("{mime_type}");
        println!(
            "  Encoder: {}",
            effective.encoder_name.as_deref().unwrap_or("none (fallback ranges)")
        );
        println!(
            "  Video bitrate: {}-{} bps",
            effective.bitrate_range.min, effective.bitrate_range.max
        );
        println!(
            "  Frame rate: {}-{} fps",
            effective.frame_rate_range.min, effective.frame_rate_range.max
        );
        let resolutions: Vec<String> = selector
            .supported_resolutions(&effective)
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("  Resolutions: {}", resolutions.join(", "));
    }
    Ok(())
}

/// Prints the target chosen for `preset` and its size per minute.
///
/// # Errors
/// - The platform failed to initialize
pub fn show_estimate(config: &VidoptConfig, preset: &Preset, simulate: bool) -> anyhow::Result<()> {
    let engine = Platform::select(simulate, 0)?.engine(config);
    let estimate = engine.estimate(preset);

    println!("Preset: {preset}");
    println!("  Resolution: {}x{}", estimate.width, estimate.height);
    println!("  Video bitrate: {} kbps", estimate.video_bitrate_bps / 1_000);
    println!("  Audio bitrate: {} kbps", estimate.audio_bitrate_bps / 1_000);
    println!("  Estimated size: {}", estimate.describe());
    Ok(())
}

/// Prints the named resolutions and preset syntax.
pub fn list_presets() {
    println!("Resolutions");
    println!("{:-<40}", "");
    println!("{:<8} source dimensions", "original");
    for named in NAMED_RESOLUTIONS {
        println!("{:<8} {}x{}", named.label, named.width, named.height);
    }

    println!();
    println!("Quality tiers");
    println!("{:-<40}", "");
    for quality in [Quality::High, Quality::Medium, Quality::Low] {
        println!("{:<8} x{:.1} bitrate", quality.to_string(), quality.multiplier());
    }

    println!();
    println!("Preset syntax: resolution[/quality[/fps[/audio]]]");
    println!("  default: {}", Preset::default());
    println!("  e.g.     1080p/High/60fps/192kbps");
    println!("  scenarios (--scenario): {}", TranscodeScenarios::NAMES.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use vidopt_core::strategy::{FrameRate, Resolution};

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: Commands,
    }

    #[test]
    fn test_preset_flags_override_preset_string() {
        let args = PresetArgs {
            preset: Some("1080p/High/60fps/192kbps".to_string()),
            quality: Some("low".to_string()),
            format: Some("hevc".to_string()),
            ..Default::default()
        };
        let preset = args.to_preset().unwrap();

        assert_eq!(preset.resolution, Resolution::named("1080p").unwrap());
        assert_eq!(preset.quality, Quality::Low);
        assert_eq!(preset.frame_rate, FrameRate::Fixed(60));
        assert_eq!(preset.audio_bitrate_bps, 192_000);
        assert_eq!(preset.video_mime_type, mime::VIDEO_HEVC);
    }

    #[test]
    fn test_invalid_preset_values_are_rejected() {
        let args = PresetArgs {
            resolution: Some("huge".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            args.to_preset(),
            Err(StrategyError::InvalidResolution { .. })
        ));

        let args = PresetArgs {
            format: Some("mpeg2".to_string()),
            ..Default::default()
        };
        assert!(matches!(args.to_preset(), Err(StrategyError::InvalidPreset { .. })));
    }

    #[test]
    fn test_video_mime_type_aliases() {
        assert_eq!(video_mime_type("H264").as_deref(), Some(mime::VIDEO_AVC));
        assert_eq!(video_mime_type("av1").as_deref(), Some(mime::VIDEO_AV1));
        assert_eq!(video_mime_type("video/custom").as_deref(), Some("video/custom"));
        assert_eq!(video_mime_type("audio/aac"), None);
    }

    #[test]
    fn test_transcode_requires_input_or_scenario() {
        assert!(TestCli::try_parse_from(["vidopt", "transcode"]).is_err());

        let cli =
            TestCli::try_parse_from(["vidopt", "transcode", "--scenario", "standard"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Transcode { input: None, scenario: Some(_), .. }
        ));
    }

    #[test]
    fn test_output_dir_of_bare_file_name() {
        assert_eq!(output_dir(Path::new("clip.mp4")), Path::new("."));
        assert_eq!(output_dir(Path::new("/videos/clip.mp4")), Path::new("/videos"));
    }

    #[tokio::test]
    async fn test_simulated_transcode_completes() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        let preset = Preset::default();

        transcode(
            &VidoptConfig::for_testing(),
            Some(PathBuf::from("clip.mov")),
            Some(output.clone()),
            preset,
            true,
            None,
            7,
        )
        .await
        .unwrap();

        assert!(output.exists());
    }
}
