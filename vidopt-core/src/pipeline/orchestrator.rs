//! Sequences track discovery, encoder selection, the two track passes and
//! teardown for a single transcode.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::{PassExtent, PassWindow, ProgressTracker};
use super::teardown::PipelineResources;
use super::track::{TrackPipeline, TrackStats, register_known_format};
use super::{
    DiscoveredTracks, MuxCoordinator, MuxStats, SetupError, TrackDescriptor, TranscodeError,
    TranscodeResult, discover_tracks,
};
use crate::capabilities::CapabilityQueryService;
use crate::config::{PipelineConfig, VidoptConfig};
use crate::media::{CodecPort, CodecRole, MediaBackend, MediaError, TrackKind};
use crate::strategy::{EncodingTarget, Preset, StrategySelector};

/// What to transcode and how.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub preset: Preset,
}

impl TranscodeRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, preset: Preset) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            preset,
        }
    }
}

/// Successful transcode result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscodeOutput {
    pub output_location: PathBuf,
    pub output_mime_type: String,
    pub output_size_bytes: u64,
}

/// Per-pass details of a finished run, for logs and tests.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub video_target: Option<EncodingTarget>,
    pub audio_target: Option<EncodingTarget>,
    pub video: TrackStats,
    pub audio: Option<TrackStats>,
    pub mux: MuxStats,
}

/// Runs transcodes against one platform backend.
///
/// Holds no per-invocation state; every call to [`PipelineOrchestrator::run`]
/// opens and releases its own source, codecs and writer.
pub struct PipelineOrchestrator {
    backend: Arc<dyn MediaBackend>,
    capabilities: Arc<CapabilityQueryService>,
    selector: StrategySelector,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        capabilities: Arc<CapabilityQueryService>,
        config: &VidoptConfig,
    ) -> Self {
        Self {
            backend,
            capabilities,
            selector: StrategySelector::new(&config.strategy),
            config: config.pipeline.clone(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        &self.backend
    }

    /// Transcodes `request.input` into `request.output`.
    ///
    /// `on_progress` receives non-decreasing percentages below 100; the
    /// caller reports 100 once it has the returned output. Resources are
    /// released before this returns, on every path. Partial output is left
    /// in place on failure.
    ///
    /// # Errors
    /// - `TranscodeError::Setup` - Source, codec or writer could not be prepared
    /// - `TranscodeError::Source` - Source read failed mid-pass
    /// - `TranscodeError::Codec` - A codec failed
    /// - `TranscodeError::Mux` - Writer registration, write or finalization failed
    /// - `TranscodeError::Cancelled` - `cancel` fired before completion
    pub fn run(
        &self,
        request: &TranscodeRequest,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(u8),
    ) -> TranscodeResult<(TranscodeOutput, RunSummary)> {
        let mut resources = PipelineResources::new();
        let result = self.execute(request, cancel, &mut resources, on_progress);
        let teardown = resources.release_all();

        let summary = result?;
        if let Some(error) = teardown.writer_error {
            return Err(error);
        }

        let output_size_bytes = std::fs::metadata(&request.output)
            .map_err(|e| TranscodeError::Mux {
                reason: format!("cannot read output {}: {e}", request.output.display()),
            })?
            .len();

        info!(
            output = %request.output.display(),
            size = output_size_bytes,
            video_written = summary.mux.written(TrackKind::Video),
            audio_written = summary.mux.written(TrackKind::Audio),
            "Transcode finished"
        );

        Ok((
            TranscodeOutput {
                output_location: request.output.clone(),
                output_mime_type: self.backend.output_mime_type().to_string(),
                output_size_bytes,
            },
            summary,
        ))
    }

    fn execute(
        &self,
        request: &TranscodeRequest,
        cancel: &CancellationToken,
        resources: &mut PipelineResources,
        on_progress: &mut dyn FnMut(u8),
    ) -> TranscodeResult<RunSummary> {
        let source = resources.source.insert(
            self.backend
                .open_source(&request.input)
                .map_err(|e| SetupError::SourceOpen {
                    input: request.input.display().to_string(),
                    reason: e.to_string(),
                })?,
        );

        let tracks = discover_tracks(&**source)?;
        let video_target = self.video_target(&request.preset, &tracks.video);
        let audio_target = tracks
            .audio
            .as_ref()
            .map(|audio| self.audio_target(&request.preset, audio));
        info!(
            preset = %request.preset,
            video = %video_target.to_media_format(),
            audio = ?audio_target.as_ref().map(|target| target.to_media_format().to_string()),
            "Selected encoding targets"
        );
        check_cancelled(cancel)?;

        let writer = self
            .backend
            .create_writer(&request.output)
            .map_err(|e| writer_create_error(&request.output, e))?;
        let mux = resources
            .mux
            .insert(MuxCoordinator::new(writer, tracks.expected_kinds()));

        let video_encoder = resources
            .video_encoder
            .insert(self.create_encoder(TrackKind::Video, &video_target)?);
        let video_decoder = resources
            .video_decoder
            .insert(self.create_decoder(&tracks.video, &video_target)?);
        register_known_format(TrackKind::Video, &**video_encoder, mux)?;

        let mut audio_codecs = None;
        if let (Some(audio), Some(target)) = (&tracks.audio, &audio_target) {
            let decoder = resources
                .audio_decoder
                .insert(self.create_decoder(audio, target)?);
            let encoder = resources
                .audio_encoder
                .insert(self.create_encoder(TrackKind::Audio, target)?);
            register_known_format(TrackKind::Audio, &**encoder, mux)?;
            audio_codecs = Some((audio.clone(), decoder, encoder));
        }
        check_cancelled(cancel)?;

        let (video_window, audio_window) =
            PassWindow::split(self.config.video_progress_share, tracks.audio.is_some());
        let mut tracker = ProgressTracker::new();
        if let Some(percent) = tracker.advance(0.0) {
            on_progress(percent);
        }

        let video_extent = pass_extent(&**source, &tracks.video);
        source
            .select_track(tracks.video.index)
            .map_err(|e| TranscodeError::source(TrackKind::Video, e))?;
        let video_stats = {
            let mut pipeline = TrackPipeline::new(
                tracks.video.clone(),
                &mut **source,
                &mut **video_decoder,
                &mut **video_encoder,
                &self.config,
            );
            pipeline.run(mux, cancel, &mut |position| {
                if let Some(fraction) = video_extent.fraction(position) {
                    if let Some(percent) = tracker.advance(video_window.percent(fraction)) {
                        on_progress(percent);
                    }
                }
            })?
        };
        if let Some(percent) = tracker.advance(video_window.end) {
            on_progress(percent);
        }

        let mut audio_stats = None;
        if let (Some((audio, decoder, encoder)), Some(window)) = (audio_codecs, audio_window) {
            check_cancelled(cancel)?;
            let audio_extent = pass_extent(&**source, &audio);
            source
                .unselect_track(tracks.video.index)
                .and_then(|()| source.select_track(audio.index))
                .and_then(|()| source.seek_to(0))
                .map_err(|e| TranscodeError::source(TrackKind::Audio, e))?;

            let mut pipeline = TrackPipeline::new(
                audio,
                &mut **source,
                &mut **decoder,
                &mut **encoder,
                &self.config,
            );
            audio_stats = Some(pipeline.run(mux, cancel, &mut |position| {
                if let Some(fraction) = audio_extent.fraction(position) {
                    if let Some(percent) = tracker.advance(window.percent(fraction)) {
                        on_progress(percent);
                    }
                }
            })?);
            if let Some(percent) = tracker.advance(window.end) {
                on_progress(percent);
            }
        } else {
            debug!("No audio track, skipping audio pass");
        }

        if !mux.is_started() {
            return Err(TranscodeError::Mux {
                reason: "writer never started: not every track reported an output format"
                    .to_string(),
            });
        }

        Ok(RunSummary {
            video_target: Some(video_target),
            audio_target,
            video: video_stats,
            audio: audio_stats,
            mux: mux.stats().clone(),
        })
    }

    fn video_target(&self, preset: &Preset, video: &TrackDescriptor) -> EncodingTarget {
        let capabilities = self.capabilities.capabilities_for(&preset.video_mime_type);
        self.selector
            .select_video(preset, &capabilities, Some(&video.source_format))
    }

    fn audio_target(&self, preset: &Preset, audio: &TrackDescriptor) -> EncodingTarget {
        let capabilities = self.capabilities.capabilities_for(&preset.audio_mime_type);
        self.selector
            .select_audio(preset, &capabilities, Some(&audio.source_format))
    }

    fn create_encoder(
        &self,
        kind: TrackKind,
        target: &EncodingTarget,
    ) -> TranscodeResult<Box<dyn CodecPort>> {
        let encoder = self
            .backend
            .create_encoder(&target.to_media_format())
            .map_err(|e| codec_create_error(kind, CodecRole::Encoder, e))?;
        debug!(track = %kind, codec = encoder.name(), "Encoder started");
        Ok(encoder)
    }

    fn create_decoder(
        &self,
        track: &TrackDescriptor,
        target: &EncodingTarget,
    ) -> TranscodeResult<Box<dyn CodecPort>> {
        let decoder = self
            .backend
            .create_decoder(&track.source_format, &target.decoder_output_format())
            .map_err(|e| codec_create_error(track.kind, CodecRole::Decoder, e))?;
        debug!(track = %track.kind, codec = decoder.name(), "Decoder started");
        Ok(decoder)
    }
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

fn check_cancelled(cancel: &CancellationToken) -> TranscodeResult<()> {
    if cancel.is_cancelled() {
        return Err(TranscodeError::Cancelled);
    }
    Ok(())
}

fn pass_extent(source: &dyn crate::media::MediaSource, track: &TrackDescriptor) -> PassExtent {
    let extent = PassExtent {
        duration_us: track.source_format.duration_us,
        sample_count: source.sample_count_hint(track.index),
    };
    if extent.duration_us.is_none() && extent.sample_count.is_none() {
        warn!(
            track = %track.kind,
            "Track length unknown, progress will not advance during the pass"
        );
    }
    extent
}

fn codec_create_error(kind: TrackKind, role: CodecRole, error: MediaError) -> TranscodeError {
    SetupError::CodecCreate {
        kind,
        role,
        reason: error.to_string(),
    }
    .into()
}

fn writer_create_error(output: &Path, error: MediaError) -> TranscodeError {
    SetupError::WriterCreate {
        output: output.display().to_string(),
        reason: error.to_string(),
    }
    .into()
}

/// Tracks discovered for `input` without transcoding, for probing callers.
///
/// # Errors
/// - `TranscodeError::Setup` - Source could not be opened or has no video track
pub fn probe_tracks(backend: &dyn MediaBackend, input: &Path) -> TranscodeResult<DiscoveredTracks> {
    let mut source = backend
        .open_source(input)
        .map_err(|e| SetupError::SourceOpen {
            input: input.display().to_string(),
            reason: e.to_string(),
        })?;
    let tracks = discover_tracks(&*source);
    if let Err(e) = source.close() {
        warn!("Failed to close probed source: {e}");
    }
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityProvider, EncoderInfo};
    use crate::media::MediaResult;
    use crate::pipeline::test_mocks::{MockBackend, call_log};

    struct NoEncoders;

    impl CapabilityProvider for NoEncoders {
        fn encoders(&self) -> MediaResult<Vec<EncoderInfo>> {
            Ok(Vec::new())
        }
    }

    fn orchestrator(backend: MockBackend) -> PipelineOrchestrator {
        let config = VidoptConfig::for_testing();
        let capabilities = Arc::new(CapabilityQueryService::new(
            Arc::new(NoEncoders),
            &config.strategy,
        ));
        PipelineOrchestrator::new(Arc::new(backend), capabilities, &config)
    }

    fn request(dir: &tempfile::TempDir) -> TranscodeRequest {
        TranscodeRequest::new("input.mp4", dir.path().join("out.mp4"), Preset::default())
    }

    #[test]
    fn test_run_writes_both_tracks_and_releases_in_order() {
        let log = call_log();
        let orchestrator = orchestrator(MockBackend::new(log.clone()));
        let dir = tempfile::tempdir().unwrap();
        let mut progress = Vec::new();

        let (output, summary) = orchestrator
            .run(&request(&dir), &CancellationToken::new(), &mut |p| {
                progress.push(p)
            })
            .unwrap();

        assert_eq!(output.output_mime_type, "video/mp4");
        assert!(output.output_size_bytes > 0);
        assert_eq!(summary.mux.written(TrackKind::Video), 30);
        assert_eq!(summary.mux.written(TrackKind::Audio), 43);
        assert_eq!(
            summary.video_target.map(|t| (t.width, t.height)),
            Some((Some(1280), Some(720)))
        );

        assert_eq!(progress.first(), Some(&0));
        assert!(progress.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(progress.iter().all(|p| *p < 100));
        assert_eq!(progress.last(), Some(&99));

        let log = log.lock();
        let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();
        assert!(position("video/avc-decoder.close") < position("source.close"));
        assert!(position("audio/mp4a-latm-encoder.close") < position("source.close"));
        assert!(position("source.close") < position("writer.stop"));
        assert!(position("writer.stop") < position("writer.close"));
        assert_eq!(log.iter().filter(|e| *e == "writer.close").count(), 1);
    }

    #[test]
    fn test_missing_video_fails_before_any_codec() {
        let log = call_log();
        let mut backend = MockBackend::new(log.clone());
        backend.include_video = false;
        let created = backend.created_codecs.clone();
        let orchestrator = orchestrator(backend);
        let dir = tempfile::tempdir().unwrap();

        let result = orchestrator.run(&request(&dir), &CancellationToken::new(), &mut |_| {});

        assert!(matches!(
            result,
            Err(TranscodeError::Setup(SetupError::NoVideoTrack))
        ));
        assert!(created.lock().is_empty());
        assert_eq!(*log.lock(), vec!["source.close".to_string()]);
    }

    #[test]
    fn test_cancel_before_start_creates_nothing() {
        let log = call_log();
        let backend = MockBackend::new(log.clone());
        let created = backend.created_codecs.clone();
        let orchestrator = orchestrator(backend);
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator.run(&request(&dir), &cancel, &mut |_| {});

        assert!(matches!(result, Err(TranscodeError::Cancelled)));
        assert!(created.lock().is_empty());
    }

    #[test]
    fn test_late_formats_drop_video_samples() {
        let log = call_log();
        let mut backend = MockBackend::new(log.clone());
        backend.eager_formats = false;
        let orchestrator = orchestrator(backend);
        let dir = tempfile::tempdir().unwrap();

        let (_, summary) = orchestrator
            .run(&request(&dir), &CancellationToken::new(), &mut |_| {})
            .unwrap();

        assert_eq!(summary.mux.written(TrackKind::Video), 0);
        assert_eq!(summary.mux.dropped(TrackKind::Video), 30);
        assert_eq!(summary.mux.written(TrackKind::Audio), 43);
    }

    #[test]
    fn test_late_format_without_audio_keeps_video() {
        let log = call_log();
        let mut backend = MockBackend::new(log.clone());
        backend.eager_formats = false;
        backend.audio_frames = None;
        let orchestrator = orchestrator(backend);
        let dir = tempfile::tempdir().unwrap();

        let (_, summary) = orchestrator
            .run(&request(&dir), &CancellationToken::new(), &mut |_| {})
            .unwrap();

        assert!(summary.audio.is_none());
        assert_eq!(summary.mux.written(TrackKind::Video), 30);
    }

    #[test]
    fn test_codec_release_failure_does_not_fail_run() {
        let log = call_log();
        let mut backend = MockBackend::new(log.clone());
        backend.fail_video_decoder_close = true;
        let orchestrator = orchestrator(backend);
        let dir = tempfile::tempdir().unwrap();

        let result = orchestrator.run(&request(&dir), &CancellationToken::new(), &mut |_| {});

        assert!(result.is_ok());
        let log = log.lock();
        assert!(log.iter().any(|e| e == "audio/mp4a-latm-decoder.close"));
        assert!(log.iter().any(|e| e == "writer.close"));
    }

    #[test]
    fn test_probe_tracks_reports_audio() {
        let log = call_log();
        let backend = MockBackend::new(log.clone());

        let tracks = probe_tracks(&backend, Path::new("input.mp4")).unwrap();

        assert_eq!(tracks.video.index, 0);
        assert_eq!(tracks.audio.map(|audio| audio.index), Some(1));
        assert_eq!(*log.lock(), vec!["source.close".to_string()]);
    }
}
