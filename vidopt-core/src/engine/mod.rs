//! Transcode engine: one dedicated worker thread per invocation.
//!
//! [`TranscodeEngine::start_transcode`] spawns a named worker running the
//! [`PipelineOrchestrator`] and returns a [`TranscodeHandle`] that receives
//! progress and the terminal outcome over a channel.

pub mod events;
pub mod handle;
pub mod naming;

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use events::{TranscodeEvent, TranscodeId};
pub use handle::TranscodeHandle;
pub use naming::{default_output_name, default_output_path};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span};

use crate::capabilities::CapabilityQueryService;
use crate::config::{EngineConfig, VidoptConfig};
use crate::media::MediaBackend;
use crate::pipeline::{
    DiscoveredTracks, PipelineOrchestrator, TranscodeError, TranscodeRequest, TranscodeResult,
    probe_tracks,
};
use crate::strategy::{Preset, SizeEstimate, StrategySelector};

/// Entry point for running transcodes against one backend.
///
/// Cheap to share behind an `Arc`; concurrent invocations own their own
/// source, codecs and writer and only share the read-only capability cache.
pub struct TranscodeEngine {
    orchestrator: Arc<PipelineOrchestrator>,
    capabilities: Arc<CapabilityQueryService>,
    selector: StrategySelector,
    config: EngineConfig,
}

impl TranscodeEngine {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        capabilities: Arc<CapabilityQueryService>,
        config: &VidoptConfig,
    ) -> Self {
        let orchestrator = PipelineOrchestrator::new(backend, Arc::clone(&capabilities), config);
        Self {
            orchestrator: Arc::new(orchestrator),
            capabilities,
            selector: StrategySelector::new(&config.strategy),
            config: config.engine.clone(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn MediaBackend> {
        self.orchestrator.backend()
    }

    pub fn capabilities(&self) -> &Arc<CapabilityQueryService> {
        &self.capabilities
    }

    /// Estimated output parameters and size for `preset` on this platform.
    pub fn estimate(&self, preset: &Preset) -> SizeEstimate {
        let video = self.capabilities.capabilities_for(&preset.video_mime_type);
        let audio = self.capabilities.capabilities_for(&preset.audio_mime_type);
        self.selector.estimate_size(preset, &video, &audio)
    }

    /// Tracks the pipeline would use for `input`.
    ///
    /// # Errors
    /// - `TranscodeError::Setup` - Input could not be opened or has no video track
    pub fn probe(&self, input: &Path) -> TranscodeResult<DiscoveredTracks> {
        probe_tracks(self.backend().as_ref(), input)
    }

    /// Starts transcoding `input` into `output` on a new worker thread.
    ///
    /// Every failure after the worker started, including setup failures, is
    /// reported as a `Failed` event rather than returned here.
    ///
    /// # Errors
    /// - `VidoptError::Io` - Worker thread could not be spawned
    pub fn start_transcode(
        &self,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        preset: Preset,
    ) -> crate::Result<TranscodeHandle> {
        let id = TranscodeId::new();
        let request = TranscodeRequest::new(input, output, preset);
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut builder = std::thread::Builder::new().name(format!(
            "{}-{}",
            self.config.worker_name_prefix,
            id.short()
        ));
        if let Some(stack_size) = self.config.worker_stack_size {
            builder = builder.stack_size(stack_size);
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let worker_cancel = cancel.clone();
        let worker = builder.spawn(move || {
            run_worker(&orchestrator, id, &request, &worker_cancel, &events_tx);
        })?;

        debug!(transcode_id = %id, "Spawned transcode worker");
        Ok(TranscodeHandle::new(id, cancel, events_rx, worker))
    }
}

impl std::fmt::Debug for TranscodeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeEngine")
            .field("orchestrator", &self.orchestrator)
            .field("config", &self.config)
            .finish()
    }
}

fn run_worker(
    orchestrator: &PipelineOrchestrator,
    id: TranscodeId,
    request: &TranscodeRequest,
    cancel: &CancellationToken,
    events: &mpsc::UnboundedSender<TranscodeEvent>,
) {
    let span = info_span!("transcode", transcode_id = %id);
    let _entered = span.enter();
    info!(
        input = %request.input.display(),
        output = %request.output.display(),
        preset = %request.preset,
        "Transcode started"
    );

    let mut on_progress = |percent: u8| {
        // A dropped handle only means nobody is listening.
        let _ = events.send(TranscodeEvent::Progress { percent });
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        orchestrator.run(request, cancel, &mut on_progress)
    }));

    let event = match outcome {
        Ok(Ok((output, _))) => {
            let _ = events.send(TranscodeEvent::Progress { percent: 100 });
            TranscodeEvent::Completed(output)
        }
        Ok(Err(error)) => {
            if error.is_cancelled() {
                info!("Transcode cancelled");
            } else {
                error!("Transcode failed: {error}");
            }
            TranscodeEvent::Failed { error }
        }
        Err(payload) => {
            let reason = panic_reason(payload.as_ref());
            error!("Transcode worker panicked: {reason}");
            TranscodeEvent::Failed {
                error: TranscodeError::Worker { reason },
            }
        }
    };

    if events.send(event).is_err() {
        debug!("Handle dropped before the outcome was delivered");
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityProvider, EncoderInfo};
    use crate::media::MediaResult;
    use crate::pipeline::SetupError;
    use crate::pipeline::test_mocks::{MockBackend, call_log};

    struct NoEncoders;

    impl CapabilityProvider for NoEncoders {
        fn encoders(&self) -> MediaResult<Vec<EncoderInfo>> {
            Ok(Vec::new())
        }
    }

    fn engine(backend: MockBackend) -> TranscodeEngine {
        let config = VidoptConfig::for_testing();
        let capabilities = Arc::new(CapabilityQueryService::new(
            Arc::new(NoEncoders),
            &config.strategy,
        ));
        TranscodeEngine::new(Arc::new(backend), capabilities, &config)
    }

    #[tokio::test]
    async fn test_events_end_with_completion_after_full_progress() {
        let engine = engine(MockBackend::new(call_log()));
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");

        let mut handle = engine
            .start_transcode("input.mp4", &output, Preset::default())
            .unwrap();

        let mut percents = Vec::new();
        let mut terminal = None;
        while let Some(event) = handle.next_event().await {
            match event {
                TranscodeEvent::Progress { percent } => percents.push(percent),
                other => terminal = Some(other),
            }
        }

        assert!(percents.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(percents.last(), Some(&100));
        match terminal {
            Some(TranscodeEvent::Completed(result)) => {
                assert_eq!(result.output_location, output);
                assert!(result.output_size_bytes > 0);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_setup_failure_is_reported_as_event() {
        let mut backend = MockBackend::new(call_log());
        backend.include_video = false;
        let engine = engine(backend);
        let dir = tempfile::tempdir().unwrap();

        let handle = engine
            .start_transcode("input.mp4", dir.path().join("out.mp4"), Preset::default())
            .unwrap();

        let error = handle.wait().await.unwrap_err();
        assert!(matches!(error, TranscodeError::Setup(SetupError::NoVideoTrack)));
    }

    #[tokio::test]
    async fn test_cancel_after_completion_keeps_outcome() {
        let engine = engine(MockBackend::new(call_log()));
        let dir = tempfile::tempdir().unwrap();

        let mut handle = engine
            .start_transcode("input.mp4", dir.path().join("out.mp4"), Preset::default())
            .unwrap();
        while let Some(event) = handle.next_event().await {
            if let TranscodeEvent::Progress { percent: 100 } = event {
                break;
            }
        }
        handle.cancel();

        assert!(matches!(
            handle.next_event().await,
            Some(TranscodeEvent::Completed(_))
        ));
    }

    #[test]
    fn test_estimate_uses_preset_target() {
        let engine = engine(MockBackend::new(call_log()));
        let estimate = engine.estimate(&Preset::default());
        assert_eq!((estimate.width, estimate.height), (1280, 720));
        assert!(estimate.bytes_per_minute > 0);
    }

    #[test]
    fn test_transcode_ids_are_unique() {
        let first = TranscodeId::new();
        let second = TranscodeId::new();
        assert_ne!(first, second);
        assert_eq!(first.short().len(), 8);
    }
}
