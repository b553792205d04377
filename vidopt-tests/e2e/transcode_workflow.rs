//! Engine workflows over the simulated platform.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use vidopt_core::capabilities::{CapabilityProvider, CapabilityQueryService};
use vidopt_core::config::VidoptConfig;
use vidopt_core::engine::{TranscodeEngine, TranscodeEvent, default_output_path};
use vidopt_core::media::{CodecRole, MediaBackend, TrackKind};
use vidopt_core::pipeline::TranscodeError;
use vidopt_core::strategy::Preset;
use vidopt_sim::{
    CodecBehavior, FormatReport, LedgerAction, ResourceKind, SimulatedBackend, SimulatedCatalogue,
    SimulatedMedia, TranscodeScenario, TranscodeScenarios,
};

fn engine(backend: SimulatedBackend, catalogue: Arc<SimulatedCatalogue>) -> TranscodeEngine {
    let config = VidoptConfig::for_testing();
    let provider: Arc<dyn CapabilityProvider> = catalogue;
    let backend: Arc<dyn MediaBackend> = Arc::new(backend);
    let capabilities = Arc::new(CapabilityQueryService::new(provider, &config.strategy));
    TranscodeEngine::new(backend, capabilities, &config)
}

#[tokio::test]
async fn test_transcode_to_default_output_name() {
    let dir = TempDir::new().unwrap();
    let backend =
        SimulatedBackend::new().with_input("holiday.mov", SimulatedMedia::hd_clip(1_500_000));
    let engine = engine(backend, Arc::new(SimulatedCatalogue::standard()));

    let probed = engine.probe(Path::new("holiday.mov")).unwrap();
    assert_eq!(probed.video.kind, TrackKind::Video);
    assert!(probed.audio.is_some());

    let output = default_output_path(dir.path());
    let name = output.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("transcoded_") && name.ends_with(".mp4"));

    let mut handle = engine
        .start_transcode("holiday.mov", &output, Preset::default())
        .unwrap();
    let mut percents = Vec::new();
    let mut completed = None;
    while let Some(event) = handle.next_event().await {
        let terminal = event.is_terminal();
        match event {
            TranscodeEvent::Progress { percent } => percents.push(percent),
            TranscodeEvent::Completed(result) => completed = Some(result),
            TranscodeEvent::Failed { error } => panic!("transcode failed: {error}"),
        }
        if terminal {
            break;
        }
    }

    let completed = completed.unwrap();
    assert_eq!(completed.output_location, output);
    assert!(completed.output_size_bytes > 0);
    assert_eq!(percents.last(), Some(&100));

    let record = serde_json::to_value(&completed).unwrap();
    assert_eq!(record["output_mime_type"], "video/mp4");
}

#[tokio::test]
async fn test_wait_returns_terminal_outcome() {
    let dir = TempDir::new().unwrap();
    let scenario = TranscodeScenarios::failing_encoder(6);
    let engine = scenario.engine(&VidoptConfig::for_testing());

    let handle = engine
        .start_transcode(&scenario.input, dir.path().join("out.mp4"), Preset::default())
        .unwrap();
    let error = handle.wait().await.unwrap_err();

    assert!(matches!(error, TranscodeError::Codec { track: TrackKind::Video, .. }));
    assert!(!error.is_cancelled());
    assert!(!error.user_message().is_empty());
}

#[tokio::test]
async fn test_cancel_mid_pass() {
    let dir = TempDir::new().unwrap();
    let scenario = TranscodeScenarios::long_running(1);
    let engine = scenario.engine(&VidoptConfig::for_testing());

    let mut handle = engine
        .start_transcode(&scenario.input, dir.path().join("out.mp4"), Preset::default())
        .unwrap();

    // Let the video pass get going before cancelling.
    loop {
        match handle.next_event().await {
            Some(TranscodeEvent::Progress { percent }) if percent >= 1 => break,
            Some(TranscodeEvent::Progress { .. }) => {}
            other => panic!("unexpected event before cancel: {other:?}"),
        }
    }
    handle.cancel();

    let error = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(error.is_cancelled());

    // The worker released everything it opened before reporting.
    let ledger = scenario.backend.ledger();
    assert!(ledger.is_balanced(), "unreleased: {:?}", ledger.unreleased());
    assert!(ledger.released_twice().is_empty());
}

#[tokio::test]
async fn test_cancel_before_writer_start_leaves_writer_unstarted() {
    let dir = TempDir::new().unwrap();
    // Encoders announce their format only once data flows, so the writer
    // waits on the audio track for the whole video pass.
    let backend = SimulatedBackend::new()
        .with_seed(4)
        .with_codec_behavior(
            CodecRole::Decoder,
            CodecBehavior::decoder().with_latency(Duration::from_millis(2), Duration::ZERO),
        )
        .with_codec_behavior(
            CodecRole::Encoder,
            CodecBehavior::encoder().with_format_report(FormatReport::Announced),
        );
    let scenario = TranscodeScenario::new(
        "late-cancel",
        backend,
        SimulatedMedia::hd_clip(60_000_000).with_seed(4),
    );
    let engine = scenario.engine(&VidoptConfig::for_testing());

    let mut handle = engine
        .start_transcode(&scenario.input, dir.path().join("out.mp4"), Preset::default())
        .unwrap();
    loop {
        match handle.next_event().await {
            Some(TranscodeEvent::Progress { percent }) if percent >= 1 => break,
            Some(TranscodeEvent::Progress { .. }) => {}
            other => panic!("unexpected event before cancel: {other:?}"),
        }
    }
    handle.cancel();

    let error = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(error.is_cancelled());

    let ledger = scenario.backend.ledger();
    assert_eq!(ledger.count(ResourceKind::Writer, LedgerAction::Start), 0);
    assert_eq!(ledger.count(ResourceKind::Writer, LedgerAction::Stop), 0);
    assert_eq!(ledger.count(ResourceKind::Writer, LedgerAction::Release), 1);
    assert!(ledger.is_balanced(), "unreleased: {:?}", ledger.unreleased());
    assert!(ledger.released_twice().is_empty());
}

#[tokio::test]
async fn test_cancellation_token_before_first_sample() {
    let dir = TempDir::new().unwrap();
    let scenario = TranscodeScenarios::long_running(2);
    let engine = scenario.engine(&VidoptConfig::for_testing());

    let handle = engine
        .start_transcode(&scenario.input, dir.path().join("out.mp4"), Preset::default())
        .unwrap();
    handle.cancellation_token().cancel();

    let error = handle.wait().await.unwrap_err();
    assert!(matches!(error, TranscodeError::Cancelled));
}

#[tokio::test]
async fn test_concurrent_transcodes_share_capability_cache() {
    let dir = TempDir::new().unwrap();
    let catalogue = Arc::new(SimulatedCatalogue::standard());
    let backend = SimulatedBackend::new().with_fallback_input(SimulatedMedia::hd_clip(1_000_000));
    let engine = engine(backend, Arc::clone(&catalogue));

    let handles: Vec<_> = (0..3)
        .map(|i| {
            engine
                .start_transcode(
                    format!("input-{i}.mp4"),
                    dir.path().join(format!("out-{i}.mp4")),
                    Preset::default(),
                )
                .unwrap()
        })
        .collect();

    let ids: Vec<_> = handles.iter().map(|handle| handle.id()).collect();
    assert_ne!(ids[0], ids[1]);

    for handle in handles {
        let output = handle.wait().await.unwrap();
        assert!(output.output_location.exists());
    }
    assert_eq!(catalogue.query_count(), 1);
}

#[tokio::test]
async fn test_missing_input_fails_through_events() {
    let dir = TempDir::new().unwrap();
    let engine = engine(SimulatedBackend::new(), Arc::new(SimulatedCatalogue::standard()));

    let mut handle = engine
        .start_transcode("missing.mp4", dir.path().join("out.mp4"), Preset::default())
        .unwrap();
    let event = handle.next_event().await.unwrap();

    assert!(event.is_terminal());
    assert!(event.message().unwrap().contains("missing.mp4"));
    assert!(handle.next_event().await.is_none());
}

#[test]
fn test_estimate_reflects_quality() {
    let engine = engine(SimulatedBackend::new(), Arc::new(SimulatedCatalogue::standard()));

    let high = engine.estimate(&"1080p/High".parse().unwrap());
    let low = engine.estimate(&"1080p/Low".parse().unwrap());

    assert_eq!((high.width, high.height), (1920, 1080));
    assert!(high.video_bitrate_bps > low.video_bitrate_bps);
    assert!(high.bytes_per_minute > low.bytes_per_minute);
    assert!(low.describe().ends_with("/min"));
}

#[test]
fn test_blocking_events_from_sync_caller() {
    let dir = TempDir::new().unwrap();
    let scenario = TranscodeScenarios::video_only(3);
    let engine = scenario.engine(&VidoptConfig::for_testing());

    let mut handle = engine
        .start_transcode(&scenario.input, dir.path().join("out.mp4"), Preset::default())
        .unwrap();
    let events: Vec<_> = std::iter::from_fn(|| handle.blocking_next_event()).collect();

    assert!(matches!(events.last(), Some(TranscodeEvent::Completed(_))));
    assert_eq!(events.iter().filter(|event| event.is_terminal()).count(), 1);
    tokio_test::assert_ok!(std::fs::metadata(dir.path().join("out.mp4")));
}
