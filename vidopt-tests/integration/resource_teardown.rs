//! Release ordering and once-only release under injected faults.

use vidopt_core::config::VidoptConfig;
use vidopt_core::media::{CodecRole, TrackKind};
use vidopt_core::pipeline::{SetupError, TranscodeError};
use vidopt_core::test_fixtures::create_temp_output;
use vidopt_sim::{
    CodecTarget, FaultPlan, LedgerAction, ResourceKind, ScenarioOutcome, SimulatedBackend,
    SimulatedMedia, TranscodeScenario,
};

fn run_with_faults(faults: FaultPlan) -> (TranscodeScenario, ScenarioOutcome) {
    let backend = SimulatedBackend::new().with_seed(8).with_faults(faults);
    let scenario = TranscodeScenario::new("faulty", backend, SimulatedMedia::hd_clip(1_000_000));
    let (_dir, output) = create_temp_output();
    let outcome = scenario.run(&output, &VidoptConfig::for_testing()).unwrap();
    (scenario, outcome)
}

fn assert_released_once(scenario: &TranscodeScenario) {
    let ledger = scenario.backend.ledger();
    assert!(ledger.unreleased().is_empty(), "unreleased: {:?}", ledger.unreleased());
    assert!(
        ledger.released_twice().is_empty(),
        "released twice: {:?}",
        ledger.released_twice()
    );
}

#[test]
fn test_codecs_then_source_then_writer() {
    let (scenario, outcome) = run_with_faults(FaultPlan::new());
    assert!(outcome.is_success());

    let ledger = scenario.backend.ledger();
    let source = ledger.release_position(ResourceKind::Source).unwrap();
    let writer = ledger.release_position(ResourceKind::Writer).unwrap();
    for role in [CodecRole::Decoder, CodecRole::Encoder] {
        for kind in [TrackKind::Video, TrackKind::Audio] {
            let codec = ledger.release_position(ResourceKind::Codec(role, kind)).unwrap();
            assert!(codec < source, "{kind} {role} released after source");
        }
    }
    assert!(source < writer);
    assert_released_once(&scenario);
}

#[test]
fn test_writer_started_and_stopped_once() {
    let (scenario, _) = run_with_faults(FaultPlan::new());
    let ledger = scenario.backend.ledger();
    assert_eq!(ledger.count(ResourceKind::Writer, LedgerAction::Start), 1);
    assert_eq!(ledger.count(ResourceKind::Writer, LedgerAction::Stop), 1);
    assert_eq!(ledger.count(ResourceKind::Writer, LedgerAction::Release), 1);
}

#[test]
fn test_writer_stop_failure_is_fatal() {
    let (scenario, outcome) = run_with_faults(FaultPlan::new().fail_writer_stop());

    assert!(matches!(outcome.result, Err(TranscodeError::Mux { .. })));
    // Close is still attempted after a failed stop.
    let written = outcome.written.unwrap();
    assert!(written.closed);
    assert_released_once(&scenario);
}

#[test]
fn test_writer_close_failure_is_fatal() {
    let (scenario, outcome) = run_with_faults(FaultPlan::new().fail_writer_close());
    assert!(matches!(outcome.result, Err(TranscodeError::Mux { .. })));
    assert_released_once(&scenario);
}

#[test]
fn test_codec_release_failure_is_only_logged() {
    let faults = FaultPlan::new()
        .fail_codec_close(CodecTarget::decoder(TrackKind::Video))
        .fail_codec_close(CodecTarget::encoder(TrackKind::Audio));
    let (scenario, outcome) = run_with_faults(faults);

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert_eq!(outcome.progress.last(), Some(&100));
    assert_released_once(&scenario);
}

#[test]
fn test_source_release_failure_is_only_logged() {
    let (scenario, outcome) = run_with_faults(FaultPlan::new().fail_source_close());
    assert!(outcome.is_success());
    assert_released_once(&scenario);
}

#[test]
fn test_source_read_failure_mid_pass() {
    let (scenario, outcome) = run_with_faults(FaultPlan::new().fail_source_read_after(10));

    assert!(matches!(
        outcome.result,
        Err(TranscodeError::Source { track: TrackKind::Video, .. })
    ));
    assert_released_once(&scenario);
}

#[test]
fn test_source_open_failure_opens_nothing() {
    let (scenario, outcome) = run_with_faults(FaultPlan::new().fail_source_open());

    assert!(matches!(
        outcome.result,
        Err(TranscodeError::Setup(SetupError::SourceOpen { .. }))
    ));
    assert!(outcome.written.is_none());
    assert!(scenario.backend.ledger().entries().is_empty());
}

#[test]
fn test_writer_create_failure_releases_source() {
    let (scenario, outcome) = run_with_faults(FaultPlan::new().fail_writer_create());

    assert!(matches!(
        outcome.result,
        Err(TranscodeError::Setup(SetupError::WriterCreate { .. }))
    ));
    assert_eq!(
        scenario.backend.ledger().count(ResourceKind::Source, LedgerAction::Release),
        1
    );
    assert_released_once(&scenario);
}

#[test]
fn test_encoder_create_failure_releases_what_was_opened() {
    let faults = FaultPlan::new().fail_codec_create(CodecTarget::encoder(TrackKind::Audio));
    let (scenario, outcome) = run_with_faults(faults);

    assert!(matches!(
        outcome.result,
        Err(TranscodeError::Setup(SetupError::CodecCreate {
            kind: TrackKind::Audio,
            role: CodecRole::Encoder,
            ..
        }))
    ));
    // The writer never started, so it is closed without a stop.
    let ledger = scenario.backend.ledger();
    assert_eq!(ledger.count(ResourceKind::Writer, LedgerAction::Stop), 0);
    assert_eq!(ledger.count(ResourceKind::Writer, LedgerAction::Release), 1);
    assert_released_once(&scenario);
}

#[test]
fn test_writer_start_failure() {
    let (scenario, outcome) = run_with_faults(FaultPlan::new().fail_writer_start());
    assert!(matches!(outcome.result, Err(TranscodeError::Mux { .. })));
    assert_released_once(&scenario);
}

#[test]
fn test_premature_decoder_end_of_stream_is_a_codec_error() {
    let faults = FaultPlan::new().premature_end_of_stream(CodecTarget::decoder(TrackKind::Audio));
    let (scenario, outcome) = run_with_faults(faults);

    assert!(matches!(
        outcome.result,
        Err(TranscodeError::Codec { track: TrackKind::Audio, .. })
    ));
    assert_released_once(&scenario);
}
