//! Writer start gating against the simulated container writer.

use vidopt_core::media::{BufferFlags, MediaBackend, MediaFormat, SampleBuffer, TrackKind, mime};
use vidopt_core::pipeline::{MuxCoordinator, TranscodeError};
use vidopt_core::test_fixtures::create_temp_output;
use vidopt_sim::{FaultPlan, SimulatedBackend};

fn video_format() -> MediaFormat {
    MediaFormat::video(mime::VIDEO_AVC, 1280, 720).with_frame_rate(30)
}

fn audio_format() -> MediaFormat {
    MediaFormat::audio(mime::AUDIO_AAC, 44_100, 2)
}

fn sample(pts: i64) -> SampleBuffer {
    SampleBuffer::new(vec![0xAB; 256], pts, BufferFlags::KEY_FRAME)
}

#[test]
fn test_samples_dropped_until_every_track_registered() {
    let (_dir, output) = create_temp_output();
    let backend = SimulatedBackend::new();
    let writer = backend.create_writer(&output).unwrap();
    let mut mux = MuxCoordinator::new(writer, [TrackKind::Video, TrackKind::Audio]);

    mux.register_format(TrackKind::Video, &video_format()).unwrap();
    assert!(!mux.try_start().unwrap());
    assert!(!mux.write_sample(TrackKind::Video, &sample(0)).unwrap());
    assert!(!mux.write_sample(TrackKind::Video, &sample(33_333)).unwrap());

    mux.register_format(TrackKind::Audio, &audio_format()).unwrap();
    assert!(mux.try_start().unwrap());
    assert!(!mux.try_start().unwrap());
    assert!(mux.write_sample(TrackKind::Audio, &sample(0)).unwrap());
    mux.finish().unwrap();

    assert_eq!(mux.stats().dropped(TrackKind::Video), 2);
    assert_eq!(mux.stats().written(TrackKind::Audio), 1);
    let written = backend.last_output().unwrap();
    assert_eq!(written.samples.len(), 1);
    assert!(written.stopped && written.closed);
}

#[test]
fn test_duplicate_and_unexpected_registration_rejected() {
    let (_dir, output) = create_temp_output();
    let backend = SimulatedBackend::new();
    let writer = backend.create_writer(&output).unwrap();
    let mut mux = MuxCoordinator::new(writer, [TrackKind::Video]);

    mux.register_format(TrackKind::Video, &video_format()).unwrap();
    assert!(matches!(
        mux.register_format(TrackKind::Video, &video_format()),
        Err(TranscodeError::Mux { .. })
    ));
    assert!(matches!(
        mux.register_format(TrackKind::Audio, &audio_format()),
        Err(TranscodeError::Mux { .. })
    ));
}

#[test]
fn test_finish_is_idempotent_after_stop_failure() {
    let (_dir, output) = create_temp_output();
    let backend = SimulatedBackend::new().with_faults(FaultPlan::new().fail_writer_stop());
    let writer = backend.create_writer(&output).unwrap();
    let mut mux = MuxCoordinator::new(writer, [TrackKind::Video]);

    mux.register_format(TrackKind::Video, &video_format()).unwrap();
    mux.try_start().unwrap();
    mux.write_sample(TrackKind::Video, &sample(0)).unwrap();

    assert!(mux.finish().is_err());
    assert!(mux.finish().is_ok());
    assert!(backend.ledger().released_twice().is_empty());
    assert!(backend.ledger().is_balanced());
}

#[test]
fn test_unstarted_writer_is_closed_without_stop() {
    let (_dir, output) = create_temp_output();
    let backend = SimulatedBackend::new();
    let writer = backend.create_writer(&output).unwrap();
    let mut mux = MuxCoordinator::new(writer, [TrackKind::Video, TrackKind::Audio]);
    mux.register_format(TrackKind::Video, &video_format()).unwrap();

    mux.finish().unwrap();

    let written = backend.last_output().unwrap();
    assert!(!written.started && !written.stopped);
    assert!(written.closed);
}
