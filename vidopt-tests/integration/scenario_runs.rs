//! Full transcodes of the built-in scenarios.

use vidopt_core::config::VidoptConfig;
use vidopt_core::media::{TrackKind, mime};
use vidopt_core::pipeline::{SetupError, TranscodeError};
use vidopt_core::strategy::Preset;
use vidopt_core::test_fixtures::create_temp_output;
use vidopt_sim::{SimulatedMedia, TranscodeScenarios};

#[test]
fn test_standard_transcode_writes_every_sample() {
    let (_dir, output) = create_temp_output();
    let scenario = TranscodeScenarios::standard(11);
    let outcome = scenario.run(&output, &VidoptConfig::for_testing()).unwrap();

    let result = outcome.result.as_ref().unwrap();
    assert_eq!(result.output_location, output);
    assert_eq!(result.output_mime_type, mime::CONTAINER_MP4);

    let written = outcome.written.unwrap();
    assert!(written.started && written.stopped && written.closed);
    assert_eq!(result.output_size_bytes, written.bytes_written);
    assert_eq!(std::fs::metadata(&output).unwrap().len(), written.bytes_written);

    let media = SimulatedMedia::hd_clip(2_000_000);
    let video_in = media.sample_count(media.track_index(TrackKind::Video).unwrap());
    let audio_in = media.sample_count(media.track_index(TrackKind::Audio).unwrap());
    assert_eq!(written.tracks.len(), 2);
    let video_track = written.track_with_prefix("video/").unwrap();
    let audio_track = written.track_with_prefix("audio/").unwrap();
    // Default preset is 720p.
    assert_eq!(written.tracks[video_track].dimensions(), Some((1280, 720)));
    assert_eq!(written.tracks[video_track].mime_type, mime::VIDEO_AVC);
    assert_eq!(written.tracks[audio_track].mime_type, mime::AUDIO_AAC);
    assert_eq!(written.samples_for(video_track).len() as u64, video_in);
    assert_eq!(written.samples_for(audio_track).len() as u64, audio_in);
}

#[test]
fn test_video_is_written_before_audio() {
    let (_dir, output) = create_temp_output();
    let outcome = TranscodeScenarios::standard(3)
        .run(&output, &VidoptConfig::for_testing())
        .unwrap();

    let written = outcome.written.unwrap();
    let video_track = written.track_with_prefix("video/").unwrap();
    let first_audio = written
        .samples
        .iter()
        .position(|sample| sample.track_index != video_track)
        .unwrap();
    assert!(
        written.samples[first_audio..]
            .iter()
            .all(|sample| sample.track_index != video_track)
    );
}

#[test]
fn test_video_only_input_produces_single_track() {
    let (_dir, output) = create_temp_output();
    let outcome = TranscodeScenarios::video_only(5)
        .run(&output, &VidoptConfig::for_testing())
        .unwrap();

    assert!(outcome.is_success());
    let written = outcome.written.unwrap();
    assert_eq!(written.tracks.len(), 1);
    assert_eq!(written.tracks[0].mime_type, mime::VIDEO_AVC);
    assert!(!written.samples.is_empty());
    assert_eq!(outcome.progress.last(), Some(&100));
}

#[test]
fn test_input_without_video_is_refused() {
    let (_dir, output) = create_temp_output();
    let scenario = TranscodeScenarios::no_video(5);
    let outcome = scenario.run(&output, &VidoptConfig::for_testing()).unwrap();

    let error = outcome.result.unwrap_err();
    assert!(matches!(error, TranscodeError::Setup(SetupError::NoVideoTrack)));
    assert!(error.is_user_error());
    assert!(outcome.progress.is_empty());
    assert!(scenario.backend.ledger().is_balanced());
}

#[test]
fn test_late_format_announcement_drops_first_pass_samples() {
    let (_dir, output) = create_temp_output();
    let outcome = TranscodeScenarios::late_formats(9)
        .run(&output, &VidoptConfig::for_testing())
        .unwrap();

    assert!(outcome.is_success());
    let written = outcome.written.unwrap();
    assert_eq!(written.tracks.len(), 2);
    let video_track = written.track_with_prefix("video/").unwrap();
    let audio_track = written.track_with_prefix("audio/").unwrap();
    assert!(written.samples_for(video_track).is_empty());
    assert!(!written.samples_for(audio_track).is_empty());
}

#[test]
fn test_slow_codecs_complete_with_all_resources_released() {
    let (_dir, output) = create_temp_output();
    let scenario = TranscodeScenarios::slow_codecs(21);
    let outcome = scenario.run(&output, &VidoptConfig::for_testing()).unwrap();

    assert!(outcome.is_success(), "{:?}", outcome.result);
    assert!(scenario.backend.ledger().is_balanced());
}

#[test]
fn test_encoder_failure_fails_the_transcode() {
    let (_dir, output) = create_temp_output();
    let scenario = TranscodeScenarios::failing_encoder(2);
    let outcome = scenario.run(&output, &VidoptConfig::for_testing()).unwrap();

    assert!(matches!(
        outcome.result,
        Err(TranscodeError::Codec { track: TrackKind::Video, .. })
    ));
    assert!(outcome.progress.iter().all(|percent| *percent < 100));
    // Partial output stays on disk.
    assert!(output.exists());
    assert!(scenario.backend.ledger().is_balanced());
}

#[test]
fn test_original_preset_keeps_source_dimensions() {
    let (_dir, output) = create_temp_output();
    let outcome = TranscodeScenarios::standard(4)
        .with_preset(Preset::original())
        .run(&output, &VidoptConfig::for_testing())
        .unwrap();

    let written = outcome.written.unwrap();
    let video = &written.tracks[written.track_with_prefix("video/").unwrap()];
    assert_eq!(video.dimensions(), Some((1920, 1080)));
}

#[test]
fn test_named_preset_sets_encoder_dimensions() {
    let (_dir, output) = create_temp_output();
    let preset: Preset = "480p/Low/24fps/96kbps".parse().unwrap();
    let outcome = TranscodeScenarios::standard(4)
        .with_preset(preset)
        .run(&output, &VidoptConfig::for_testing())
        .unwrap();

    let written = outcome.written.unwrap();
    let video = &written.tracks[written.track_with_prefix("video/").unwrap()];
    assert_eq!(video.dimensions(), Some((854, 480)));
    assert_eq!(video.frame_rate, Some(24));
}

#[test]
fn test_same_seed_gives_same_output() {
    let config = VidoptConfig::for_testing();
    let (_first_dir, first) = create_temp_output();
    let (_second_dir, second) = create_temp_output();

    let a = TranscodeScenarios::standard(77).run(&first, &config).unwrap();
    let b = TranscodeScenarios::standard(77).run(&second, &config).unwrap();

    let a = a.written.unwrap();
    let b = b.written.unwrap();
    assert_eq!(a.samples, b.samples);
    assert_eq!(a.bytes_written, b.bytes_written);
}
