//! Progress reporting over full simulated runs.

use proptest::prelude::*;
use vidopt_core::config::VidoptConfig;
use vidopt_core::test_fixtures::create_temp_output;
use vidopt_sim::{
    SimulatedAudio, SimulatedBackend, SimulatedMedia, SimulatedVideo, TranscodeScenario,
};

fn media(duration_ms: i64, with_audio: bool, sample_counts: bool, seed: u64) -> SimulatedMedia {
    let mut media = SimulatedMedia::new(duration_ms * 1_000)
        .with_video(SimulatedVideo::avc(640, 360, 25))
        .with_seed(seed);
    if with_audio {
        media = media.with_audio(SimulatedAudio::aac(48_000, 2));
    }
    if !sample_counts {
        media = media.without_sample_counts();
    }
    media
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn test_progress_strictly_increases_and_ends_at_100(
        duration_ms in 200i64..1_500,
        with_audio in any::<bool>(),
        sample_counts in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let (_dir, output) = create_temp_output();
        let scenario = TranscodeScenario::new(
            "progress",
            SimulatedBackend::new().with_seed(seed),
            media(duration_ms, with_audio, sample_counts, seed),
        );
        let outcome = scenario.run(&output, &VidoptConfig::for_testing()).unwrap();

        prop_assert!(outcome.is_success(), "{:?}", outcome.result);
        prop_assert_eq!(outcome.progress.first(), Some(&0));
        prop_assert_eq!(outcome.progress.last(), Some(&100));
        prop_assert!(outcome.progress.windows(2).all(|pair| pair[0] < pair[1]));
        let before_completion = &outcome.progress[..outcome.progress.len() - 1];
        prop_assert!(before_completion.iter().all(|percent| *percent < 100));
    }
}

#[test]
fn test_video_pass_stays_within_its_share() {
    let config = VidoptConfig::for_testing();
    let (_dir, output) = create_temp_output();
    let scenario = TranscodeScenario::new(
        "share",
        SimulatedBackend::new(),
        media(1_000, true, true, 1),
    );
    let outcome = scenario.run(&output, &config).unwrap();

    // The video pass ends exactly at its share before the audio pass starts.
    assert!(outcome.progress.contains(&config.pipeline.video_progress_share));
    assert_eq!(outcome.progress.last(), Some(&100));
}
