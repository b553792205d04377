//! Encoder targets stay within what the chosen encoder reports.

use std::sync::Arc;

use proptest::prelude::*;
use vidopt_core::capabilities::{CapabilityProvider, CapabilityQueryService};
use vidopt_core::config::StrategyConfig;
use vidopt_core::media::{MediaFormat, mime};
use vidopt_core::strategy::{FrameRate, Preset, Quality, Resolution, StrategySelector};
use vidopt_sim::SimulatedCatalogue;

fn service(catalogue: SimulatedCatalogue) -> CapabilityQueryService {
    let provider: Arc<dyn CapabilityProvider> = Arc::new(catalogue);
    CapabilityQueryService::new(provider, &StrategyConfig::default())
}

fn quality() -> impl Strategy<Value = Quality> {
    prop_oneof![Just(Quality::High), Just(Quality::Medium), Just(Quality::Low)]
}

proptest! {
    #[test]
    fn test_video_target_within_encoder_ranges(
        width in 16u32..8_192,
        height in 16u32..8_192,
        fps in 1u32..240,
        quality in quality(),
        hevc in any::<bool>(),
    ) {
        let service = service(SimulatedCatalogue::standard());
        let mime_type = if hevc { mime::VIDEO_HEVC } else { mime::VIDEO_AVC };
        let capabilities = service.capabilities_for(mime_type);
        let preset = Preset {
            resolution: Resolution::Custom { width, height },
            quality,
            frame_rate: FrameRate::Fixed(fps),
            ..Preset::default()
        }
        .with_video_mime_type(mime_type);

        let target = StrategySelector::default().select_video(&preset, &capabilities, None);

        let bitrate = target.video_bitrate_bps.unwrap();
        prop_assert!(capabilities.bitrate_range.contains(bitrate));
        let frame_rate = u64::from(target.frame_rate.unwrap());
        prop_assert!(capabilities.frame_rate_range.contains(frame_rate));
        prop_assert_eq!((target.width, target.height), (Some(width), Some(height)));
    }

    #[test]
    fn test_audio_target_within_encoder_range(bitrate in 1u32..2_000_000) {
        let service = service(SimulatedCatalogue::standard());
        let capabilities = service.capabilities_for(mime::AUDIO_AAC);
        let preset = Preset { audio_bitrate_bps: bitrate, ..Preset::default() };
        let source = MediaFormat::audio(mime::AUDIO_AAC, 22_050, 1);

        let target =
            StrategySelector::default().select_audio(&preset, &capabilities, Some(&source));

        prop_assert!(capabilities.audio_bitrate_range.contains(target.audio_bitrate_bps.unwrap()));
        prop_assert_eq!(target.sample_rate, Some(22_050));
        prop_assert_eq!(target.channel_count, Some(1));
    }
}

#[test]
fn test_missing_encoder_uses_fallback_ranges() {
    let service = service(SimulatedCatalogue::standard().without_mime_type(mime::VIDEO_AVC));
    let capabilities = service.capabilities_for(mime::VIDEO_AVC);

    assert_eq!(capabilities.encoder_name, None);
    assert_eq!(capabilities.bitrate_range.min, 250_000);
    assert_eq!(capabilities.bitrate_range.max, 10_000_000);
    assert_eq!(capabilities.frame_rate_range.max, 60);
}

#[test]
fn test_hardware_encoder_preferred() {
    let service = service(SimulatedCatalogue::standard());
    let capabilities = service.capabilities_for(mime::VIDEO_AVC);
    assert_eq!(capabilities.encoder_name.as_deref(), Some("sim.avc.hw"));

    // The hardware encoder tops out at 1080p.
    let resolutions = StrategySelector::default().supported_resolutions(&capabilities);
    assert!(resolutions.contains(&Resolution::named("1080p").unwrap()));
    assert!(!resolutions.contains(&Resolution::named("4K").unwrap()));
}

#[test]
fn test_capability_queries_are_cached() {
    let catalogue = Arc::new(SimulatedCatalogue::standard());
    let provider: Arc<dyn CapabilityProvider> = catalogue.clone();
    let service = CapabilityQueryService::new(provider, &StrategyConfig::default());

    service.capabilities_for(mime::VIDEO_AVC);
    service.capabilities_for(mime::AUDIO_AAC);
    service.supported_video_mime_types();
    assert_eq!(catalogue.query_count(), 1);

    service.invalidate();
    service.encoders();
    assert_eq!(catalogue.query_count(), 2);
}

#[test]
fn test_unavailable_registry_is_retried() {
    let catalogue = Arc::new(SimulatedCatalogue::standard().unavailable());
    let provider: Arc<dyn CapabilityProvider> = catalogue.clone();
    let service = CapabilityQueryService::new(provider, &StrategyConfig::default());

    assert!(service.encoders().is_empty());
    assert!(!service.is_cached());
    assert_eq!(service.supported_video_mime_types(), vec![mime::VIDEO_AVC.to_string()]);
    assert_eq!(catalogue.query_count(), 2);
}
