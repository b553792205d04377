//! Simulated encoder catalogue for capability queries.

use std::sync::atomic::{AtomicUsize, Ordering};

use vidopt_core::capabilities::{
    AudioCapabilities, CapabilityProvider, EncoderInfo, SizeSupport, ValueRange, VideoCapabilities,
};
use vidopt_core::media::{MediaError, MediaResult, mime};

/// Fixed encoder list answering [`CapabilityProvider`] queries.
///
/// Counts how often it was asked so tests can observe caching.
#[derive(Debug, Default)]
pub struct SimulatedCatalogue {
    encoders: Vec<EncoderInfo>,
    unavailable: bool,
    queries: AtomicUsize,
}

impl SimulatedCatalogue {
    /// Software AVC, HEVC and AAC encoders plus a hardware AVC encoder
    /// limited to 1080p.
    pub fn standard() -> Self {
        Self::empty()
            .with_encoder(video_encoder("sim.avc.hw", mime::VIDEO_AVC, true, 1920, 1088, 2))
            .with_encoder(video_encoder("sim.avc", mime::VIDEO_AVC, false, 4096, 2304, 2))
            .with_encoder(video_encoder("sim.hevc", mime::VIDEO_HEVC, false, 4096, 2304, 2))
            .with_encoder(EncoderInfo {
                name: "sim.aac".to_string(),
                mime_type: mime::AUDIO_AAC.to_string(),
                hardware_accelerated: false,
                video: None,
                audio: Some(AudioCapabilities {
                    bitrate_range: ValueRange::new(32_000, 320_000),
                    max_channels: 6,
                }),
            })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_encoder(mut self, encoder: EncoderInfo) -> Self {
        self.encoders.push(encoder);
        self
    }

    /// Drops every encoder for `mime_type`.
    pub fn without_mime_type(mut self, mime_type: &str) -> Self {
        self.encoders
            .retain(|encoder| !encoder.mime_type.eq_ignore_ascii_case(mime_type));
        self
    }

    /// Makes every query fail, as when the platform registry is unreadable.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Number of `encoders` calls so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

impl CapabilityProvider for SimulatedCatalogue {
    fn encoders(&self) -> MediaResult<Vec<EncoderInfo>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if self.unavailable {
            return Err(MediaError::codec("sim.catalogue", "codec registry unavailable"));
        }
        Ok(self.encoders.clone())
    }
}

/// Video encoder description with typical ranges for its class.
pub fn video_encoder(
    name: &str,
    mime_type: &str,
    hardware_accelerated: bool,
    max_width: u32,
    max_height: u32,
    alignment: u32,
) -> EncoderInfo {
    EncoderInfo {
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        hardware_accelerated,
        video: Some(VideoCapabilities {
            sizes: SizeSupport {
                widths: ValueRange::new(64, u64::from(max_width)),
                heights: ValueRange::new(64, u64::from(max_height)),
                width_alignment: alignment,
                height_alignment: alignment,
            },
            bitrate_range: ValueRange::new(100_000, 40_000_000),
            frame_rate_range: ValueRange::new(1, 60),
        }),
        audio: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalogue_lists_hardware_and_software() {
        let catalogue = SimulatedCatalogue::standard();
        let encoders = catalogue.encoders().unwrap();

        let avc = encoders
            .iter()
            .filter(|encoder| encoder.mime_type == mime::VIDEO_AVC)
            .collect::<Vec<_>>();
        assert_eq!(avc.len(), 2);
        assert!(avc.iter().any(|encoder| encoder.hardware_accelerated));
        assert_eq!(catalogue.query_count(), 1);
    }

    #[test]
    fn test_hardware_encoder_stops_at_1080p() {
        let encoders = SimulatedCatalogue::standard().encoders().unwrap();
        let hardware = encoders
            .iter()
            .find(|encoder| encoder.hardware_accelerated)
            .and_then(|encoder| encoder.video.as_ref())
            .unwrap();

        assert!(hardware.sizes.supports(1920, 1080));
        assert!(hardware.sizes.supports(1280, 720));
        assert!(hardware.sizes.supports(854, 480));
        assert!(!hardware.sizes.supports(2560, 1440));
        assert!(!hardware.sizes.supports(3840, 2160));
    }

    #[test]
    fn test_without_mime_type_and_unavailable() {
        let catalogue = SimulatedCatalogue::standard().without_mime_type(mime::AUDIO_AAC);
        let encoders = catalogue.encoders().unwrap();
        assert!(encoders.iter().all(|encoder| encoder.audio.is_none()));

        let broken = SimulatedCatalogue::standard().unavailable();
        assert!(broken.encoders().is_err());
    }
}
