//! Maps a preset and encoder capabilities to concrete encoder parameters.

use serde::Serialize;

use super::preset::{FrameRate, NAMED_RESOLUTIONS, Preset, Quality, Resolution};
use crate::capabilities::{CodecCapabilities, ValueRange};
use crate::config::StrategyConfig;
use crate::media::{MediaFormat, mime};

/// Pixel count of 1280x720, the reference size for base bitrates.
const REFERENCE_PIXELS: f64 = 921_600.0;

const DEFAULT_SAMPLE_RATE: u32 = 44_100;
const DEFAULT_CHANNEL_COUNT: u16 = 2;

/// Concrete parameters an encoder is configured with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingTarget {
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub video_bitrate_bps: Option<u64>,
    pub frame_rate: Option<u32>,
    pub audio_bitrate_bps: Option<u64>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
}

impl EncodingTarget {
    /// Format handed to the backend when creating the encoder.
    pub fn to_media_format(&self) -> MediaFormat {
        MediaFormat {
            mime_type: self.mime_type.clone(),
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            bitrate_bps: self.video_bitrate_bps.or(self.audio_bitrate_bps),
            sample_rate: self.sample_rate,
            channel_count: self.channel_count,
            duration_us: None,
            extradata: None,
        }
    }

    /// Raw layout the decoder must produce so the encoder can consume it.
    pub fn decoder_output_format(&self) -> MediaFormat {
        match (self.width, self.height) {
            (Some(width), Some(height)) => {
                let mut format = MediaFormat::video(mime::VIDEO_RAW, width, height);
                format.frame_rate = self.frame_rate;
                format
            }
            _ => MediaFormat::audio(
                mime::AUDIO_RAW,
                self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE),
                self.channel_count.unwrap_or(DEFAULT_CHANNEL_COUNT),
            ),
        }
    }
}

/// Base bitrate at 720p for a codec family.
///
/// More efficient codecs need fewer bits for the same quality.
pub fn base_bitrate(mime_type: &str) -> u64 {
    match mime_type.to_lowercase().as_str() {
        mime::VIDEO_HEVC => 1_800_000,
        mime::VIDEO_VP9 | "video/vp9" => 2_000_000,
        _ => 2_500_000,
    }
}

/// Estimates a video bitrate and clamps it into `range`.
pub fn estimate_video_bitrate(
    mime_type: &str,
    quality: Quality,
    width: u32,
    height: u32,
    range: ValueRange,
) -> u64 {
    let pixels = f64::from(width) * f64::from(height);
    let estimate =
        base_bitrate(mime_type) as f64 * quality.multiplier() * (pixels / REFERENCE_PIXELS);
    // `as` saturates; non-finite values land on a range edge.
    range.clamp(estimate.round() as u64)
}

/// Pure preset-to-target mapping.
#[derive(Debug, Clone, Default)]
pub struct StrategySelector {
    config: StrategyConfig,
}

impl StrategySelector {
    pub fn new(config: &StrategyConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Output dimensions for a resolution choice.
    ///
    /// "Original" copies the source dimensions, falling back to the
    /// configured default when the source reports none.
    pub fn target_dimensions(
        &self,
        resolution: Resolution,
        source_dimensions: Option<(u32, u32)>,
    ) -> (u32, u32) {
        resolution
            .dimensions()
            .or(source_dimensions)
            .unwrap_or(self.config.default_dimensions)
    }

    /// Video encoder target for `preset`.
    pub fn select_video(
        &self,
        preset: &Preset,
        capabilities: &CodecCapabilities,
        source: Option<&MediaFormat>,
    ) -> EncodingTarget {
        let (width, height) = self.target_dimensions(
            preset.resolution,
            source.and_then(MediaFormat::dimensions),
        );
        let bitrate = estimate_video_bitrate(
            &preset.video_mime_type,
            preset.quality,
            width,
            height,
            capabilities.bitrate_range,
        );
        let frame_rate = match preset.frame_rate {
            FrameRate::Original => None,
            FrameRate::Fixed(fps) => Some(
                u32::try_from(capabilities.frame_rate_range.clamp(u64::from(fps)))
                    .unwrap_or(u32::MAX),
            ),
        };

        EncodingTarget {
            mime_type: preset.video_mime_type.clone(),
            width: Some(width),
            height: Some(height),
            video_bitrate_bps: Some(bitrate),
            frame_rate,
            audio_bitrate_bps: None,
            sample_rate: None,
            channel_count: None,
        }
    }

    /// Audio encoder target for `preset`; sample layout follows the source.
    pub fn select_audio(
        &self,
        preset: &Preset,
        capabilities: &CodecCapabilities,
        source: Option<&MediaFormat>,
    ) -> EncodingTarget {
        let bitrate = capabilities
            .audio_bitrate_range
            .clamp(u64::from(preset.audio_bitrate_bps));

        EncodingTarget {
            mime_type: preset.audio_mime_type.clone(),
            width: None,
            height: None,
            video_bitrate_bps: None,
            frame_rate: None,
            audio_bitrate_bps: Some(bitrate),
            sample_rate: Some(
                source
                    .and_then(|format| format.sample_rate)
                    .unwrap_or(DEFAULT_SAMPLE_RATE),
            ),
            channel_count: Some(
                source
                    .and_then(|format| format.channel_count)
                    .unwrap_or(DEFAULT_CHANNEL_COUNT),
            ),
        }
    }

    /// Expected output size for a preset without looking at a source.
    ///
    /// "Original" is estimated at the configured estimate dimensions.
    pub fn estimate_size(
        &self,
        preset: &Preset,
        video: &CodecCapabilities,
        audio: &CodecCapabilities,
    ) -> SizeEstimate {
        let (width, height) = preset
            .resolution
            .dimensions()
            .unwrap_or(self.config.original_estimate_dimensions);
        let video_bitrate_bps = estimate_video_bitrate(
            &preset.video_mime_type,
            preset.quality,
            width,
            height,
            video.bitrate_range,
        );
        let audio_bitrate_bps = audio
            .audio_bitrate_range
            .clamp(u64::from(preset.audio_bitrate_bps));

        SizeEstimate {
            width,
            height,
            video_bitrate_bps,
            audio_bitrate_bps,
            bytes_per_minute: estimate_bytes_per_minute(video_bitrate_bps, audio_bitrate_bps),
        }
    }

    /// Resolutions the encoder accepts, "Original" always first.
    pub fn supported_resolutions(&self, capabilities: &CodecCapabilities) -> Vec<Resolution> {
        std::iter::once(Resolution::Original)
            .chain(
                NAMED_RESOLUTIONS
                    .iter()
                    .filter(|named| capabilities.is_size_supported(named.width, named.height))
                    .map(|named| Resolution::Named(*named)),
            )
            .collect()
    }
}

/// Output size estimate for one minute of media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeEstimate {
    pub width: u32,
    pub height: u32,
    pub video_bitrate_bps: u64,
    pub audio_bitrate_bps: u64,
    pub bytes_per_minute: u64,
}

impl SizeEstimate {
    pub fn describe(&self) -> String {
        format_size_per_minute(self.bytes_per_minute)
    }
}

pub fn estimate_bytes_per_minute(video_bitrate_bps: u64, audio_bitrate_bps: u64) -> u64 {
    (video_bitrate_bps + audio_bitrate_bps) / 8 * 60
}

/// Formats a bytes-per-minute figure as `MB/min`, `KB/min` or `B/min`.
pub fn format_size_per_minute(bytes_per_minute: u64) -> String {
    const KIB: f64 = 1024.0;
    let bytes = bytes_per_minute as f64;

    if bytes >= KIB * KIB {
        format!("{:.1} MB/min", bytes / (KIB * KIB))
    } else if bytes >= KIB {
        format!("{:.1} KB/min", bytes / KIB)
    } else {
        format!("{bytes_per_minute} B/min")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::SizeSupport;

    fn fallback() -> CodecCapabilities {
        CodecCapabilities::fallback(&StrategyConfig::default())
    }

    #[test]
    fn test_medium_720p_avc_uses_base_bitrate() {
        assert_eq!(
            estimate_video_bitrate(
                mime::VIDEO_AVC,
                Quality::Medium,
                1280,
                720,
                ValueRange::new(0, u64::MAX)
            ),
            2_500_000
        );
        assert_eq!(
            estimate_video_bitrate(
                mime::VIDEO_HEVC,
                Quality::High,
                1280,
                720,
                ValueRange::new(0, u64::MAX)
            ),
            3_240_000
        );
        assert_eq!(
            estimate_video_bitrate(
                mime::VIDEO_VP9,
                Quality::Low,
                1280,
                720,
                ValueRange::new(0, u64::MAX)
            ),
            1_000_000
        );
    }

    #[test]
    fn test_bitrate_clamped_to_range() {
        let range = ValueRange::new(250_000, 10_000_000);
        assert_eq!(
            estimate_video_bitrate(mime::VIDEO_AVC, Quality::High, 3840, 2160, range),
            10_000_000
        );
        assert_eq!(
            estimate_video_bitrate(mime::VIDEO_AVC, Quality::Low, 16, 16, range),
            250_000
        );
    }

    #[test]
    fn test_select_video_for_named_resolution() {
        let selector = StrategySelector::default();
        let target = selector.select_video(&Preset::default(), &fallback(), None);

        assert_eq!(target.mime_type, "video/avc");
        assert_eq!((target.width, target.height), (Some(1280), Some(720)));
        assert_eq!(target.video_bitrate_bps, Some(2_500_000));
        assert_eq!(target.frame_rate, Some(30));
        assert_eq!(target.audio_bitrate_bps, None);
    }

    #[test]
    fn test_original_copies_source_dimensions() {
        let selector = StrategySelector::default();
        let source = MediaFormat::video(mime::VIDEO_AVC, 1920, 1080);

        let target = selector.select_video(&Preset::original(), &fallback(), Some(&source));
        assert_eq!((target.width, target.height), (Some(1920), Some(1080)));
        assert_eq!(target.frame_rate, None);

        let without_probe = selector.select_video(&Preset::original(), &fallback(), None);
        assert_eq!((without_probe.width, without_probe.height), (Some(1280), Some(720)));
    }

    #[test]
    fn test_frame_rate_clamped_to_encoder_range() {
        let selector = StrategySelector::default();
        let preset = Preset {
            frame_rate: FrameRate::Fixed(120),
            ..Default::default()
        };
        let target = selector.select_video(&preset, &fallback(), None);
        assert_eq!(target.frame_rate, Some(60));
    }

    #[test]
    fn test_frame_rate_saturates_above_u32() {
        let mut caps = fallback();
        caps.frame_rate_range = ValueRange::new(u64::from(u32::MAX) + 10, u64::MAX);
        let preset = Preset {
            frame_rate: FrameRate::Fixed(30),
            ..Default::default()
        };

        let target = StrategySelector::default().select_video(&preset, &caps, None);
        assert_eq!(target.frame_rate, Some(u32::MAX));
    }

    #[test]
    fn test_select_audio_clamps_and_follows_source_layout() {
        let selector = StrategySelector::default();
        let mut caps = fallback();
        caps.audio_bitrate_range = ValueRange::new(64_000, 96_000);
        let source = MediaFormat::audio(mime::AUDIO_AAC, 48_000, 1);

        let target = selector.select_audio(&Preset::default(), &caps, Some(&source));
        assert_eq!(target.mime_type, "audio/mp4a-latm");
        assert_eq!(target.audio_bitrate_bps, Some(96_000));
        assert_eq!(target.sample_rate, Some(48_000));
        assert_eq!(target.channel_count, Some(1));
        assert_eq!(target.width, None);
    }

    #[test]
    fn test_decoder_output_format_matches_target_layout() {
        let selector = StrategySelector::default();
        let video = selector.select_video(&Preset::default(), &fallback(), None);
        let raw = video.decoder_output_format();
        assert_eq!(raw.mime_type, mime::VIDEO_RAW);
        assert_eq!(raw.dimensions(), Some((1280, 720)));

        let audio = selector.select_audio(&Preset::default(), &fallback(), None);
        let raw = audio.decoder_output_format();
        assert_eq!(raw.mime_type, mime::AUDIO_RAW);
        assert_eq!((raw.sample_rate, raw.channel_count), (Some(44_100), Some(2)));
    }

    #[test]
    fn test_size_estimate_formatting() {
        assert_eq!(estimate_bytes_per_minute(2_500_000, 128_000), 19_710_000);
        assert_eq!(format_size_per_minute(19_710_000), "18.8 MB/min");
        assert_eq!(format_size_per_minute(2_048), "2.0 KB/min");
        assert_eq!(format_size_per_minute(512), "512 B/min");
    }

    #[test]
    fn test_original_estimated_at_1080p() {
        let selector = StrategySelector::default();
        let estimate = selector.estimate_size(&Preset::original(), &fallback(), &fallback());
        assert_eq!((estimate.width, estimate.height), (1920, 1080));
        assert_eq!(estimate.video_bitrate_bps, 5_625_000);
    }

    #[test]
    fn test_supported_resolutions_filtered_by_size_limits() {
        let mut caps = fallback();
        caps.supported_sizes = Some(SizeSupport {
            widths: ValueRange::new(64, 1920),
            heights: ValueRange::new(64, 1080),
            width_alignment: 2,
            height_alignment: 2,
        });

        let labels: Vec<String> = StrategySelector::default()
            .supported_resolutions(&caps)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(labels, vec!["original", "360p", "480p", "720p", "1080p"]);
    }
}
