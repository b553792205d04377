//! Centralized configuration for vidopt.
//!
//! All tunable parameters are defined here instead of being scattered as
//! literals through the pipeline and strategy code.

use std::time::Duration;

use crate::capabilities::ValueRange;

/// Central configuration for all vidopt components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct VidoptConfig {
    pub pipeline: PipelineConfig,
    pub strategy: StrategyConfig,
    pub engine: EngineConfig,
}

/// Track pipeline polling behaviour.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Timeout for every codec queue operation
    pub poll_timeout: Duration,
    /// Abort a pass when no stage made progress for this long
    pub stall_timeout: Duration,
    /// Share of the progress bar given to the video pass when audio follows
    pub video_progress_share: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(10),
            stall_timeout: Duration::from_secs(30),
            video_progress_share: 90,
        }
    }
}

/// Encoder parameter selection defaults and capability fallbacks.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    /// Dimensions used for "original" when the source does not report any
    pub default_dimensions: (u32, u32),
    /// Dimensions used to estimate sizes for "original" without a source
    pub original_estimate_dimensions: (u32, u32),
    /// Video bitrate range when no encoder supports the mime type
    pub unknown_encoder_bitrate: ValueRange,
    /// Frame rate range when no encoder supports the mime type
    pub unknown_encoder_frame_rate: ValueRange,
    /// Audio bitrate range when no encoder supports the mime type
    pub unknown_encoder_audio_bitrate: ValueRange,
    /// Video bitrate range for encoders without video capability data
    pub missing_video_caps_bitrate: ValueRange,
    /// Frame rate range for encoders without video capability data
    pub missing_video_caps_frame_rate: ValueRange,
    /// Audio bitrate range for encoders without audio capability data
    pub missing_audio_caps_bitrate: ValueRange,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            default_dimensions: (1280, 720),
            original_estimate_dimensions: (1920, 1080),
            unknown_encoder_bitrate: ValueRange::new(250_000, 10_000_000),
            unknown_encoder_frame_rate: ValueRange::new(15, 60),
            unknown_encoder_audio_bitrate: ValueRange::new(32_000, 512_000),
            missing_video_caps_bitrate: ValueRange::new(500_000, 5_000_000),
            missing_video_caps_frame_rate: ValueRange::new(15, 30),
            missing_audio_caps_bitrate: ValueRange::new(64_000, 320_000),
        }
    }
}

/// Worker thread settings for transcode invocations.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Prefix of the dedicated worker thread name
    pub worker_name_prefix: &'static str,
    /// Stack size for worker threads (None = platform default)
    pub worker_stack_size: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_name_prefix: "vidopt-transcode",
            worker_stack_size: None,
        }
    }
}

impl VidoptConfig {
    /// Creates configuration with environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(timeout) = std::env::var("VIDOPT_POLL_TIMEOUT_MS") {
            if let Ok(millis) = timeout.parse::<u64>() {
                config.pipeline.poll_timeout = Duration::from_millis(millis);
            }
        }

        if let Ok(timeout) = std::env::var("VIDOPT_STALL_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.pipeline.stall_timeout = Duration::from_secs(seconds);
            }
        }

        let width = std::env::var("VIDOPT_DEFAULT_WIDTH")
            .ok()
            .and_then(|value| value.parse::<u32>().ok());
        let height = std::env::var("VIDOPT_DEFAULT_HEIGHT")
            .ok()
            .and_then(|value| value.parse::<u32>().ok());
        if let (Some(width), Some(height)) = (width, height) {
            if width > 0 && height > 0 {
                config.strategy.default_dimensions = (width, height);
            }
        }

        config
    }

    /// Creates a configuration tuned for fast deterministic tests.
    pub fn for_testing() -> Self {
        Self {
            pipeline: PipelineConfig {
                poll_timeout: Duration::from_millis(1),
                stall_timeout: Duration::from_secs(5),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = VidoptConfig::default();

        assert_eq!(config.pipeline.poll_timeout, Duration::from_millis(10));
        assert_eq!(config.pipeline.video_progress_share, 90);
        assert_eq!(config.strategy.default_dimensions, (1280, 720));
        assert_eq!(
            config.strategy.unknown_encoder_bitrate,
            ValueRange::new(250_000, 10_000_000)
        );
        assert_eq!(
            config.strategy.missing_audio_caps_bitrate,
            ValueRange::new(64_000, 320_000)
        );
        assert_eq!(config.engine.worker_name_prefix, "vidopt-transcode");
    }

    #[test]
    fn test_testing_preset_polls_faster() {
        let config = VidoptConfig::for_testing();
        assert!(config.pipeline.poll_timeout < PipelineConfig::default().poll_timeout);
        assert!(config.pipeline.stall_timeout < PipelineConfig::default().stall_timeout);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("VIDOPT_POLL_TIMEOUT_MS", "25");
            std::env::set_var("VIDOPT_STALL_TIMEOUT_SECS", "3");
            std::env::set_var("VIDOPT_DEFAULT_WIDTH", "640");
            std::env::set_var("VIDOPT_DEFAULT_HEIGHT", "360");
        }

        let config = VidoptConfig::from_env();

        assert_eq!(config.pipeline.poll_timeout, Duration::from_millis(25));
        assert_eq!(config.pipeline.stall_timeout, Duration::from_secs(3));
        assert_eq!(config.strategy.default_dimensions, (640, 360));

        unsafe {
            std::env::remove_var("VIDOPT_POLL_TIMEOUT_MS");
            std::env::remove_var("VIDOPT_STALL_TIMEOUT_SECS");
            std::env::remove_var("VIDOPT_DEFAULT_WIDTH");
            std::env::remove_var("VIDOPT_DEFAULT_HEIGHT");
        }
    }
}
