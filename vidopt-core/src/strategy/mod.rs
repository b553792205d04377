//! Encoder parameter strategy.
//!
//! Translates a user-facing [`Preset`] into [`EncodingTarget`]s using the
//! capability data of the chosen encoders. Everything here is pure: no I/O,
//! no shared state.

pub mod preset;
pub mod selector;

pub use preset::{
    FrameRate, NAMED_RESOLUTIONS, NamedResolution, Preset, Quality, Resolution,
    parse_audio_bitrate,
};
pub use selector::{
    EncodingTarget, SizeEstimate, StrategySelector, base_bitrate, estimate_bytes_per_minute,
    estimate_video_bitrate, format_size_per_minute,
};

/// Errors from parsing preset values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    #[error("Invalid resolution: {input}")]
    InvalidResolution { input: String },

    #[error("Invalid quality: {input} (expected high, medium or low)")]
    InvalidQuality { input: String },

    #[error("Invalid frame rate: {input}")]
    InvalidFrameRate { input: String },

    #[error("Invalid audio bitrate: {input}")]
    InvalidAudioBitrate { input: String },

    #[error("Invalid preset {input}: {reason}")]
    InvalidPreset { input: String, reason: String },
}
