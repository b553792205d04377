//! Vidopt Core - Transcode pipeline engine
//!
//! Discovers the tracks of a media source, pumps each through a decoder and
//! an encoder, multiplexes the encoded samples into one container and
//! reports progress and the outcome to the caller. Platform media access is
//! behind the [`media::MediaBackend`] seam; the `ffmpeg` feature provides a
//! libav implementation and `vidopt-sim` a simulated one.

pub mod capabilities;
pub mod config;
pub mod engine;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod media;
pub mod pipeline;
pub mod strategy;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use capabilities::{CapabilityProvider, CapabilityQueryService, CodecCapabilities};
pub use config::VidoptConfig;
pub use engine::{TranscodeEngine, TranscodeEvent, TranscodeHandle, TranscodeId};
pub use media::{MediaBackend, MediaError};
pub use pipeline::{SetupError, TranscodeError, TranscodeOutput};
pub use strategy::{Preset, StrategyError};

/// Errors that can bubble up from any vidopt subsystem.
#[derive(Debug, thiserror::Error)]
pub enum VidoptError {
    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Preset error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VidoptError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            VidoptError::Transcode(e) => e.user_message(),
            VidoptError::Strategy(e) => e.to_string(),
            VidoptError::Media(MediaError::CodecUnavailable { mime_type, .. }) => {
                format!("No codec available for {mime_type}")
            }
            VidoptError::Media(_) => "Media platform error occurred".to_string(),
            VidoptError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            VidoptError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        match self {
            VidoptError::Transcode(e) => e.is_user_error(),
            VidoptError::Strategy(_) | VidoptError::Configuration { .. } => true,
            VidoptError::Media(_) | VidoptError::Io(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, VidoptError>;
