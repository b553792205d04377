//! Errors reported by platform implementations.

use super::TrackKind;

/// Failure reported by a source, codec or writer implementation.
///
/// The pipeline maps these into its own taxonomy depending on the stage in
/// which they surface.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Source failure: {reason}")]
    Source { reason: String },

    #[error("Codec {codec} failure: {reason}")]
    Codec { codec: String, reason: String },

    #[error("No {kind} codec available for {mime_type}")]
    CodecUnavailable { kind: TrackKind, mime_type: String },

    #[error("Writer failure: {reason}")]
    Writer { reason: String },

    #[error("Invalid slot {index} for {codec}")]
    InvalidSlot { codec: String, index: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn source(reason: impl Into<String>) -> Self {
        MediaError::Source {
            reason: reason.into(),
        }
    }

    pub fn codec(codec: impl Into<String>, reason: impl Into<String>) -> Self {
        MediaError::Codec {
            codec: codec.into(),
            reason: reason.into(),
        }
    }

    pub fn writer(reason: impl Into<String>) -> Self {
        MediaError::Writer {
            reason: reason.into(),
        }
    }
}

pub type MediaResult<T> = std::result::Result<T, MediaError>;
