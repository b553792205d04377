//! Transcode error taxonomy.

use crate::media::{CodecRole, MediaError, TrackKind};

/// Failures before any sample is processed.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Input has no video track")]
    NoVideoTrack,

    #[error("Cannot open source {input}: {reason}")]
    SourceOpen { input: String, reason: String },

    #[error("Cannot read track {index} of the source: {reason}")]
    TrackRead { index: usize, reason: String },

    #[error("Cannot create {kind} {role}: {reason}")]
    CodecCreate {
        kind: TrackKind,
        role: CodecRole,
        reason: String,
    },

    #[error("Cannot create writer at {output}: {reason}")]
    WriterCreate { output: String, reason: String },
}

/// Terminal outcome of a failed transcode.
///
/// Nothing here is retried; retry policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Setup failed: {0}")]
    Setup(#[from] SetupError),

    #[error("Source read failed during {track} pass: {reason}")]
    Source { track: TrackKind, reason: String },

    #[error("{track} codec failed: {reason}")]
    Codec { track: TrackKind, reason: String },

    #[error("Muxer failed: {reason}")]
    Mux { reason: String },

    #[error("Transcoding canceled.")]
    Cancelled,

    #[error("Transcode worker failed: {reason}")]
    Worker { reason: String },
}

impl TranscodeError {
    pub(crate) fn source(track: TrackKind, error: MediaError) -> Self {
        TranscodeError::Source {
            track,
            reason: error.to_string(),
        }
    }

    pub(crate) fn codec(track: TrackKind, error: MediaError) -> Self {
        TranscodeError::Codec {
            track,
            reason: error.to_string(),
        }
    }

    pub(crate) fn mux(error: MediaError) -> Self {
        TranscodeError::Mux {
            reason: error.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TranscodeError::Cancelled)
    }

    /// Returns a user-friendly message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            TranscodeError::Setup(SetupError::NoVideoTrack) => {
                "The selected file has no video track".to_string()
            }
            TranscodeError::Setup(SetupError::SourceOpen { input, .. }) => {
                format!("Could not open {input}")
            }
            TranscodeError::Setup(_) => "Could not prepare the transcoder".to_string(),
            TranscodeError::Source { .. } => "Could not read the input file".to_string(),
            TranscodeError::Codec { track, .. } => format!("The {track} codec failed"),
            TranscodeError::Mux { .. } => "Could not write the output file".to_string(),
            TranscodeError::Cancelled => "Transcoding canceled.".to_string(),
            TranscodeError::Worker { .. } => "Transcoding stopped unexpectedly".to_string(),
        }
    }

    /// Checks if this error stems from the chosen input rather than the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TranscodeError::Setup(SetupError::NoVideoTrack | SetupError::SourceOpen { .. })
        )
    }
}

pub type TranscodeResult<T> = std::result::Result<T, TranscodeError>;
