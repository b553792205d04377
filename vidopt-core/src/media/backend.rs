//! Platform backend: factory for sources, codecs and writers.

use std::path::Path;

use super::{CodecPort, ContainerWriter, MediaFormat, MediaResult, MediaSource, mime};

/// Everything the pipeline needs from the platform layer.
///
/// Implementations exist for simulation (`vidopt-sim`) and, behind the
/// `ffmpeg` feature, for libav via `ffmpeg-next`.
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Opens the input for reading.
    ///
    /// # Errors
    /// - `MediaError::Source` - Input missing or not a readable container
    fn open_source(&self, input: &Path) -> MediaResult<Box<dyn MediaSource>>;

    /// Creates and starts a decoder for `source_format`.
    ///
    /// `output` describes the raw layout the downstream encoder consumes
    /// (dimensions for video, sample rate and channels for audio); backends
    /// convert decoded data into it.
    ///
    /// # Errors
    /// - `MediaError::CodecUnavailable` - No decoder for the mime type
    /// - `MediaError::Codec` - Decoder rejected the configuration
    fn create_decoder(
        &self,
        source_format: &MediaFormat,
        output: &MediaFormat,
    ) -> MediaResult<Box<dyn CodecPort>>;

    /// Creates and starts an encoder producing `target`.
    ///
    /// # Errors
    /// - `MediaError::CodecUnavailable` - No encoder for the mime type
    /// - `MediaError::Codec` - Encoder rejected the configuration
    fn create_encoder(&self, target: &MediaFormat) -> MediaResult<Box<dyn CodecPort>>;

    /// Creates the container writer at `output`.
    ///
    /// # Errors
    /// - `MediaError::Writer` - Output location not writable
    fn create_writer(&self, output: &Path) -> MediaResult<Box<dyn ContainerWriter>>;

    /// Mime type of the containers produced by `create_writer`.
    fn output_mime_type(&self) -> &str {
        mime::CONTAINER_MP4
    }
}
