//! Container writer seam.

use super::{MediaFormat, MediaResult, SampleBuffer};

/// Multiplexer producing the output container.
///
/// Tracks must be added before `start`; samples may only be written between
/// `start` and `stop`.
pub trait ContainerWriter: Send {
    /// Adds a track and returns its writer-side index.
    ///
    /// # Errors
    /// - `MediaError::Writer` - Format not accepted by the container or writer already started
    fn add_track(&mut self, format: &MediaFormat) -> MediaResult<usize>;

    /// # Errors
    /// - `MediaError::Writer` - Header could not be written
    fn start(&mut self) -> MediaResult<()>;

    /// # Errors
    /// - `MediaError::Writer` - Unknown track index or write failure
    fn write_sample(&mut self, track_index: usize, sample: &SampleBuffer) -> MediaResult<()>;

    /// Finalizes the container (trailer, index).
    ///
    /// # Errors
    /// - `MediaError::Writer` - Trailer could not be written
    fn stop(&mut self) -> MediaResult<()>;

    /// Releases the output handle.
    ///
    /// # Errors
    /// - `MediaError::Writer` - Platform failed to release the handle
    fn close(&mut self) -> MediaResult<()>;
}
