//! Demuxing source seam.

use super::{MediaFormat, MediaResult, SampleBuffer};

/// Sample read from a source, tagged with the track it belongs to.
#[derive(Debug, Clone)]
pub struct SourceSample {
    pub track_index: usize,
    pub buffer: SampleBuffer,
}

/// An opened, seekable input container.
///
/// The source has a single read cursor shared by all selected tracks;
/// samples come back in presentation order across the selection.
pub trait MediaSource: Send {
    fn track_count(&self) -> usize;

    /// Format of the track at `index`, in source order.
    ///
    /// # Errors
    /// - `MediaError::Source` - Index out of range or unreadable track header
    fn track_format(&self, index: usize) -> MediaResult<MediaFormat>;

    /// Adds a track to the set returned by `read_sample`.
    ///
    /// # Errors
    /// - `MediaError::Source` - Index out of range
    fn select_track(&mut self, index: usize) -> MediaResult<()>;

    /// Removes a track from the read selection.
    ///
    /// # Errors
    /// - `MediaError::Source` - Index out of range
    fn unselect_track(&mut self, index: usize) -> MediaResult<()>;

    /// Repositions the cursor to the first sample at or after `time_us`.
    ///
    /// # Errors
    /// - `MediaError::Source` - Source is not seekable or the seek failed
    fn seek_to(&mut self, time_us: i64) -> MediaResult<()>;

    /// Next sample among the selected tracks, `None` once they are exhausted.
    ///
    /// # Errors
    /// - `MediaError::Source` - Container data could not be read
    fn read_sample(&mut self) -> MediaResult<Option<SourceSample>>;

    /// Number of samples in a track when the container index knows it.
    fn sample_count_hint(&self, _index: usize) -> Option<u64> {
        None
    }

    /// Releases the underlying handle.
    ///
    /// # Errors
    /// - `MediaError::Source` - Platform failed to release the handle
    fn close(&mut self) -> MediaResult<()>;
}
