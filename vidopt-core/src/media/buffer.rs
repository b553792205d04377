//! Sample buffers and codec queue slots.

use bytes::Bytes;

/// Per-buffer flags carried alongside sample payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// Final buffer of the stream. May carry payload.
    pub end_of_stream: bool,
    /// Codec configuration data (SPS/PPS, ...) rather than a media sample.
    pub config_only: bool,
    /// Sync sample; decodable without earlier samples.
    pub key_frame: bool,
}

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags {
        end_of_stream: false,
        config_only: false,
        key_frame: false,
    };

    pub const END_OF_STREAM: BufferFlags = BufferFlags {
        end_of_stream: true,
        config_only: false,
        key_frame: false,
    };

    pub const CONFIG: BufferFlags = BufferFlags {
        end_of_stream: false,
        config_only: true,
        key_frame: false,
    };

    pub const KEY_FRAME: BufferFlags = BufferFlags {
        end_of_stream: false,
        config_only: false,
        key_frame: true,
    };
}

/// A sample payload with its presentation timestamp.
///
/// The payload is reference counted; handing a `SampleBuffer` to a codec or
/// writer never copies codec memory implicitly. Callers that must detach the
/// data from a codec queue use [`SampleBuffer::detached_copy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBuffer {
    pub data: Bytes,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

impl SampleBuffer {
    pub fn new(data: impl Into<Bytes>, presentation_time_us: i64, flags: BufferFlags) -> Self {
        Self {
            data: data.into(),
            presentation_time_us,
            flags,
        }
    }

    /// Empty buffer marking the end of a stream.
    pub fn end_of_stream(presentation_time_us: i64) -> Self {
        Self {
            data: Bytes::new(),
            presentation_time_us,
            flags: BufferFlags::END_OF_STREAM,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.end_of_stream
    }

    pub fn is_config(&self) -> bool {
        self.flags.config_only
    }

    /// Copies the payload into fresh memory owned by the returned buffer.
    pub fn detached_copy(&self) -> SampleBuffer {
        SampleBuffer {
            data: Bytes::copy_from_slice(&self.data),
            presentation_time_us: self.presentation_time_us,
            flags: self.flags,
        }
    }
}

/// Free input slot acquired from a codec.
///
/// Must be given back through `CodecPort::submit` before the same codec
/// hands the slot out again.
#[derive(Debug, PartialEq, Eq)]
pub struct InputSlot {
    pub index: usize,
    /// Largest payload the slot accepts, when the codec reports one.
    pub capacity: Option<usize>,
}

/// Output slot holding a buffer borrowed from a codec.
#[derive(Debug, PartialEq, Eq)]
pub struct OutputSlot {
    pub index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_of_stream_buffer_is_empty() {
        let buffer = SampleBuffer::end_of_stream(1_000);
        assert!(buffer.is_end_of_stream());
        assert_eq!(buffer.size_bytes(), 0);
        assert_eq!(buffer.presentation_time_us, 1_000);
    }

    #[test]
    fn test_detached_copy_does_not_share_memory() {
        let buffer = SampleBuffer::new(vec![1u8, 2, 3], 33_333, BufferFlags::KEY_FRAME);
        let copy = buffer.detached_copy();

        assert_eq!(copy, buffer);
        assert_ne!(copy.data.as_ptr(), buffer.data.as_ptr());
    }
}
