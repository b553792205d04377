//! Buffer-queue codec seam.
//!
//! Decoders and encoders expose the same port: a queue of input slots that
//! the pipeline fills and a queue of output buffers it drains. Every queue
//! operation takes a short timeout; `Ok(None)` means nothing was ready in
//! time and is not an error.

use std::fmt;
use std::time::Duration;

use super::{InputSlot, MediaFormat, MediaResult, OutputSlot, SampleBuffer};

/// Whether a codec port decodes or encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CodecRole {
    Decoder,
    Encoder,
}

impl fmt::Display for CodecRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecRole::Decoder => write!(f, "decoder"),
            CodecRole::Encoder => write!(f, "encoder"),
        }
    }
}

/// Item drained from a codec's output queue.
#[derive(Debug)]
pub enum CodecOutput {
    /// A filled buffer. The slot must be released back to the same port.
    Buffer {
        slot: OutputSlot,
        sample: SampleBuffer,
    },
    /// The codec settled (or changed) its output format.
    FormatChanged(MediaFormat),
}

/// A started decoder or encoder.
pub trait CodecPort: Send {
    /// Implementation name used in logs and errors.
    fn name(&self) -> &str;

    /// Waits up to `timeout` for a free input slot.
    ///
    /// # Errors
    /// - `MediaError::Codec` - Codec entered an error state
    fn try_acquire_input(&mut self, timeout: Duration) -> MediaResult<Option<InputSlot>>;

    /// Queues `sample` into a previously acquired slot.
    ///
    /// # Errors
    /// - `MediaError::InvalidSlot` - Slot was not handed out by this port
    /// - `MediaError::Codec` - Codec rejected the sample
    fn submit(&mut self, slot: InputSlot, sample: SampleBuffer) -> MediaResult<()>;

    /// Waits up to `timeout` for output.
    ///
    /// # Errors
    /// - `MediaError::Codec` - Codec entered an error state
    fn try_acquire_output(&mut self, timeout: Duration) -> MediaResult<Option<CodecOutput>>;

    /// Output format when the codec knows it before producing data.
    ///
    /// Encoders that settle their output format at configuration time report
    /// it here so the writer track can be registered ahead of the first pass.
    fn output_format(&self) -> Option<MediaFormat> {
        None
    }

    /// Returns an output buffer to the codec.
    ///
    /// # Errors
    /// - `MediaError::InvalidSlot` - Slot is not currently borrowed from this port
    fn release(&mut self, slot: OutputSlot) -> MediaResult<()>;

    /// Stops the codec and frees its resources.
    ///
    /// # Errors
    /// - `MediaError::Codec` - Platform failed to stop or release the codec
    fn close(&mut self) -> MediaResult<()>;
}
