//! Platform seams: source, codec ports, container writer and the backend
//! that creates them.

pub mod backend;
pub mod buffer;
pub mod codec;
pub mod error;
pub mod format;
pub mod source;
pub mod writer;

pub use backend::MediaBackend;
pub use buffer::{BufferFlags, InputSlot, OutputSlot, SampleBuffer};
pub use codec::{CodecOutput, CodecPort, CodecRole};
pub use error::{MediaError, MediaResult};
pub use format::{MediaFormat, TrackKind, mime};
pub use source::{MediaSource, SourceSample};
pub use writer::ContainerWriter;
