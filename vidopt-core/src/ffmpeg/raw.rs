//! Raw layouts exchanged between libav decoders and encoders.

use ffmpeg_next::format::{Pixel, Sample, sample};
use ffmpeg_next::frame;
use ffmpeg_next::ChannelLayout;

use crate::media::{MediaError, MediaResult};

pub(super) const RAW_PIXEL: Pixel = Pixel::YUV420P;
pub(super) const RAW_SAMPLE: Sample = Sample::F32(sample::Type::Packed);
const F32_BYTES: usize = 4;

/// Owns a libav converter context that is only ever touched by the port
/// holding it.
pub(super) struct Exclusive<T>(pub(super) T);

// SAFETY: the wrapped sws/swr context is owned by exactly one codec port and
// is never aliased, so moving it to the pipeline worker thread is sound.
unsafe impl<T> Send for Exclusive<T> {}

/// Copies codec configuration into a libav-owned, padded allocation.
///
/// Returns the pointer and size to store in `extradata`/`extradata_size`.
/// Ownership passes to the codec context or parameters receiving it.
pub(super) fn alloc_extradata(data: &[u8]) -> (*mut u8, i32) {
    // SAFETY: av_mallocz returns zeroed memory of the requested size or null,
    // and the copy stays within the `data.len()` bytes allocated before padding.
    unsafe {
        let size = data.len() + ffmpeg_next::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
        let buffer = ffmpeg_next::ffi::av_mallocz(size) as *mut u8;
        if buffer.is_null() {
            return (std::ptr::null_mut(), 0);
        }
        std::ptr::copy_nonoverlapping(data.as_ptr(), buffer, data.len());
        (buffer, data.len() as i32)
    }
}

/// Layout for `channels`, honouring what a decoder reported when it did.
pub(super) fn channel_layout(reported: ChannelLayout, channels: u16) -> ChannelLayout {
    if reported.is_empty() {
        ChannelLayout::default(i32::from(channels))
    } else {
        reported
    }
}

/// Byte size of a tightly packed YUV 4:2:0 picture.
pub(super) fn yuv420p_size(width: u32, height: u32) -> usize {
    let (width, height) = (width as usize, height as usize);
    let chroma = width.div_ceil(2) * height.div_ceil(2);
    width * height + 2 * chroma
}

/// Copies the planes of a YUV 4:2:0 frame without row padding.
pub(super) fn pack_video(frame: &frame::Video) -> Vec<u8> {
    let mut packed = Vec::with_capacity(yuv420p_size(frame.width(), frame.height()));
    for plane in 0..3 {
        let stride = frame.stride(plane);
        let row = frame.plane_width(plane) as usize;
        let data = frame.data(plane);
        for y in 0..frame.plane_height(plane) as usize {
            packed.extend_from_slice(&data[y * stride..y * stride + row]);
        }
    }
    packed
}

/// Builds a YUV 4:2:0 frame from tightly packed planes.
///
/// # Errors
/// - `MediaError::Codec` - `data` does not match the picture size
pub(super) fn unpack_video(
    codec: &str,
    data: &[u8],
    width: u32,
    height: u32,
) -> MediaResult<frame::Video> {
    let expected = yuv420p_size(width, height);
    if data.len() != expected {
        return Err(MediaError::codec(
            codec,
            format!(
                "raw picture of {} bytes does not match {width}x{height} ({expected} bytes)",
                data.len()
            ),
        ));
    }

    let mut frame = frame::Video::new(RAW_PIXEL, width, height);
    let mut offset = 0;
    for plane in 0..3 {
        let stride = frame.stride(plane);
        let row = frame.plane_width(plane) as usize;
        let rows = frame.plane_height(plane) as usize;
        let target = frame.data_mut(plane);
        for y in 0..rows {
            target[y * stride..y * stride + row].copy_from_slice(&data[offset..offset + row]);
            offset += row;
        }
    }
    Ok(frame)
}

/// Interleaved f32 samples of a packed float frame.
pub(super) fn pack_audio(frame: &frame::Audio) -> Vec<u8> {
    let len = frame.samples() * usize::from(frame.channels()) * F32_BYTES;
    frame.data(0)[..len].to_vec()
}

/// Builds a packed float frame from interleaved f32 samples.
///
/// # Errors
/// - `MediaError::Codec` - `data` is not a whole number of sample frames
pub(super) fn unpack_audio(
    codec: &str,
    data: &[u8],
    channels: u16,
    rate: u32,
) -> MediaResult<frame::Audio> {
    let frame_bytes = usize::from(channels.max(1)) * F32_BYTES;
    if data.len() % frame_bytes != 0 {
        return Err(MediaError::codec(
            codec,
            format!("raw audio of {} bytes is not a multiple of {frame_bytes}", data.len()),
        ));
    }

    let samples = data.len() / frame_bytes;
    let mut frame = frame::Audio::new(
        RAW_SAMPLE,
        samples,
        ChannelLayout::default(i32::from(channels)),
    );
    frame.set_rate(rate);
    frame.data_mut(0)[..data.len()].copy_from_slice(data);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuv_size_rounds_chroma_up() {
        assert_eq!(yuv420p_size(1280, 720), 1280 * 720 * 3 / 2);
        assert_eq!(yuv420p_size(3, 3), 9 + 2 * 4);
    }
}
