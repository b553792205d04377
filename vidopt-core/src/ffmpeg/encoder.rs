//! libav encoder behind the codec port.

use std::time::Duration;

use ffmpeg_next::software::resampling;
use ffmpeg_next::{ChannelLayout, Dictionary, Packet, Rational, Rescale, codec, encoder, frame};
use tracing::{debug, trace};

use super::port::PortQueue;
use super::raw::{Exclusive, RAW_PIXEL, RAW_SAMPLE, unpack_audio, unpack_video};
use super::{MICROS, codec_error, codec_id_for_mime, init, is_again, is_drained};
use crate::media::{
    BufferFlags, CodecOutput, CodecPort, InputSlot, MediaError, MediaFormat, MediaResult,
    OutputSlot, SampleBuffer, TrackKind,
};

const INPUT_SLOTS: usize = 4;
const DEFAULT_FRAME_RATE: u32 = 30;
const F32_BYTES: usize = 4;

enum Stage {
    Video {
        encoder: encoder::video::Encoder,
        width: u32,
        height: u32,
    },
    Audio {
        encoder: encoder::audio::Encoder,
        resampler: Exclusive<resampling::Context>,
        layout: ChannelLayout,
        rate: u32,
        channels: u16,
        /// Interleaved f32 bytes waiting for a full encoder frame.
        pending: Vec<u8>,
        frame_size: usize,
        /// Position of the next frame in samples, once the first input arrived.
        next_sample: Option<i64>,
    },
}

/// Encoder accepting the raw layouts produced by [`super::FfmpegDecoder`].
pub struct FfmpegEncoder {
    queue: PortQueue,
    stage: Stage,
    format: MediaFormat,
    time_base: Rational,
    last_pts: i64,
    closed: bool,
}

impl FfmpegEncoder {
    /// Opens an encoder for `target`, by implementation name when `hardware`
    /// is given.
    ///
    /// # Errors
    /// - `MediaError::CodecUnavailable` - libav has no encoder for the mime type
    /// - `MediaError::Codec` - Encoder rejected the configuration
    pub fn new(target: &MediaFormat, hardware: Option<&str>) -> MediaResult<Self> {
        init()?;
        let kind = target.track_kind().ok_or_else(|| {
            MediaError::codec("libav", format!("{} is neither audio nor video", target.mime_type))
        })?;
        let unavailable = || MediaError::CodecUnavailable {
            kind,
            mime_type: target.mime_type.clone(),
        };
        let id = codec_id_for_mime(&target.mime_type).ok_or_else(unavailable)?;
        let codec = match hardware {
            Some(name) => ffmpeg_next::encoder::find_by_name(name),
            None => ffmpeg_next::encoder::find(id),
        }
        .ok_or_else(unavailable)?;
        let name = codec.name().to_string();
        let context = codec::context::Context::new_with_codec(codec);

        let (stage, time_base) = match kind {
            TrackKind::Video => open_video(&name, context, target)?,
            TrackKind::Audio => open_audio(&name, context, target)?,
        };

        let mut format = target.clone();
        format.extradata = extradata(&stage);
        debug!(
            encoder = %name,
            hardware = hardware.is_some(),
            format = %format,
            "Opened libav encoder"
        );

        Ok(Self {
            queue: PortQueue::new(name, INPUT_SLOTS),
            stage,
            format,
            time_base,
            last_pts: 0,
            closed: false,
        })
    }

    fn ensure_open(&self) -> MediaResult<()> {
        if self.closed {
            return Err(MediaError::codec(self.queue.name(), "encoder is closed"));
        }
        Ok(())
    }

    fn encode_video(&mut self, sample: &SampleBuffer) -> MediaResult<()> {
        let Stage::Video { width, height, .. } = &self.stage else {
            return Ok(());
        };
        let mut picture = unpack_video(self.queue.name(), &sample.data, *width, *height)?;
        picture.set_pts(Some(sample.presentation_time_us));
        self.send(Some(&*picture))
    }

    fn encode_audio(&mut self, sample: &SampleBuffer, flush: bool) -> MediaResult<()> {
        let name = self.queue.name().to_string();
        let Stage::Audio {
            pending,
            frame_size,
            next_sample,
            rate,
            channels,
            ..
        } = &mut self.stage
        else {
            return Ok(());
        };

        if next_sample.is_none() && !sample.data.is_empty() {
            *next_sample = Some(
                sample
                    .presentation_time_us
                    .rescale(MICROS, Rational(1, *rate as i32)),
            );
        }
        pending.extend_from_slice(&sample.data);

        let (rate, channels) = (*rate, *channels);
        let frame_bytes = *frame_size * usize::from(channels) * F32_BYTES;
        let mut chunks = Vec::new();
        while pending.len() >= frame_bytes {
            chunks.push(pending.drain(..frame_bytes).collect::<Vec<_>>());
        }
        // The encoder accepts one short frame at the end of the stream.
        if flush && !pending.is_empty() {
            chunks.push(std::mem::take(pending));
        }

        for chunk in chunks {
            let packed = unpack_audio(&name, &chunk, channels, rate)?;
            let frame = self.convert_audio(&name, &packed)?;
            self.send(Some(&*frame))?;
        }
        Ok(())
    }

    fn convert_audio(&mut self, name: &str, packed: &frame::Audio) -> MediaResult<frame::Audio> {
        let Stage::Audio {
            encoder,
            resampler: Exclusive(resampler),
            layout,
            rate,
            next_sample,
            ..
        } = &mut self.stage
        else {
            return Err(MediaError::codec(name, "not an audio encoder"));
        };

        let mut converted = frame::Audio::new(encoder.format(), packed.samples(), *layout);
        converted.set_rate(*rate);
        resampler
            .run(packed, &mut converted)
            .map_err(|e| codec_error(name, e))?;

        let position = next_sample.unwrap_or(0);
        converted.set_pts(Some(position));
        *next_sample = Some(position + converted.samples() as i64);
        Ok(converted)
    }

    /// Sends a frame, or end of stream for `None`, then drains packets.
    fn send(&mut self, frame: Option<&frame::Frame>) -> MediaResult<()> {
        loop {
            let sent = match (&mut self.stage, frame) {
                (Stage::Video { encoder, .. }, Some(frame)) => encoder.send_frame(frame),
                (Stage::Audio { encoder, .. }, Some(frame)) => encoder.send_frame(frame),
                (Stage::Video { encoder, .. }, None) => encoder.send_eof(),
                (Stage::Audio { encoder, .. }, None) => encoder.send_eof(),
            };
            match sent {
                Ok(()) => return self.drain().map(|_| ()),
                Err(e) if is_again(&e) => {
                    if self.drain()? == 0 {
                        return Err(codec_error(self.queue.name(), e));
                    }
                }
                Err(e) => return Err(codec_error(self.queue.name(), e)),
            }
        }
    }

    fn drain(&mut self) -> MediaResult<usize> {
        let mut drained = 0;
        loop {
            let mut packet = Packet::empty();
            let received = match &mut self.stage {
                Stage::Video { encoder, .. } => encoder.receive_packet(&mut packet),
                Stage::Audio { encoder, .. } => encoder.receive_packet(&mut packet),
            };
            match received {
                Ok(()) => {}
                Err(e) if is_drained(&e) => return Ok(drained),
                Err(e) => return Err(codec_error(self.queue.name(), e)),
            }

            let pts = packet
                .pts()
                .or(packet.dts())
                .map(|ts| ts.rescale(self.time_base, MICROS))
                .unwrap_or(self.last_pts);
            self.last_pts = pts;
            let flags = if packet.is_key() {
                BufferFlags::KEY_FRAME
            } else {
                BufferFlags::NONE
            };
            let data = packet.data().map(<[u8]>::to_vec).unwrap_or_default();
            self.queue.push_sample(SampleBuffer::new(data, pts, flags));
            drained += 1;
        }
    }
}

impl CodecPort for FfmpegEncoder {
    fn name(&self) -> &str {
        self.queue.name()
    }

    fn try_acquire_input(&mut self, _timeout: Duration) -> MediaResult<Option<InputSlot>> {
        self.ensure_open()?;
        Ok(self.queue.acquire_input())
    }

    fn submit(&mut self, slot: InputSlot, sample: SampleBuffer) -> MediaResult<()> {
        self.ensure_open()?;
        self.queue.redeem(slot)?;

        let end_of_stream = sample.is_end_of_stream();
        match self.stage {
            Stage::Video { .. } if !sample.data.is_empty() => self.encode_video(&sample)?,
            Stage::Video { .. } => {}
            Stage::Audio { .. } => self.encode_audio(&sample, end_of_stream)?,
        }

        if end_of_stream {
            self.send(None)?;
            trace!(encoder = %self.queue.name(), "Encoder flushed");
            self.queue.push_sample(SampleBuffer::end_of_stream(self.last_pts));
        }
        Ok(())
    }

    fn try_acquire_output(&mut self, _timeout: Duration) -> MediaResult<Option<CodecOutput>> {
        self.ensure_open()?;
        Ok(self.queue.pop_output())
    }

    fn output_format(&self) -> Option<MediaFormat> {
        Some(self.format.clone())
    }

    fn release(&mut self, slot: OutputSlot) -> MediaResult<()> {
        self.queue.release(slot)
    }

    fn close(&mut self) -> MediaResult<()> {
        if !self.closed {
            self.closed = true;
            self.queue.clear();
            debug!(encoder = %self.queue.name(), "Closed libav encoder");
        }
        Ok(())
    }
}

fn open_video(
    name: &str,
    context: codec::context::Context,
    target: &MediaFormat,
) -> MediaResult<(Stage, Rational)> {
    let (width, height) = target
        .dimensions()
        .ok_or_else(|| MediaError::codec(name, "video target needs dimensions"))?;
    let frame_rate = target.frame_rate.unwrap_or(DEFAULT_FRAME_RATE).max(1);

    let mut encoder = context
        .encoder()
        .video()
        .map_err(|e| codec_error(name, e))?;
    encoder.set_width(width);
    encoder.set_height(height);
    encoder.set_format(RAW_PIXEL);
    encoder.set_time_base(MICROS);
    encoder.set_frame_rate(Some(Rational(frame_rate as i32, 1)));
    encoder.set_gop(frame_rate * 2);
    // Samples carry a single timestamp, so decode order must equal presentation order.
    encoder.set_max_b_frames(0);
    if let Some(bitrate) = target.bitrate_bps {
        encoder.set_bit_rate(bitrate as usize);
    }
    encoder.set_flags(codec::Flags::GLOBAL_HEADER);

    let encoder = encoder
        .open_with(Dictionary::new())
        .map_err(|e| codec_error(name, e))?;
    Ok((
        Stage::Video {
            encoder,
            width,
            height,
        },
        MICROS,
    ))
}

fn open_audio(
    name: &str,
    context: codec::context::Context,
    target: &MediaFormat,
) -> MediaResult<(Stage, Rational)> {
    let (Some(rate), Some(channels)) = (target.sample_rate, target.channel_count) else {
        return Err(MediaError::codec(
            name,
            "audio target needs a sample rate and channel count",
        ));
    };
    let layout = ChannelLayout::default(i32::from(channels));
    let time_base = Rational(1, rate as i32);

    let mut encoder = context
        .encoder()
        .audio()
        .map_err(|e| codec_error(name, e))?;
    let sample_format = encoder
        .codec()
        .and_then(|codec| codec.audio().ok())
        .and_then(|audio| audio.formats().and_then(|mut formats| formats.next()))
        .unwrap_or(RAW_SAMPLE);
    encoder.set_format(sample_format);
    encoder.set_rate(rate as i32);
    encoder.set_channel_layout(layout);
    encoder.set_time_base(time_base);
    if let Some(bitrate) = target.bitrate_bps {
        encoder.set_bit_rate(bitrate as usize);
    }
    encoder.set_flags(codec::Flags::GLOBAL_HEADER);

    let encoder = encoder.open().map_err(|e| codec_error(name, e))?;
    let frame_size = match encoder.frame_size() {
        0 => 1024,
        size => size as usize,
    };
    let resampler = resampling::Context::get(
        RAW_SAMPLE,
        layout,
        rate,
        sample_format,
        layout,
        rate,
    )
    .map_err(|e| codec_error(name, e))?;

    Ok((
        Stage::Audio {
            encoder,
            resampler: Exclusive(resampler),
            layout,
            rate,
            channels,
            pending: Vec::new(),
            frame_size,
            next_sample: None,
        },
        time_base,
    ))
}

fn extradata(stage: &Stage) -> Option<Vec<u8>> {
    let context = match stage {
        Stage::Video { encoder, .. } => encoder.as_ptr(),
        Stage::Audio { encoder, .. } => encoder.as_ptr(),
    };
    // SAFETY: the encoder is open and owns its extradata for its lifetime;
    // the bytes are copied out before returning.
    unsafe {
        if (*context).extradata.is_null() || (*context).extradata_size <= 0 {
            return None;
        }
        Some(
            std::slice::from_raw_parts((*context).extradata, (*context).extradata_size as usize)
                .to_vec(),
        )
    }
}
