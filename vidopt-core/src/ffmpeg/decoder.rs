//! libav decoder behind the codec port, converting to the raw layouts.

use std::time::Duration;

use ffmpeg_next::software::{resampling, scaling};
use ffmpeg_next::{ChannelLayout, Packet, codec, decoder, frame, packet};
use tracing::{debug, trace};

use super::port::PortQueue;
use super::raw::{
    Exclusive, RAW_PIXEL, RAW_SAMPLE, alloc_extradata, channel_layout, pack_audio, pack_video,
};
use super::{codec_error, codec_id_for_mime, init, is_again, is_drained};
use crate::media::{
    BufferFlags, CodecOutput, CodecPort, InputSlot, MediaError, MediaFormat, MediaResult,
    OutputSlot, SampleBuffer, TrackKind,
};

const INPUT_SLOTS: usize = 4;

enum Stage {
    Video {
        decoder: decoder::Video,
        scaler: Option<Exclusive<scaling::Context>>,
        width: u32,
        height: u32,
    },
    Audio {
        decoder: decoder::Audio,
        resampler: Option<Exclusive<resampling::Context>>,
        rate: u32,
        channels: u16,
    },
}

/// Decoder producing planar YUV 4:2:0 or interleaved f32 at the target layout.
pub struct FfmpegDecoder {
    queue: PortQueue,
    stage: Stage,
    output: MediaFormat,
    announced: bool,
    last_pts: i64,
    closed: bool,
}

impl FfmpegDecoder {
    /// Opens a decoder for `source_format` that emits data shaped like `output`.
    ///
    /// # Errors
    /// - `MediaError::CodecUnavailable` - libav has no decoder for the mime type
    /// - `MediaError::Codec` - Decoder failed to open or `output` lacks its layout
    pub fn new(source_format: &MediaFormat, output: &MediaFormat) -> MediaResult<Self> {
        init()?;
        let kind = source_format.track_kind().ok_or_else(|| {
            MediaError::codec(
                "libav",
                format!("{} is neither audio nor video", source_format.mime_type),
            )
        })?;
        let unavailable = || MediaError::CodecUnavailable {
            kind,
            mime_type: source_format.mime_type.clone(),
        };
        let id = codec_id_for_mime(&source_format.mime_type).ok_or_else(unavailable)?;
        let codec = ffmpeg_next::decoder::find(id).ok_or_else(unavailable)?;
        let name = format!("{}-decoder", codec.name());

        let mut context = codec::context::Context::new_with_codec(codec);
        configure(&mut context, source_format);

        let stage = match kind {
            TrackKind::Video => {
                let (width, height) = output
                    .dimensions()
                    .ok_or_else(|| MediaError::codec(&name, "raw video output needs dimensions"))?;
                Stage::Video {
                    decoder: context.decoder().video().map_err(|e| codec_error(&name, e))?,
                    scaler: None,
                    width,
                    height,
                }
            }
            TrackKind::Audio => {
                let (Some(rate), Some(channels)) = (output.sample_rate, output.channel_count) else {
                    return Err(MediaError::codec(
                        &name,
                        "raw audio output needs a sample rate and channel count",
                    ));
                };
                Stage::Audio {
                    decoder: context.decoder().audio().map_err(|e| codec_error(&name, e))?,
                    resampler: None,
                    rate,
                    channels,
                }
            }
        };

        debug!(decoder = %name, source = %source_format, output = %output, "Opened libav decoder");
        Ok(Self {
            queue: PortQueue::new(name, INPUT_SLOTS),
            stage,
            output: output.clone(),
            announced: false,
            last_pts: 0,
            closed: false,
        })
    }

    fn ensure_open(&self) -> MediaResult<()> {
        if self.closed {
            return Err(MediaError::codec(self.queue.name(), "decoder is closed"));
        }
        Ok(())
    }

    fn send(&mut self, packet: &Packet) -> MediaResult<()> {
        loop {
            let sent = match &mut self.stage {
                Stage::Video { decoder, .. } => decoder.send_packet(packet),
                Stage::Audio { decoder, .. } => decoder.send_packet(packet),
            };
            match sent {
                Ok(()) => return self.drain(),
                Err(e) if is_again(&e) => {
                    // Output must be pulled before the decoder takes more input.
                    if self.drain()? == 0 {
                        return Err(codec_error(self.queue.name(), e));
                    }
                }
                Err(e) => return Err(codec_error(self.queue.name(), e)),
            }
        }
    }

    /// Pulls every frame the decoder has ready. Returns how many were queued.
    fn drain(&mut self) -> MediaResult<usize> {
        let name = self.queue.name().to_string();
        let mut drained = 0;

        loop {
            let converted = match &mut self.stage {
                Stage::Video {
                    decoder,
                    scaler,
                    width,
                    height,
                } => {
                    let mut decoded = frame::Video::empty();
                    match decoder.receive_frame(&mut decoded) {
                        Ok(()) => {}
                        Err(e) if is_drained(&e) => return Ok(drained),
                        Err(e) => return Err(codec_error(&name, e)),
                    }
                    let scaled = scale(&name, scaler, &decoded, *width, *height)?;
                    Some((pack_video(&scaled), decoded.timestamp().or(decoded.pts())))
                }
                Stage::Audio {
                    decoder,
                    resampler,
                    rate,
                    channels,
                } => {
                    let mut decoded = frame::Audio::empty();
                    match decoder.receive_frame(&mut decoded) {
                        Ok(()) => {}
                        Err(e) if is_drained(&e) => return Ok(drained),
                        Err(e) => return Err(codec_error(&name, e)),
                    }
                    let resampled = resample(&name, resampler, &decoded, *rate, *channels)?;
                    (resampled.samples() > 0)
                        .then(|| (pack_audio(&resampled), decoded.timestamp().or(decoded.pts())))
                }
            };

            if let Some((data, pts)) = converted {
                self.emit(data, pts);
                drained += 1;
            }
        }
    }

    fn emit(&mut self, data: Vec<u8>, pts: Option<i64>) {
        if !self.announced {
            self.queue.push_format(self.output.clone());
            self.announced = true;
        }
        let pts = pts.unwrap_or(self.last_pts);
        self.last_pts = pts;
        self.queue.push_sample(SampleBuffer::new(data, pts, BufferFlags::NONE));
    }

    fn finish(&mut self) -> MediaResult<()> {
        let sent = match &mut self.stage {
            Stage::Video { decoder, .. } => decoder.send_eof(),
            Stage::Audio { decoder, .. } => decoder.send_eof(),
        };
        sent.map_err(|e| codec_error(self.queue.name(), e))?;
        self.drain()?;

        let tail = match &mut self.stage {
            Stage::Audio {
                resampler: Some(Exclusive(context)),
                channels,
                ..
            } => {
                let pending = context.delay().map(|delay| delay.output).unwrap_or(0);
                if pending > 0 {
                    let mut tail = frame::Audio::new(
                        RAW_SAMPLE,
                        pending as usize,
                        ChannelLayout::default(i32::from(*channels)),
                    );
                    context
                        .flush(&mut tail)
                        .map_err(|e| codec_error(self.queue.name(), e))?;
                    (tail.samples() > 0).then(|| pack_audio(&tail))
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(data) = tail {
            self.emit(data, None);
        }

        trace!(decoder = %self.queue.name(), "Decoder flushed");
        self.queue.push_sample(SampleBuffer::end_of_stream(self.last_pts));
        Ok(())
    }
}

impl CodecPort for FfmpegDecoder {
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

        // Configuration already reached the context as extradata.
        if !sample.is_config() && !sample.data.is_empty() {
            let mut packet = Packet::copy(&sample.data);
            packet.set_pts(Some(sample.presentation_time_us));
            if sample.flags.key_frame {
                packet.set_flags(packet::Flags::KEY);
            }
            self.send(&packet)?;
        }

        if sample.is_end_of_stream() {
            self.finish()?;
        }
        Ok(())
    }

    fn try_acquire_output(&mut self, _timeout: Duration) -> MediaResult<Option<CodecOutput>> {
        self.ensure_open()?;
        Ok(self.queue.pop_output())
    }

    fn release(&mut self, slot: OutputSlot) -> MediaResult<()> {
        self.queue.release(slot)
    }

    fn close(&mut self) -> MediaResult<()> {
        if !self.closed {
            self.closed = true;
            self.queue.clear();
            debug!(decoder = %self.queue.name(), "Closed libav decoder");
        }
        Ok(())
    }
}

fn configure(context: &mut codec::context::Context, format: &MediaFormat) {
    // SAFETY: the context is freshly allocated and not yet opened; fields set
    // here are read by avcodec_open2 only.
    unsafe {
        let raw = context.as_mut_ptr();
        if let Some((width, height)) = format.dimensions() {
            (*raw).width = width as i32;
            (*raw).height = height as i32;
        }
        if let Some(rate) = format.sample_rate {
            (*raw).sample_rate = rate as i32;
        }
        if let Some(channels) = format.channel_count {
            ffmpeg_next::ffi::av_channel_layout_default(&mut (*raw).ch_layout, i32::from(channels));
        }
        if let Some(extradata) = format.extradata.as_deref().filter(|data| !data.is_empty()) {
            let (buffer, size) = alloc_extradata(extradata);
            (*raw).extradata = buffer;
            (*raw).extradata_size = size;
        }
    }
}

fn scale(
    name: &str,
    scaler: &mut Option<Exclusive<scaling::Context>>,
    decoded: &frame::Video,
    width: u32,
    height: u32,
) -> MediaResult<frame::Video> {
    let stale = scaler.as_ref().is_none_or(|Exclusive(context)| {
        let input = context.input();
        input.format != decoded.format()
            || input.width != decoded.width()
            || input.height != decoded.height()
    });
    if stale {
        let context = scaling::Context::get(
            decoded.format(),
            decoded.width(),
            decoded.height(),
            RAW_PIXEL,
            width,
            height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| codec_error(name, e))?;
        *scaler = Some(Exclusive(context));
    }
    let Some(Exclusive(context)) = scaler.as_mut() else {
        return Err(MediaError::codec(name, "scaler unavailable"));
    };

    let mut scaled = frame::Video::empty();
    context.run(decoded, &mut scaled).map_err(|e| codec_error(name, e))?;
    Ok(scaled)
}

fn resample(
    name: &str,
    resampler: &mut Option<Exclusive<resampling::Context>>,
    decoded: &frame::Audio,
    rate: u32,
    channels: u16,
) -> MediaResult<frame::Audio> {
    let source_layout = channel_layout(decoded.channel_layout(), decoded.channels());
    let target_layout = ChannelLayout::default(i32::from(channels));

    let stale = resampler.as_ref().is_none_or(|Exclusive(context)| {
        let input = context.input();
        input.format != decoded.format()
            || input.rate != decoded.rate()
            || input.channel_layout != source_layout
    });
    if stale {
        let context = resampling::Context::get(
            decoded.format(),
            source_layout,
            decoded.rate(),
            RAW_SAMPLE,
            target_layout,
            rate,
        )
        .map_err(|e| codec_error(name, e))?;
        *resampler = Some(Exclusive(context));
    }
    let Some(Exclusive(context)) = resampler.as_mut() else {
        return Err(MediaError::codec(name, "resampler unavailable"));
    };

    // Room for rate conversion plus whatever the resampler still buffers.
    let capacity = decoded.samples() as u64 * u64::from(rate) / u64::from(decoded.rate().max(1));
    let mut resampled = frame::Audio::new(RAW_SAMPLE, capacity as usize + 64, target_layout);
    resampled.set_rate(rate);
    context
        .run(decoded, &mut resampled)
        .map_err(|e| codec_error(name, e))?;
    Ok(resampled)
}
