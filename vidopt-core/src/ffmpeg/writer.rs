//! MP4 container writer over a libav output context.

use std::path::{Path, PathBuf};

use ffmpeg_next::format::context::Output;
use ffmpeg_next::{Dictionary, Packet, Rational, Rescale, ffi, packet};
use tracing::{debug, info};

use super::raw::alloc_extradata;
use super::{MICROS, codec_id_for_mime, init};
use crate::media::{ContainerWriter, MediaError, MediaFormat, MediaResult, SampleBuffer, TrackKind};

#[derive(Debug, Clone, Copy)]
struct Track {
    stream_index: usize,
    time_base: Rational,
}

/// Writes encoded samples into an MP4 file with the index at the front.
pub struct Mp4Writer {
    path: PathBuf,
    output: Option<Output>,
    tracks: Vec<Track>,
    started: bool,
    stopped: bool,
}

impl Mp4Writer {
    /// Creates the output file.
    ///
    /// # Errors
    /// - `MediaError::Writer` - The path cannot be created as an MP4 output
    pub fn create(path: &Path) -> MediaResult<Self> {
        init()?;
        let output = ffmpeg_next::format::output_as(&path, "mp4")
            .map_err(|e| MediaError::writer(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Created MP4 output");
        Ok(Self {
            path: path.to_path_buf(),
            output: Some(output),
            tracks: Vec::new(),
            started: false,
            stopped: false,
        })
    }

    fn output(&mut self) -> MediaResult<&mut Output> {
        self.output
            .as_mut()
            .ok_or_else(|| MediaError::writer("writer already closed"))
    }
}

impl ContainerWriter for Mp4Writer {
    fn add_track(&mut self, format: &MediaFormat) -> MediaResult<usize> {
        if self.started {
            return Err(MediaError::writer("tracks must be added before start"));
        }
        let kind = format
            .track_kind()
            .ok_or_else(|| MediaError::writer(format!("cannot mux {}", format.mime_type)))?;
        let id = codec_id_for_mime(&format.mime_type)
            .ok_or_else(|| MediaError::writer(format!("no MP4 mapping for {}", format.mime_type)))?;

        let time_base = match (kind, format.sample_rate) {
            (TrackKind::Audio, Some(rate)) if rate > 0 => Rational(1, rate as i32),
            _ => MICROS,
        };

        let output = self.output()?;
        let mut stream = output
            .add_stream(id)
            .map_err(|e| MediaError::writer(format!("failed to add {kind} stream: {e}")))?;
        set_parameters(&stream.parameters(), id, kind, format);
        stream.set_time_base(time_base);

        let stream_index = stream.index();
        self.tracks.push(Track {
            stream_index,
            time_base,
        });
        debug!(track = self.tracks.len() - 1, format = %format, "Added MP4 track");
        Ok(self.tracks.len() - 1)
    }

    fn start(&mut self) -> MediaResult<()> {
        if self.started {
            return Err(MediaError::writer("writer already started"));
        }
        if self.tracks.is_empty() {
            return Err(MediaError::writer("no tracks registered"));
        }

        let mut options = Dictionary::new();
        options.set("movflags", "+faststart");
        let Some(output) = self.output.as_mut() else {
            return Err(MediaError::writer("writer already closed"));
        };
        output
            .write_header_with(options)
            .map_err(|e| MediaError::writer(format!("failed to write header: {e}")))?;

        // The muxer may pick its own time bases while writing the header.
        let time_bases = self
            .tracks
            .iter()
            .map(|track| {
                output
                    .stream(track.stream_index)
                    .map(|stream| stream.time_base())
                    .unwrap_or(track.time_base)
            })
            .collect::<Vec<_>>();
        for (track, time_base) in self.tracks.iter_mut().zip(time_bases) {
            track.time_base = time_base;
        }

        self.started = true;
        Ok(())
    }

    fn write_sample(&mut self, track_index: usize, sample: &SampleBuffer) -> MediaResult<()> {
        if !self.started || self.stopped {
            return Err(MediaError::writer("writer is not accepting samples"));
        }
        let track = *self.tracks.get(track_index).ok_or_else(|| {
            MediaError::writer(format!("unknown track {track_index}"))
        })?;

        let timestamp = sample
            .presentation_time_us
            .rescale(MICROS, track.time_base);
        let mut packet = Packet::copy(&sample.data);
        packet.set_stream(track.stream_index);
        packet.set_pts(Some(timestamp));
        packet.set_dts(Some(timestamp));
        if sample.flags.key_frame {
            packet.set_flags(packet::Flags::KEY);
        }

        let output = self.output()?;
        packet
            .write_interleaved(output)
            .map_err(|e| MediaError::writer(format!("failed to write sample: {e}")))
    }

    fn stop(&mut self) -> MediaResult<()> {
        if !self.started {
            return Err(MediaError::writer("writer was never started"));
        }
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.output()?
            .write_trailer()
            .map_err(|e| MediaError::writer(format!("failed to write trailer: {e}")))?;
        info!(path = %self.path.display(), tracks = self.tracks.len(), "Finalized MP4 output");
        Ok(())
    }

    fn close(&mut self) -> MediaResult<()> {
        if self.output.take().is_some() {
            debug!(path = %self.path.display(), "Closed MP4 output");
        }
        Ok(())
    }
}

fn set_parameters(
    parameters: &ffmpeg_next::codec::Parameters,
    id: ffmpeg_next::codec::Id,
    kind: TrackKind,
    format: &MediaFormat,
) {
    // SAFETY: the parameters belong to a stream of an output that has not
    // written its header yet; nothing else reads them concurrently.
    unsafe {
        let raw = parameters.as_ptr() as *mut ffi::AVCodecParameters;
        (*raw).codec_id = id.into();
        match kind {
            TrackKind::Video => {
                (*raw).codec_type = ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
                (*raw).width = format.width.unwrap_or(0) as i32;
                (*raw).height = format.height.unwrap_or(0) as i32;
                (*raw).format = ffi::AVPixelFormat::AV_PIX_FMT_YUV420P as i32;
            }
            TrackKind::Audio => {
                (*raw).codec_type = ffi::AVMediaType::AVMEDIA_TYPE_AUDIO;
                (*raw).sample_rate = format.sample_rate.unwrap_or(0) as i32;
                ffi::av_channel_layout_default(
                    &mut (*raw).ch_layout,
                    i32::from(format.channel_count.unwrap_or(2)),
                );
            }
        }
        if let Some(bitrate) = format.bitrate_bps {
            (*raw).bit_rate = bitrate as i64;
        }
        if let Some(extradata) = format.extradata.as_deref().filter(|data| !data.is_empty()) {
            let (buffer, size) = alloc_extradata(extradata);
            (*raw).extradata = buffer;
            (*raw).extradata_size = size;
        }
    }
}
