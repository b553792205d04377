//! Demuxing source over a libav input context.

use std::collections::BTreeSet;
use std::path::Path;

use ffmpeg_next::format::context::Input;
use ffmpeg_next::media::Type;
use ffmpeg_next::{Rational, Rescale, codec};
use tracing::debug;

use super::{MICROS, init, is_again, mime_for_codec};
use crate::media::{
    BufferFlags, MediaError, MediaFormat, MediaResult, MediaSource, SampleBuffer, SourceSample,
};

struct TrackInfo {
    format: MediaFormat,
    frames: Option<u64>,
}

/// Input container opened through libav.
pub struct FfmpegSource {
    input: Option<Input>,
    tracks: Vec<TrackInfo>,
    selected: BTreeSet<usize>,
}

impl FfmpegSource {
    /// Opens `path` and reads every stream header.
    ///
    /// # Errors
    /// - `MediaError::Source` - File missing or not a container libav can read
    pub fn open(path: &Path) -> MediaResult<Self> {
        init()?;
        let input = ffmpeg_next::format::input(&path)
            .map_err(|e| MediaError::source(format!("{}: {e}", path.display())))?;

        let container_duration_us = (input.duration() > 0).then(|| input.duration());
        let tracks = input
            .streams()
            .map(|stream| {
                let format = stream_format(&stream, container_duration_us);
                let frames = u64::try_from(stream.frames()).ok().filter(|frames| *frames > 0);
                TrackInfo { format, frames }
            })
            .collect::<Vec<_>>();

        debug!(path = %path.display(), tracks = tracks.len(), "Opened libav source");
        Ok(Self {
            input: Some(input),
            tracks,
            selected: BTreeSet::new(),
        })
    }

    fn input(&mut self) -> MediaResult<&mut Input> {
        self.input
            .as_mut()
            .ok_or_else(|| MediaError::source("source already closed"))
    }

    fn check_index(&self, index: usize) -> MediaResult<()> {
        if index >= self.tracks.len() {
            return Err(MediaError::source(format!(
                "track {index} out of range ({} tracks)",
                self.tracks.len()
            )));
        }
        Ok(())
    }
}

impl MediaSource for FfmpegSource {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> MediaResult<MediaFormat> {
        self.check_index(index)?;
        Ok(self.tracks[index].format.clone())
    }

    fn select_track(&mut self, index: usize) -> MediaResult<()> {
        self.check_index(index)?;
        self.selected.insert(index);
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) -> MediaResult<()> {
        self.check_index(index)?;
        self.selected.remove(&index);
        Ok(())
    }

    fn seek_to(&mut self, time_us: i64) -> MediaResult<()> {
        self.input()?
            .seek(time_us, ..=time_us)
            .map_err(|e| MediaError::source(format!("seek to {time_us}us failed: {e}")))
    }

    fn read_sample(&mut self) -> MediaResult<Option<SourceSample>> {
        let selected = self.selected.clone();
        let input = self.input()?;
        let mut packet = ffmpeg_next::Packet::empty();

        loop {
            match read_outcome(packet.read(input))? {
                ReadOutcome::End => return Ok(None),
                ReadOutcome::Again => continue,
                ReadOutcome::Packet => {}
            }

            let track_index = packet.stream();
            if !selected.contains(&track_index) {
                continue;
            }
            let Some(stream) = input.stream(track_index) else {
                return Err(MediaError::source(format!("packet for unknown stream {track_index}")));
            };

            let presentation_time_us = packet
                .pts()
                .or(packet.dts())
                .map(|ts| ts.rescale(stream.time_base(), MICROS))
                .unwrap_or(0);
            let flags = if packet.is_key() {
                BufferFlags::KEY_FRAME
            } else {
                BufferFlags::NONE
            };
            let data = packet.data().map(<[u8]>::to_vec).unwrap_or_default();

            return Ok(Some(SourceSample {
                track_index,
                buffer: SampleBuffer::new(data, presentation_time_us, flags),
            }));
        }
    }

    fn sample_count_hint(&self, index: usize) -> Option<u64> {
        self.tracks.get(index).and_then(|track| track.frames)
    }

    fn close(&mut self) -> MediaResult<()> {
        if self.input.take().is_some() {
            debug!("Closed libav source");
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ReadOutcome {
    Packet,
    Again,
    End,
}

/// Classifies one `av_read_frame` result. Only end-of-file ends the stream.
fn read_outcome(result: Result<(), ffmpeg_next::Error>) -> MediaResult<ReadOutcome> {
    match result {
        Ok(()) => Ok(ReadOutcome::Packet),
        Err(ffmpeg_next::Error::Eof) => Ok(ReadOutcome::End),
        Err(e) if is_again(&e) => Ok(ReadOutcome::Again),
        Err(e) => Err(MediaError::source(format!("demux read failed: {e}"))),
    }
}

fn stream_format(
    stream: &ffmpeg_next::Stream<'_>,
    container_duration_us: Option<i64>,
) -> MediaFormat {
    let parameters = stream.parameters();
    let medium = parameters.medium();
    let mut format = MediaFormat {
        mime_type: mime_for_codec(parameters.id(), medium),
        ..Default::default()
    };

    let decoder = codec::context::Context::from_parameters(parameters.clone())
        .ok()
        .map(|context| context.decoder());
    match (medium, decoder) {
        (Type::Video, Some(decoder)) => {
            if let Ok(video) = decoder.video() {
                format.width = Some(video.width());
                format.height = Some(video.height());
                format.bitrate_bps = u64::try_from(video.bit_rate()).ok().filter(|bps| *bps > 0);
            }
            format.frame_rate = frames_per_second(stream.avg_frame_rate());
        }
        (Type::Audio, Some(decoder)) => {
            if let Ok(audio) = decoder.audio() {
                format.sample_rate = Some(audio.rate());
                format.channel_count = Some(audio.channels());
                format.bitrate_bps = u64::try_from(audio.bit_rate()).ok().filter(|bps| *bps > 0);
            }
        }
        _ => {}
    }

    format.duration_us = (stream.duration() > 0)
        .then(|| stream.duration().rescale(stream.time_base(), MICROS))
        .or(container_duration_us);
    format.extradata = extradata(&parameters);
    format
}

fn frames_per_second(rate: Rational) -> Option<u32> {
    if rate.numerator() <= 0 || rate.denominator() <= 0 {
        return None;
    }
    let fps = f64::from(rate.numerator()) / f64::from(rate.denominator());
    Some(fps.round() as u32).filter(|fps| *fps > 0)
}

fn extradata(parameters: &codec::Parameters) -> Option<Vec<u8>> {
    // SAFETY: the parameters outlive this call and libav keeps extradata_size
    // in sync with the extradata allocation.
    unsafe {
        let raw = parameters.as_ptr();
        if (*raw).extradata.is_null() || (*raw).extradata_size <= 0 {
            return None;
        }
        Some(std::slice::from_raw_parts((*raw).extradata, (*raw).extradata_size as usize).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_end_of_file_ends_reading() {
        assert_eq!(read_outcome(Ok(())).unwrap(), ReadOutcome::Packet);
        assert_eq!(read_outcome(Err(ffmpeg_next::Error::Eof)).unwrap(), ReadOutcome::End);
        let again = ffmpeg_next::Error::Other {
            errno: ffmpeg_next::util::error::EAGAIN,
        };
        assert_eq!(read_outcome(Err(again)).unwrap(), ReadOutcome::Again);
    }

    #[test]
    fn test_read_errors_surface_as_source_failures() {
        let result = read_outcome(Err(ffmpeg_next::Error::InvalidData));
        assert!(matches!(result, Err(MediaError::Source { .. })));
    }
}
