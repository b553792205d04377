//! libav platform backend built on `ffmpeg-next`.
//!
//! libav codecs are synchronous, so the codec ports emulate the buffer-queue
//! model: a bounded number of input slots, and an output queue filled as soon
//! as a submitted sample has been processed. Raw data crossing from decoder
//! to encoder uses fixed layouts: planar YUV 4:2:0 for video and interleaved
//! 32-bit float for audio.

mod decoder;
mod encoder;
mod port;
mod raw;
mod source;
mod writer;

use std::path::Path;

use ffmpeg_next::codec::Id;
use ffmpeg_next::media::Type;
use tracing::debug;

pub use decoder::FfmpegDecoder;
pub use encoder::FfmpegEncoder;
pub use source::FfmpegSource;
pub use writer::Mp4Writer;

use crate::capabilities::{
    AudioCapabilities, CapabilityProvider, EncoderInfo, SizeSupport, ValueRange, VideoCapabilities,
};
use crate::media::{
    CodecPort, ContainerWriter, MediaBackend, MediaError, MediaFormat, MediaResult, MediaSource,
    TrackKind, mime,
};

/// Microsecond time base shared by every timestamp crossing the seams.
pub(crate) const MICROS: ffmpeg_next::Rational = ffmpeg_next::Rational(1, 1_000_000);

/// Hardware encoder implementations probed by name, per mime type.
const HARDWARE_ENCODERS: &[(&str, &[&str])] = &[
    (
        mime::VIDEO_AVC,
        &["h264_nvenc", "h264_qsv", "h264_vaapi", "h264_videotoolbox", "h264_amf"],
    ),
    (
        mime::VIDEO_HEVC,
        &["hevc_nvenc", "hevc_qsv", "hevc_vaapi", "hevc_videotoolbox", "hevc_amf"],
    ),
    (mime::VIDEO_VP9, &["vp9_qsv", "vp9_vaapi"]),
    (mime::VIDEO_AV1, &["av1_nvenc", "av1_qsv", "av1_vaapi", "av1_amf"]),
];

const CATALOGUE: &[&str] = &[
    mime::VIDEO_AVC,
    mime::VIDEO_HEVC,
    mime::VIDEO_VP9,
    mime::VIDEO_AV1,
    mime::AUDIO_AAC,
];

/// Backend reading and writing real files through libav.
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    /// Prefer hardware encoders when libav was built with them.
    pub prefer_hardware: bool,
}

impl FfmpegBackend {
    /// Initializes libav once and returns the backend.
    ///
    /// # Errors
    /// - `MediaError::Codec` - libav failed to initialize
    pub fn new() -> MediaResult<Self> {
        init()?;
        Ok(Self::default())
    }

    pub fn with_hardware_preference(mut self, prefer_hardware: bool) -> Self {
        self.prefer_hardware = prefer_hardware;
        self
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn open_source(&self, input: &Path) -> MediaResult<Box<dyn MediaSource>> {
        Ok(Box::new(FfmpegSource::open(input)?))
    }

    fn create_decoder(
        &self,
        source_format: &MediaFormat,
        output: &MediaFormat,
    ) -> MediaResult<Box<dyn CodecPort>> {
        Ok(Box::new(FfmpegDecoder::new(source_format, output)?))
    }

    fn create_encoder(&self, target: &MediaFormat) -> MediaResult<Box<dyn CodecPort>> {
        let hardware = if self.prefer_hardware {
            hardware_encoder_names(&target.mime_type)
                .iter()
                .copied()
                .find(|name| ffmpeg_next::encoder::find_by_name(name).is_some())
        } else {
            None
        };
        Ok(Box::new(FfmpegEncoder::new(target, hardware)?))
    }

    fn create_writer(&self, output: &Path) -> MediaResult<Box<dyn ContainerWriter>> {
        Ok(Box::new(Mp4Writer::create(output)?))
    }
}

impl CapabilityProvider for FfmpegBackend {
    fn encoders(&self) -> MediaResult<Vec<EncoderInfo>> {
        init()?;
        let mut encoders = Vec::new();

        for mime_type in CATALOGUE {
            let Some(id) = codec_id_for_mime(mime_type) else {
                continue;
            };
            if let Some(codec) = ffmpeg_next::encoder::find(id) {
                encoders.push(encoder_info(codec.name(), mime_type, false));
            }
            for name in hardware_encoder_names(mime_type) {
                if ffmpeg_next::encoder::find_by_name(name).is_some() {
                    encoders.push(encoder_info(name, mime_type, true));
                }
            }
        }

        debug!(count = encoders.len(), "Enumerated libav encoders");
        Ok(encoders)
    }
}

fn encoder_info(name: &str, mime_type: &str, hardware_accelerated: bool) -> EncoderInfo {
    let kind = TrackKind::from_mime(mime_type);
    EncoderInfo {
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        hardware_accelerated,
        // libav does not publish limits; these are what its encoders accept in practice.
        video: (kind == Some(TrackKind::Video)).then_some(VideoCapabilities {
            sizes: SizeSupport {
                widths: ValueRange::new(16, 8192),
                heights: ValueRange::new(16, 8192),
                width_alignment: 2,
                height_alignment: 2,
            },
            bitrate_range: ValueRange::new(64_000, 100_000_000),
            frame_rate_range: ValueRange::new(1, 120),
        }),
        audio: (kind == Some(TrackKind::Audio)).then_some(AudioCapabilities {
            bitrate_range: ValueRange::new(32_000, 512_000),
            max_channels: 8,
        }),
    }
}

fn hardware_encoder_names(mime_type: &str) -> &'static [&'static str] {
    HARDWARE_ENCODERS
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(mime_type))
        .map(|(_, names)| *names)
        .unwrap_or(&[])
}

pub(crate) fn init() -> MediaResult<()> {
    ffmpeg_next::init().map_err(|e| MediaError::codec("libav", e.to_string()))
}

pub(crate) fn codec_id_for_mime(mime_type: &str) -> Option<Id> {
    match mime_type.to_ascii_lowercase().as_str() {
        mime::VIDEO_AVC => Some(Id::H264),
        mime::VIDEO_HEVC => Some(Id::HEVC),
        mime::VIDEO_VP9 | "video/vp9" => Some(Id::VP9),
        mime::VIDEO_AV1 => Some(Id::AV1),
        "video/mp4v-es" => Some(Id::MPEG4),
        mime::AUDIO_AAC => Some(Id::AAC),
        "audio/mpeg" => Some(Id::MP3),
        "audio/opus" => Some(Id::OPUS),
        _ => None,
    }
}

/// Mime type for a libav codec, falling back to a generic per-medium type.
pub(crate) fn mime_for_codec(id: Id, medium: Type) -> String {
    let known = match id {
        Id::H264 => Some(mime::VIDEO_AVC),
        Id::HEVC => Some(mime::VIDEO_HEVC),
        Id::VP9 => Some(mime::VIDEO_VP9),
        Id::AV1 => Some(mime::VIDEO_AV1),
        Id::MPEG4 => Some("video/mp4v-es"),
        Id::AAC => Some(mime::AUDIO_AAC),
        Id::MP3 => Some("audio/mpeg"),
        Id::OPUS => Some("audio/opus"),
        _ => None,
    };
    if let Some(known) = known {
        return known.to_string();
    }

    match medium {
        Type::Video => format!("video/x-{}", id.name()),
        Type::Audio => format!("audio/x-{}", id.name()),
        Type::Subtitle => "text/x-subtitle".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

pub(crate) fn codec_error(codec: &str, error: ffmpeg_next::Error) -> MediaError {
    MediaError::codec(codec, error.to_string())
}

/// libav wants output pulled before it takes more input.
pub(crate) fn is_again(error: &ffmpeg_next::Error) -> bool {
    matches!(
        error,
        ffmpeg_next::Error::Other { errno } if *errno == ffmpeg_next::util::error::EAGAIN
    )
}

/// Nothing more to pull right now, or ever.
pub(crate) fn is_drained(error: &ffmpeg_next::Error) -> bool {
    is_again(error) || matches!(error, ffmpeg_next::Error::Eof)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_mapping_round_trips_known_codecs() {
        for mime_type in CATALOGUE {
            let id = codec_id_for_mime(mime_type).unwrap();
            let medium = if mime_type.starts_with("video/") {
                Type::Video
            } else {
                Type::Audio
            };
            assert_eq!(mime_for_codec(id, medium), *mime_type);
        }
        assert_eq!(mime_for_codec(Id::None, Type::Data), "application/octet-stream");
    }

    #[test]
    fn test_hardware_names_only_for_video() {
        assert!(!hardware_encoder_names(mime::VIDEO_AVC).is_empty());
        assert!(hardware_encoder_names(mime::AUDIO_AAC).is_empty());
    }
}
