//! Track formats as exchanged between the platform layer and the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known mime types understood by the strategy selector and backends.
pub mod mime {
    /// H.264 / AVC elementary stream.
    pub const VIDEO_AVC: &str = "video/avc";
    /// H.265 / HEVC elementary stream.
    pub const VIDEO_HEVC: &str = "video/hevc";
    /// VP9 elementary stream.
    pub const VIDEO_VP9: &str = "video/x-vnd.on2.vp9";
    /// AV1 elementary stream.
    pub const VIDEO_AV1: &str = "video/av01";
    /// AAC audio.
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    /// Uncompressed video frames handed from decoder to encoder.
    pub const VIDEO_RAW: &str = "video/raw";
    /// Uncompressed PCM audio handed from decoder to encoder.
    pub const AUDIO_RAW: &str = "audio/raw";
    /// MPEG-4 container produced by the writer.
    pub const CONTAINER_MP4: &str = "video/mp4";
}

/// Kind of an elementary stream inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    /// Classifies a mime type by its top-level type.
    ///
    /// Returns `None` for anything that is neither `video/*` nor `audio/*`
    /// (subtitles, metadata tracks, ...).
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        if mime_type.starts_with("video/") {
            Some(TrackKind::Video)
        } else if mime_type.starts_with("audio/") {
            Some(TrackKind::Audio)
        } else {
            None
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Format parameters of one track, or of what a codec should produce.
///
/// Every field except the mime type is optional because sources and codecs
/// report different subsets depending on the stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    pub bitrate_bps: Option<u64>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
    pub duration_us: Option<i64>,
    /// Codec specific configuration (SPS/PPS, AudioSpecificConfig, ...).
    #[serde(skip)]
    pub extradata: Option<Vec<u8>>,
}

impl MediaFormat {
    /// Creates a video format with the given dimensions.
    pub fn video(mime_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime_type: mime_type.into(),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    /// Creates an audio format with the given sample layout.
    pub fn audio(mime_type: impl Into<String>, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            mime_type: mime_type.into(),
            sample_rate: Some(sample_rate),
            channel_count: Some(channel_count),
            ..Default::default()
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn with_bitrate(mut self, bitrate_bps: u64) -> Self {
        self.bitrate_bps = Some(bitrate_bps);
        self
    }

    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    pub fn with_extradata(mut self, extradata: Vec<u8>) -> Self {
        self.extradata = Some(extradata);
        self
    }

    /// Track kind derived from the mime prefix.
    pub fn track_kind(&self) -> Option<TrackKind> {
        TrackKind::from_mime(&self.mime_type)
    }

    /// Both dimensions, when the format carries them.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some((width, height)),
            _ => None,
        }
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime_type)?;
        if let Some((width, height)) = self.dimensions() {
            write!(f, " {width}x{height}")?;
        }
        if let Some(frame_rate) = self.frame_rate {
            write!(f, " @{frame_rate}fps")?;
        }
        if let Some(sample_rate) = self.sample_rate {
            write!(f, " {sample_rate}Hz")?;
        }
        if let Some(channels) = self.channel_count {
            write!(f, " {channels}ch")?;
        }
        if let Some(bitrate) = self.bitrate_bps {
            write!(f, " {bitrate}bps")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_kind_from_mime_prefix() {
        assert_eq!(TrackKind::from_mime("video/avc"), Some(TrackKind::Video));
        assert_eq!(TrackKind::from_mime("audio/mp4a-latm"), Some(TrackKind::Audio));
        assert_eq!(TrackKind::from_mime("text/vtt"), None);
        assert_eq!(TrackKind::from_mime("videox/avc"), None);
    }

    #[test]
    fn test_dimensions_require_both_sides() {
        let format = MediaFormat::video(mime::VIDEO_AVC, 1920, 1080);
        assert_eq!(format.dimensions(), Some((1920, 1080)));

        let partial = MediaFormat {
            width: Some(1920),
            ..MediaFormat::default()
        };
        assert_eq!(partial.dimensions(), None);

        let zero = MediaFormat::video(mime::VIDEO_AVC, 0, 1080);
        assert_eq!(zero.dimensions(), None);
    }

    #[test]
    fn test_display_lists_known_fields() {
        let format = MediaFormat::video(mime::VIDEO_AVC, 1280, 720)
            .with_frame_rate(30)
            .with_bitrate(2_500_000);
        assert_eq!(format.to_string(), "video/avc 1280x720 @30fps 2500000bps");

        let audio = MediaFormat::audio(mime::AUDIO_AAC, 44_100, 2);
        assert_eq!(audio.to_string(), "audio/mp4a-latm 44100Hz 2ch");
    }
}
