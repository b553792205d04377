//! Classifies source tracks into the pipeline's video and audio inputs.

use tracing::{debug, info};

use super::{SetupError, TranscodeResult};
use crate::media::{MediaFormat, MediaSource, TrackKind};

/// A source track chosen as pipeline input.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDescriptor {
    pub index: usize,
    pub kind: TrackKind,
    pub source_format: MediaFormat,
}

/// Result of track discovery: exactly one video track, at most one audio track.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredTracks {
    pub video: TrackDescriptor,
    pub audio: Option<TrackDescriptor>,
    /// Tracks that were not selected (extra video/audio, subtitles, data).
    pub ignored: Vec<usize>,
}

impl DiscoveredTracks {
    /// Track kinds the writer must register before it may start.
    pub fn expected_kinds(&self) -> Vec<TrackKind> {
        match self.audio {
            Some(_) => vec![TrackKind::Video, TrackKind::Audio],
            None => vec![TrackKind::Video],
        }
    }
}

/// Scans the source's tracks in order.
///
/// The first `video/*` track becomes the video input and the first `audio/*`
/// track the audio input; later tracks of either kind are ignored.
///
/// # Errors
/// - `SetupError::TrackRead` - A track header could not be read
/// - `SetupError::NoVideoTrack` - No `video/*` track in the source
pub fn discover_tracks(source: &dyn MediaSource) -> TranscodeResult<DiscoveredTracks> {
    let mut video = None;
    let mut audio = None;
    let mut ignored = Vec::new();

    for index in 0..source.track_count() {
        let format = source
            .track_format(index)
            .map_err(|e| SetupError::TrackRead {
                index,
                reason: e.to_string(),
            })?;

        let (kind, slot) = match format.track_kind() {
            Some(kind @ TrackKind::Video) => (kind, &mut video),
            Some(kind @ TrackKind::Audio) => (kind, &mut audio),
            None => {
                debug!(index, mime_type = %format.mime_type, "Ignoring non-media track");
                ignored.push(index);
                continue;
            }
        };

        if slot.is_some() {
            debug!(index, mime_type = %format.mime_type, "Ignoring additional {kind} track");
            ignored.push(index);
            continue;
        }

        info!(index, %kind, format = %format, "Selected input track");
        *slot = Some(TrackDescriptor {
            index,
            kind,
            source_format: format,
        });
    }

    let video = video.ok_or(SetupError::NoVideoTrack)?;
    Ok(DiscoveredTracks {
        video,
        audio,
        ignored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaError, MediaResult, SourceSample, mime};

    struct HeaderOnlySource {
        formats: Vec<MediaFormat>,
    }

    impl MediaSource for HeaderOnlySource {
        fn track_count(&self) -> usize {
            self.formats.len()
        }

        fn track_format(&self, index: usize) -> MediaResult<MediaFormat> {
            self.formats
                .get(index)
                .cloned()
                .ok_or_else(|| MediaError::source(format!("no track {index}")))
        }

        fn select_track(&mut self, _index: usize) -> MediaResult<()> {
            Ok(())
        }

        fn unselect_track(&mut self, _index: usize) -> MediaResult<()> {
            Ok(())
        }

        fn seek_to(&mut self, _time_us: i64) -> MediaResult<()> {
            Ok(())
        }

        fn read_sample(&mut self) -> MediaResult<Option<SourceSample>> {
            Ok(None)
        }

        fn close(&mut self) -> MediaResult<()> {
            Ok(())
        }
    }

    fn source(mimes: &[&str]) -> HeaderOnlySource {
        HeaderOnlySource {
            formats: mimes
                .iter()
                .map(|mime_type| MediaFormat {
                    mime_type: mime_type.to_string(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn test_first_track_of_each_kind_selected() {
        let source = source(&[
            "text/vtt",
            mime::AUDIO_AAC,
            mime::VIDEO_AVC,
            "audio/opus",
            mime::VIDEO_HEVC,
        ]);
        let tracks = discover_tracks(&source).unwrap();

        assert_eq!(tracks.video.index, 2);
        assert_eq!(tracks.video.kind, TrackKind::Video);
        assert_eq!(tracks.audio.as_ref().map(|audio| audio.index), Some(1));
        assert_eq!(tracks.ignored, vec![0, 3, 4]);
        assert_eq!(tracks.expected_kinds(), vec![TrackKind::Video, TrackKind::Audio]);
    }

    #[test]
    fn test_audio_less_input_is_valid() {
        let tracks = discover_tracks(&source(&[mime::VIDEO_AVC])).unwrap();
        assert!(tracks.audio.is_none());
        assert_eq!(tracks.expected_kinds(), vec![TrackKind::Video]);
    }

    #[test]
    fn test_missing_video_track_is_setup_error() {
        let result = discover_tracks(&source(&[mime::AUDIO_AAC]));
        assert!(matches!(
            result,
            Err(crate::pipeline::TranscodeError::Setup(SetupError::NoVideoTrack))
        ));
    }
}
