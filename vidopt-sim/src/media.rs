//! Descriptions of simulated input files and the samples they contain.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use vidopt_core::media::{BufferFlags, MediaFormat, SampleBuffer, TrackKind, mime};

use crate::error::{SimulationError, SimulationResult};

/// Samples per AAC access unit.
pub const AUDIO_FRAME_SAMPLES: u64 = 1024;

/// Compressed payloads are capped to keep simulations light.
const MAX_PAYLOAD_BYTES: u64 = 16 * 1024;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Compressed video track of a simulated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedVideo {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bitrate_bps: u64,
}

impl SimulatedVideo {
    pub fn avc(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            mime_type: mime::VIDEO_AVC.to_string(),
            width,
            height,
            frame_rate,
            bitrate_bps: 8_000_000,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_bitrate(mut self, bitrate_bps: u64) -> Self {
        self.bitrate_bps = bitrate_bps;
        self
    }
}

/// Compressed audio track of a simulated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedAudio {
    pub mime_type: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_bps: u64,
}

impl SimulatedAudio {
    pub fn aac(sample_rate: u32, channels: u16) -> Self {
        Self {
            mime_type: mime::AUDIO_AAC.to_string(),
            sample_rate,
            channels,
            bitrate_bps: 128_000,
        }
    }
}

/// Track of the simulated file, in container order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedTrack {
    Video(SimulatedVideo),
    Audio(SimulatedAudio),
    /// Track the pipeline must skip, such as subtitles.
    Other { mime_type: String },
}

/// A simulated input file.
///
/// Produces the same samples for the same seed on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedMedia {
    pub tracks: Vec<SimulatedTrack>,
    pub duration_us: i64,
    /// Whether the source reports per-track sample counts.
    pub reports_sample_counts: bool,
    pub seed: u64,
}

impl SimulatedMedia {
    /// Empty file lasting `duration_us`.
    pub fn new(duration_us: i64) -> Self {
        Self {
            tracks: Vec::new(),
            duration_us,
            reports_sample_counts: true,
            seed: 0,
        }
    }

    /// 1080p30 AVC with stereo 44.1 kHz AAC.
    pub fn hd_clip(duration_us: i64) -> Self {
        Self::new(duration_us)
            .with_video(SimulatedVideo::avc(1920, 1080, 30))
            .with_audio(SimulatedAudio::aac(44_100, 2))
    }

    pub fn with_video(mut self, video: SimulatedVideo) -> Self {
        self.tracks.push(SimulatedTrack::Video(video));
        self
    }

    pub fn with_audio(mut self, audio: SimulatedAudio) -> Self {
        self.tracks.push(SimulatedTrack::Audio(audio));
        self
    }

    pub fn with_other_track(mut self, mime_type: impl Into<String>) -> Self {
        self.tracks.push(SimulatedTrack::Other {
            mime_type: mime_type.into(),
        });
        self
    }

    pub fn without_sample_counts(mut self) -> Self {
        self.reports_sample_counts = false;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Checks that every track can produce samples.
    ///
    /// # Errors
    /// - `SimulationError::InvalidMedia` - Non-positive duration, zero frame rate,
    ///   zero dimensions or zero sample rate
    pub fn validate(&self) -> SimulationResult<()> {
        let invalid = |reason: String| Err(SimulationError::InvalidMedia { reason });
        if self.duration_us <= 0 {
            return invalid(format!("duration must be positive, got {}us", self.duration_us));
        }
        for (index, track) in self.tracks.iter().enumerate() {
            match track {
                SimulatedTrack::Video(video) => {
                    if video.frame_rate == 0 || video.width == 0 || video.height == 0 {
                        return invalid(format!(
                            "track {index}: video needs a frame rate and dimensions"
                        ));
                    }
                }
                SimulatedTrack::Audio(audio) => {
                    if audio.sample_rate == 0 || audio.channels == 0 {
                        return invalid(format!(
                            "track {index}: audio needs a sample rate and channels"
                        ));
                    }
                }
                SimulatedTrack::Other { .. } => {}
            }
        }
        Ok(())
    }

    /// Index of the first track of `kind`.
    pub fn track_index(&self, kind: TrackKind) -> Option<usize> {
        self.tracks.iter().position(|track| track_kind(track) == Some(kind))
    }

    /// Formats as the platform would report them.
    pub fn track_formats(&self) -> Vec<MediaFormat> {
        self.tracks
            .iter()
            .map(|track| match track {
                SimulatedTrack::Video(video) => {
                    MediaFormat::video(video.mime_type.clone(), video.width, video.height)
                        .with_frame_rate(video.frame_rate)
                        .with_bitrate(video.bitrate_bps)
                        .with_duration_us(self.duration_us)
                        .with_extradata(vec![0x01, 0x64, 0x00, 0x28])
                }
                SimulatedTrack::Audio(audio) => {
                    MediaFormat::audio(audio.mime_type.clone(), audio.sample_rate, audio.channels)
                        .with_bitrate(audio.bitrate_bps)
                        .with_duration_us(self.duration_us)
                        .with_extradata(vec![0x12, 0x10])
                }
                SimulatedTrack::Other { mime_type } => MediaFormat {
                    mime_type: mime_type.clone(),
                    duration_us: Some(self.duration_us),
                    ..Default::default()
                },
            })
            .collect()
    }

    /// Number of samples in track `index`.
    pub fn sample_count(&self, index: usize) -> u64 {
        let duration = self.duration_us.max(0) as u64;
        match self.tracks.get(index) {
            Some(SimulatedTrack::Video(video)) => {
                (duration * u64::from(video.frame_rate)).div_ceil(MICROS_PER_SECOND)
            }
            Some(SimulatedTrack::Audio(audio)) => (duration * u64::from(audio.sample_rate))
                .div_ceil(MICROS_PER_SECOND * AUDIO_FRAME_SAMPLES),
            Some(SimulatedTrack::Other { .. }) => (duration / MICROS_PER_SECOND).max(1),
            None => 0,
        }
    }

    /// Every sample of track `index` in presentation order.
    pub fn samples(&self, index: usize) -> Vec<SampleBuffer> {
        let Some(track) = self.tracks.get(index) else {
            return Vec::new();
        };
        let stream_seed = self.seed ^ (index as u64).wrapping_mul(0x9E37_79B9);
        let mut rng = ChaCha8Rng::seed_from_u64(stream_seed);
        let count = self.sample_count(index);

        (0..count)
            .map(|i| {
                let (pts, size, flags) = match track {
                    SimulatedTrack::Video(video) => {
                        let fps = u64::from(video.frame_rate);
                        let key = i % fps == 0;
                        let size = payload_size(video.bitrate_bps, fps, key);
                        (i * MICROS_PER_SECOND / fps, size, key)
                    }
                    SimulatedTrack::Audio(audio) => {
                        let rate = u64::from(audio.sample_rate);
                        let frames_per_second = rate.div_ceil(AUDIO_FRAME_SAMPLES);
                        let size = payload_size(audio.bitrate_bps, frames_per_second, false);
                        (i * AUDIO_FRAME_SAMPLES * MICROS_PER_SECOND / rate, size, true)
                    }
                    SimulatedTrack::Other { .. } => (i * MICROS_PER_SECOND, 16, true),
                };
                let mut data = vec![0u8; size];
                rng.fill(&mut data[..]);
                let flags = if flags {
                    BufferFlags::KEY_FRAME
                } else {
                    BufferFlags::NONE
                };
                SampleBuffer::new(data, pts as i64, flags)
            })
            .collect()
    }
}

pub(crate) fn track_kind(track: &SimulatedTrack) -> Option<TrackKind> {
    match track {
        SimulatedTrack::Video(_) => Some(TrackKind::Video),
        SimulatedTrack::Audio(_) => Some(TrackKind::Audio),
        SimulatedTrack::Other { .. } => None,
    }
}

fn payload_size(bitrate_bps: u64, units_per_second: u64, key: bool) -> usize {
    let average = bitrate_bps / 8 / units_per_second.max(1);
    let size = if key { average * 3 } else { average };
    size.clamp(1, MAX_PAYLOAD_BYTES) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_counts_follow_duration() {
        let media = SimulatedMedia::hd_clip(2_000_000);
        assert_eq!(media.sample_count(0), 60);
        // 2s at 44.1 kHz in 1024-sample frames.
        assert_eq!(media.sample_count(1), 87);
        assert_eq!(media.sample_count(5), 0);
    }

    #[test]
    fn test_samples_are_deterministic_per_seed() {
        let media = SimulatedMedia::hd_clip(500_000).with_seed(7);
        assert_eq!(media.samples(0), media.samples(0));

        let other = media.clone().with_seed(8);
        assert_ne!(media.samples(0)[1].data, other.samples(0)[1].data);
    }

    #[test]
    fn test_video_timestamps_and_key_frames() {
        let media = SimulatedMedia::new(1_000_000).with_video(SimulatedVideo::avc(640, 480, 25));
        let samples = media.samples(0);

        assert_eq!(samples.len(), 25);
        assert!(samples[0].flags.key_frame);
        assert!(!samples[1].flags.key_frame);
        assert_eq!(samples[1].presentation_time_us, 40_000);
        assert!(
            samples
                .windows(2)
                .all(|pair| pair[0].presentation_time_us < pair[1].presentation_time_us)
        );
    }

    #[test]
    fn test_validate_rejects_zero_frame_rate() {
        let media = SimulatedMedia::new(1_000_000).with_video(SimulatedVideo::avc(640, 480, 0));
        assert!(matches!(media.validate(), Err(SimulationError::InvalidMedia { .. })));
        assert!(SimulatedMedia::hd_clip(1_000_000).validate().is_ok());
        assert!(SimulatedMedia::new(0).validate().is_err());
    }

    #[test]
    fn test_track_index_skips_other_tracks() {
        let media = SimulatedMedia::new(1_000_000)
            .with_other_track("text/vtt")
            .with_audio(SimulatedAudio::aac(48_000, 2))
            .with_video(SimulatedVideo::avc(1280, 720, 30));

        assert_eq!(media.track_index(TrackKind::Audio), Some(1));
        assert_eq!(media.track_index(TrackKind::Video), Some(2));
        assert_eq!(media.track_formats()[0].mime_type, "text/vtt");
    }
}
