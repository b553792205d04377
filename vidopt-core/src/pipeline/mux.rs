//! Mux coordination: writer track registration and start gating.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::{TranscodeError, TranscodeResult};
use crate::media::{ContainerWriter, MediaFormat, SampleBuffer, TrackKind};

/// Sample counters kept by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MuxStats {
    pub written: BTreeMap<TrackKind, u64>,
    /// Samples that arrived before the writer started.
    pub dropped: BTreeMap<TrackKind, u64>,
    pub bytes_written: u64,
}

impl MuxStats {
    pub fn written(&self, kind: TrackKind) -> u64 {
        self.written.get(&kind).copied().unwrap_or(0)
    }

    pub fn dropped(&self, kind: TrackKind) -> u64 {
        self.dropped.get(&kind).copied().unwrap_or(0)
    }
}

/// Owns the container writer for one transcode.
///
/// The writer starts exactly once, and only after every expected track kind
/// has registered its encoder output format. Samples written before that are
/// dropped with a warning, never buffered.
pub struct MuxCoordinator {
    writer: Box<dyn ContainerWriter>,
    expected: Vec<TrackKind>,
    track_indices: BTreeMap<TrackKind, usize>,
    started: bool,
    stop_attempted: bool,
    close_attempted: bool,
    stats: MuxStats,
}

impl MuxCoordinator {
    pub fn new(
        writer: Box<dyn ContainerWriter>,
        expected: impl IntoIterator<Item = TrackKind>,
    ) -> Self {
        let mut expected: Vec<TrackKind> = expected.into_iter().collect();
        expected.sort();
        expected.dedup();

        Self {
            writer,
            expected,
            track_indices: BTreeMap::new(),
            started: false,
            stop_attempted: false,
            close_attempted: false,
            stats: MuxStats::default(),
        }
    }

    /// Adds a writer track for `kind` and records its index.
    ///
    /// # Errors
    /// - `TranscodeError::Mux` - Kind not expected, already registered, or rejected by the writer
    pub fn register_format(
        &mut self,
        kind: TrackKind,
        format: &MediaFormat,
    ) -> TranscodeResult<usize> {
        if !self.expected.contains(&kind) {
            return Err(TranscodeError::Mux {
                reason: format!("{kind} track is not expected in this output"),
            });
        }
        if self.track_indices.contains_key(&kind) {
            return Err(TranscodeError::Mux {
                reason: format!("{kind} format already registered"),
            });
        }

        let index = self
            .writer
            .add_track(format)
            .map_err(TranscodeError::mux)?;
        self.track_indices.insert(kind, index);
        info!(%kind, index, format = %format, "Registered writer track");
        Ok(index)
    }

    /// Starts the writer once every expected kind is registered.
    ///
    /// Returns `true` only for the call that actually started it.
    ///
    /// # Errors
    /// - `TranscodeError::Mux` - Writer failed to start
    pub fn try_start(&mut self) -> TranscodeResult<bool> {
        if self.started || !self.all_registered() {
            return Ok(false);
        }

        self.writer.start().map_err(TranscodeError::mux)?;
        self.started = true;
        info!(tracks = self.track_indices.len(), "Writer started");
        Ok(true)
    }

    /// Writes `sample` to the track registered for `kind`.
    ///
    /// Returns `false` when the sample was dropped because the writer has not
    /// started yet.
    ///
    /// # Errors
    /// - `TranscodeError::Mux` - Kind not registered or the write failed
    pub fn write_sample(
        &mut self,
        kind: TrackKind,
        sample: &SampleBuffer,
    ) -> TranscodeResult<bool> {
        if !self.started {
            *self.stats.dropped.entry(kind).or_default() += 1;
            warn!(
                %kind,
                pts_us = sample.presentation_time_us,
                "Writer not started, dropping sample"
            );
            return Ok(false);
        }

        let index = self
            .track_indices
            .get(&kind)
            .copied()
            .ok_or_else(|| TranscodeError::Mux {
                reason: format!("{kind} track not registered"),
            })?;

        self.writer
            .write_sample(index, sample)
            .map_err(TranscodeError::mux)?;
        *self.stats.written.entry(kind).or_default() += 1;
        self.stats.bytes_written += sample.size_bytes() as u64;
        Ok(true)
    }

    /// Stops the writer if it was started, then closes it.
    ///
    /// Each underlying call happens at most once over the coordinator's
    /// lifetime, even if this is called again or the first call fails.
    ///
    /// # Errors
    /// - `TranscodeError::Mux` - Stop or close failed (the first failure is returned)
    pub fn finish(&mut self) -> TranscodeResult<()> {
        let mut first_error = None;

        if self.started && !self.stop_attempted {
            self.stop_attempted = true;
            match self.writer.stop() {
                Ok(()) => debug!("Writer stopped"),
                Err(e) => {
                    warn!("Writer stop failed: {e}");
                    first_error = Some(TranscodeError::mux(e));
                }
            }
        }

        if !self.close_attempted {
            self.close_attempted = true;
            if let Err(e) = self.writer.close() {
                warn!("Writer close failed: {e}");
                first_error.get_or_insert(TranscodeError::mux(e));
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_registered(&self, kind: TrackKind) -> bool {
        self.track_indices.contains_key(&kind)
    }

    pub fn track_index(&self, kind: TrackKind) -> Option<usize> {
        self.track_indices.get(&kind).copied()
    }

    pub fn expected_kinds(&self) -> &[TrackKind] {
        &self.expected
    }

    pub fn stats(&self) -> &MuxStats {
        &self.stats
    }

    fn all_registered(&self) -> bool {
        self.expected
            .iter()
            .all(|kind| self.track_indices.contains_key(kind))
    }
}

impl std::fmt::Debug for MuxCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxCoordinator")
            .field("expected", &self.expected)
            .field("track_indices", &self.track_indices)
            .field("started", &self.started)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::media::{BufferFlags, MediaError, MediaResult, mime};

    #[derive(Debug, Default)]
    struct WriterCalls {
        tracks: Vec<MediaFormat>,
        starts: usize,
        writes: Vec<(usize, i64)>,
        stops: usize,
        closes: usize,
    }

    struct RecordingWriter {
        calls: Arc<Mutex<WriterCalls>>,
        fail_stop: bool,
    }

    impl ContainerWriter for RecordingWriter {
        fn add_track(&mut self, format: &MediaFormat) -> MediaResult<usize> {
            let mut calls = self.calls.lock();
            calls.tracks.push(format.clone());
            Ok(calls.tracks.len() - 1)
        }

        fn start(&mut self) -> MediaResult<()> {
            self.calls.lock().starts += 1;
            Ok(())
        }

        fn write_sample(&mut self, track_index: usize, sample: &SampleBuffer) -> MediaResult<()> {
            self.calls
                .lock()
                .writes
                .push((track_index, sample.presentation_time_us));
            Ok(())
        }

        fn stop(&mut self) -> MediaResult<()> {
            self.calls.lock().stops += 1;
            if self.fail_stop {
                return Err(MediaError::writer("trailer rejected"));
            }
            Ok(())
        }

        fn close(&mut self) -> MediaResult<()> {
            self.calls.lock().closes += 1;
            Ok(())
        }
    }

    fn coordinator(
        expected: &[TrackKind],
        fail_stop: bool,
    ) -> (Arc<Mutex<WriterCalls>>, MuxCoordinator) {
        let calls = Arc::new(Mutex::new(WriterCalls::default()));
        let writer = RecordingWriter {
            calls: Arc::clone(&calls),
            fail_stop,
        };
        (calls, MuxCoordinator::new(Box::new(writer), expected.iter().copied()))
    }

    fn sample(pts: i64) -> SampleBuffer {
        SampleBuffer::new(vec![0u8; 16], pts, BufferFlags::NONE)
    }

    #[test]
    fn test_start_waits_for_every_expected_kind() {
        let (calls, mut mux) = coordinator(&[TrackKind::Video, TrackKind::Audio], false);

        mux.register_format(TrackKind::Video, &MediaFormat::video(mime::VIDEO_AVC, 1280, 720))
            .unwrap();
        assert!(!mux.try_start().unwrap());
        assert!(!mux.is_started());

        mux.register_format(TrackKind::Audio, &MediaFormat::audio(mime::AUDIO_AAC, 44_100, 2))
            .unwrap();
        assert!(mux.try_start().unwrap());
        assert!(!mux.try_start().unwrap());
        assert_eq!(calls.lock().starts, 1);
    }

    #[test]
    fn test_samples_before_start_are_dropped() {
        let (calls, mut mux) = coordinator(&[TrackKind::Video, TrackKind::Audio], false);
        mux.register_format(TrackKind::Video, &MediaFormat::video(mime::VIDEO_AVC, 1280, 720))
            .unwrap();

        assert!(!mux.write_sample(TrackKind::Video, &sample(0)).unwrap());
        assert_eq!(mux.stats().dropped(TrackKind::Video), 1);
        assert!(calls.lock().writes.is_empty());

        mux.register_format(TrackKind::Audio, &MediaFormat::audio(mime::AUDIO_AAC, 44_100, 2))
            .unwrap();
        mux.try_start().unwrap();
        assert!(mux.write_sample(TrackKind::Audio, &sample(23_219)).unwrap());
        assert_eq!(calls.lock().writes, vec![(1, 23_219)]);
        assert_eq!(mux.stats().written(TrackKind::Audio), 1);
        assert_eq!(mux.stats().bytes_written, 16);
    }

    #[test]
    fn test_duplicate_and_unexpected_registration_rejected() {
        let (_, mut mux) = coordinator(&[TrackKind::Video], false);
        let format = MediaFormat::video(mime::VIDEO_AVC, 640, 360);

        mux.register_format(TrackKind::Video, &format).unwrap();
        assert!(matches!(
            mux.register_format(TrackKind::Video, &format),
            Err(TranscodeError::Mux { .. })
        ));
        assert!(matches!(
            mux.register_format(TrackKind::Audio, &MediaFormat::audio(mime::AUDIO_AAC, 48_000, 2)),
            Err(TranscodeError::Mux { .. })
        ));
    }

    #[test]
    fn test_finish_skips_stop_when_never_started() {
        let (calls, mut mux) = coordinator(&[TrackKind::Video], false);

        mux.finish().unwrap();
        mux.finish().unwrap();

        let calls = calls.lock();
        assert_eq!(calls.stops, 0);
        assert_eq!(calls.closes, 1);
    }

    #[test]
    fn test_finish_closes_even_when_stop_fails() {
        let (calls, mut mux) = coordinator(&[TrackKind::Video], true);
        mux.register_format(TrackKind::Video, &MediaFormat::video(mime::VIDEO_AVC, 640, 360))
            .unwrap();
        mux.try_start().unwrap();

        assert!(matches!(mux.finish(), Err(TranscodeError::Mux { .. })));
        assert!(mux.finish().is_ok());

        let calls = calls.lock();
        assert_eq!(calls.stops, 1);
        assert_eq!(calls.closes, 1);
    }
}
