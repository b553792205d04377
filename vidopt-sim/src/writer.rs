//! Simulated container writer producing a real file.
//!
//! The file layout is a simple record stream, not MP4: a `VSIM` header
//! listing the track mime types, then one record per sample. It exists so
//! runs produce an output of realistic size that tests can inspect.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use tracing::debug;
use vidopt_core::media::{ContainerWriter, MediaError, MediaFormat, MediaResult, SampleBuffer};

use crate::ledger::{LedgerAction, ResourceId, ResourceLedger};

pub const FILE_MAGIC: &[u8; 4] = b"VSIM";

/// One sample as the writer received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenSample {
    pub track_index: usize,
    pub presentation_time_us: i64,
    pub size_bytes: usize,
    pub key_frame: bool,
}

/// Everything a writer was asked to do, kept after the writer is gone.
#[derive(Debug, Clone, Default)]
pub struct WrittenOutput {
    pub path: PathBuf,
    pub tracks: Vec<MediaFormat>,
    pub samples: Vec<WrittenSample>,
    pub started: bool,
    pub stopped: bool,
    pub closed: bool,
    pub bytes_written: u64,
}

impl WrittenOutput {
    /// Samples written to `track_index`.
    pub fn samples_for(&self, track_index: usize) -> Vec<WrittenSample> {
        self.samples
            .iter()
            .filter(|sample| sample.track_index == track_index)
            .copied()
            .collect()
    }

    /// Index of the first track whose mime type starts with `prefix`.
    pub fn track_with_prefix(&self, prefix: &str) -> Option<usize> {
        self.tracks
            .iter()
            .position(|format| format.mime_type.starts_with(prefix))
    }
}

/// Shared view of one writer's [`WrittenOutput`].
pub type WriterRecord = Arc<Mutex<WrittenOutput>>;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WriterFaults {
    pub start: bool,
    pub stop: bool,
    pub close: bool,
}

/// Writer enforcing the container lifecycle: tracks, start, samples, stop.
pub struct SimulatedWriter {
    file: Option<BufWriter<File>>,
    record: WriterRecord,
    faults: WriterFaults,
    ledger: ResourceLedger,
    id: ResourceId,
}

impl SimulatedWriter {
    /// Creates the output file.
    ///
    /// # Errors
    /// - `MediaError::Writer` - The file cannot be created
    pub(crate) fn create(
        path: &Path,
        faults: WriterFaults,
        ledger: ResourceLedger,
        id: ResourceId,
    ) -> MediaResult<(Self, WriterRecord)> {
        let file = File::create(path)
            .map_err(|e| MediaError::writer(format!("{}: {e}", path.display())))?;
        let record = Arc::new(Mutex::new(WrittenOutput {
            path: path.to_path_buf(),
            ..Default::default()
        }));
        let writer = Self {
            file: Some(BufWriter::new(file)),
            record: Arc::clone(&record),
            faults,
            ledger,
            id,
        };
        Ok((writer, record))
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> MediaResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| MediaError::writer("writer is closed"))?;
        file.write_all(bytes)?;
        self.record.lock().bytes_written += bytes.len() as u64;
        Ok(())
    }
}

impl ContainerWriter for SimulatedWriter {
    fn add_track(&mut self, format: &MediaFormat) -> MediaResult<usize> {
        let mut record = self.record.lock();
        if record.started {
            return Err(MediaError::writer("tracks must be added before start"));
        }
        if format.track_kind().is_none() {
            return Err(MediaError::writer(format!("cannot mux {}", format.mime_type)));
        }
        record.tracks.push(format.clone());
        Ok(record.tracks.len() - 1)
    }

    fn start(&mut self) -> MediaResult<()> {
        let header = {
            let record = self.record.lock();
            if record.started {
                return Err(MediaError::writer("writer already started"));
            }
            if record.tracks.is_empty() {
                return Err(MediaError::writer("no tracks registered"));
            }
            if self.faults.start {
                return Err(MediaError::writer("simulated start failure"));
            }

            let mut header = BytesMut::new();
            header.put_slice(FILE_MAGIC);
            header.put_u8(record.tracks.len() as u8);
            for format in &record.tracks {
                header.put_u16(format.mime_type.len() as u16);
                header.put_slice(format.mime_type.as_bytes());
            }
            header
        };

        self.write_bytes(&header)?;
        self.record.lock().started = true;
        self.ledger.record(self.id, LedgerAction::Start);
        Ok(())
    }

    fn write_sample(&mut self, track_index: usize, sample: &SampleBuffer) -> MediaResult<()> {
        {
            let record = self.record.lock();
            if !record.started || record.stopped {
                return Err(MediaError::writer("writer is not accepting samples"));
            }
            if track_index >= record.tracks.len() {
                return Err(MediaError::writer(format!("unknown track {track_index}")));
            }
            let previous = record
                .samples
                .iter()
                .rev()
                .find(|written| written.track_index == track_index);
            if let Some(previous) = previous {
                if sample.presentation_time_us < previous.presentation_time_us {
                    return Err(MediaError::writer(format!(
                        "track {track_index} timestamp went backwards: {} after {}",
                        sample.presentation_time_us, previous.presentation_time_us
                    )));
                }
            }
        }

        let mut entry = BytesMut::with_capacity(sample.size_bytes() + 14);
        entry.put_u8(track_index as u8);
        entry.put_i64(sample.presentation_time_us);
        entry.put_u8(u8::from(sample.flags.key_frame));
        entry.put_u32(sample.size_bytes() as u32);
        entry.put_slice(&sample.data);
        self.write_bytes(&entry)?;

        self.record.lock().samples.push(WrittenSample {
            track_index,
            presentation_time_us: sample.presentation_time_us,
            size_bytes: sample.size_bytes(),
            key_frame: sample.flags.key_frame,
        });
        Ok(())
    }

    fn stop(&mut self) -> MediaResult<()> {
        if !self.record.lock().started {
            return Err(MediaError::writer("writer was never started"));
        }
        self.ledger.record(self.id, LedgerAction::Stop);
        if self.faults.stop {
            return Err(MediaError::writer("simulated stop failure"));
        }
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        self.record.lock().stopped = true;
        Ok(())
    }

    fn close(&mut self) -> MediaResult<()> {
        self.ledger.record(self.id, LedgerAction::Release);
        let file = self.file.take();
        self.record.lock().closed = true;
        if self.faults.close {
            return Err(MediaError::writer("simulated release failure"));
        }
        if let Some(mut file) = file {
            file.flush()?;
        }
        let record = self.record.lock();
        debug!(
            path = %record.path.display(),
            samples = record.samples.len(),
            bytes = record.bytes_written,
            "Closed simulated writer"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ResourceKind;
    use vidopt_core::media::{BufferFlags, mime};
    use vidopt_core::test_fixtures::create_temp_output;

    fn writer(
        path: &Path,
        faults: WriterFaults,
    ) -> (ResourceLedger, SimulatedWriter, WriterRecord) {
        let ledger = ResourceLedger::new();
        let id = ledger.open(ResourceKind::Writer);
        let (writer, record) = SimulatedWriter::create(path, faults, ledger.clone(), id).unwrap();
        (ledger, writer, record)
    }

    #[test]
    fn test_lifecycle_writes_file() {
        let (_dir, output) = create_temp_output();
        let (ledger, mut writer, record) = writer(&output, WriterFaults::default());

        let track = writer.add_track(&MediaFormat::video(mime::VIDEO_AVC, 640, 480)).unwrap();
        writer.start().unwrap();
        writer
            .write_sample(track, &SampleBuffer::new(vec![7u8; 100], 0, BufferFlags::KEY_FRAME))
            .unwrap();
        writer.stop().unwrap();
        writer.close().unwrap();

        let size = std::fs::metadata(&output).unwrap().len();
        assert_eq!(size, record.lock().bytes_written);
        assert!(size > 100);
        assert_eq!(record.lock().samples_for(track).len(), 1);
        assert!(ledger.is_balanced());
    }

    #[test]
    fn test_samples_rejected_before_start() {
        let (_dir, output) = create_temp_output();
        let (_, mut writer, _) = writer(&output, WriterFaults::default());
        writer.add_track(&MediaFormat::audio(mime::AUDIO_AAC, 44_100, 2)).unwrap();

        let sample = SampleBuffer::new(vec![1], 0, BufferFlags::NONE);
        assert!(writer.write_sample(0, &sample).is_err());
        assert!(writer.stop().is_err());
    }

    #[test]
    fn test_tracks_rejected_after_start() {
        let (_dir, output) = create_temp_output();
        let (_, mut writer, _) = writer(&output, WriterFaults::default());
        writer.add_track(&MediaFormat::video(mime::VIDEO_AVC, 640, 480)).unwrap();
        writer.start().unwrap();

        assert!(writer.add_track(&MediaFormat::audio(mime::AUDIO_AAC, 44_100, 2)).is_err());
        assert!(writer.start().is_err());
    }

    #[test]
    fn test_backwards_timestamps_rejected() {
        let (_dir, output) = create_temp_output();
        let (_, mut writer, _) = writer(&output, WriterFaults::default());
        writer.add_track(&MediaFormat::video(mime::VIDEO_AVC, 640, 480)).unwrap();
        writer.start().unwrap();

        writer.write_sample(0, &SampleBuffer::new(vec![1], 40_000, BufferFlags::NONE)).unwrap();
        assert!(writer.write_sample(0, &SampleBuffer::new(vec![1], 0, BufferFlags::NONE)).is_err());
    }

    #[test]
    fn test_start_fault() {
        let (_dir, output) = create_temp_output();
        let faults = WriterFaults {
            start: true,
            ..Default::default()
        };
        let (_, mut writer, record) = writer(&output, faults);
        writer.add_track(&MediaFormat::video(mime::VIDEO_AVC, 640, 480)).unwrap();

        assert!(matches!(writer.start(), Err(MediaError::Writer { .. })));
        assert!(!record.lock().started);
    }
}
