//! Minimal in-memory platform pieces for pipeline unit tests.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::media::{
    BufferFlags, CodecOutput, CodecPort, ContainerWriter, InputSlot, MediaBackend, MediaError,
    MediaFormat, MediaResult, MediaSource, OutputSlot, SampleBuffer, SourceSample, mime,
};

/// Ordered record of lifecycle calls across all mocks of one test.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub struct ScriptedSource {
    tracks: Vec<(MediaFormat, Vec<SampleBuffer>)>,
    positions: Vec<usize>,
    selected: BTreeSet<usize>,
    log: CallLog,
}

impl ScriptedSource {
    pub fn new(log: CallLog) -> Self {
        Self {
            tracks: Vec::new(),
            positions: Vec::new(),
            selected: BTreeSet::new(),
            log,
        }
    }

    /// Adds a track with `count` samples spaced `interval_us` apart.
    pub fn with_track(mut self, format: MediaFormat, count: usize, interval_us: i64) -> Self {
        let samples = (0..count)
            .map(|i| {
                let flags = if i == 0 {
                    BufferFlags::KEY_FRAME
                } else {
                    BufferFlags::NONE
                };
                SampleBuffer::new(vec![i as u8; 32], i as i64 * interval_us, flags)
            })
            .collect();
        self.tracks.push((format, samples));
        self.positions.push(0);
        self
    }
}

impl MediaSource for ScriptedSource {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> MediaResult<MediaFormat> {
        self.tracks
            .get(index)
            .map(|(format, _)| format.clone())
            .ok_or_else(|| MediaError::source(format!("no track {index}")))
    }

    fn select_track(&mut self, index: usize) -> MediaResult<()> {
        self.selected.insert(index);
        Ok(())
    }

    fn unselect_track(&mut self, index: usize) -> MediaResult<()> {
        self.selected.remove(&index);
        Ok(())
    }

    fn seek_to(&mut self, _time_us: i64) -> MediaResult<()> {
        self.positions.iter_mut().for_each(|position| *position = 0);
        Ok(())
    }

    fn read_sample(&mut self) -> MediaResult<Option<SourceSample>> {
        let next = self
            .selected
            .iter()
            .filter_map(|&index| {
                let (_, samples) = &self.tracks[index];
                samples
                    .get(self.positions[index])
                    .map(|sample| (sample.presentation_time_us, index))
            })
            .min();

        Ok(next.map(|(_, index)| {
            let buffer = self.tracks[index].1[self.positions[index]].clone();
            self.positions[index] += 1;
            SourceSample {
                track_index: index,
                buffer,
            }
        }))
    }

    fn sample_count_hint(&self, index: usize) -> Option<u64> {
        self.tracks.get(index).map(|(_, samples)| samples.len() as u64)
    }

    fn close(&mut self) -> MediaResult<()> {
        self.log.lock().push("source.close".to_string());
        Ok(())
    }
}

/// Codec that outputs its inputs unchanged.
pub struct PassthroughCodec {
    name: String,
    slots: usize,
    free: VecDeque<usize>,
    pending: VecDeque<SampleBuffer>,
    borrowed: HashSet<usize>,
    next_output_slot: usize,
    format: Option<MediaFormat>,
    format_announced: bool,
    eager_format: bool,
    config_buffer: bool,
    refuse_inputs: usize,
    refuse_after: Option<(usize, usize)>,
    submitted: usize,
    premature_eos: bool,
    fail_close: bool,
    log: CallLog,
}

impl PassthroughCodec {
    pub fn new(name: &str, log: CallLog) -> Self {
        Self {
            name: name.to_string(),
            slots: 4,
            free: (0..4).collect(),
            pending: VecDeque::new(),
            borrowed: HashSet::new(),
            next_output_slot: 0,
            format: None,
            format_announced: false,
            eager_format: false,
            config_buffer: false,
            refuse_inputs: 0,
            refuse_after: None,
            submitted: 0,
            premature_eos: false,
            fail_close: false,
            log,
        }
    }

    /// Announces `format` through `FormatChanged` before the first buffer.
    pub fn announcing(mut self, format: MediaFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Reports the output format from `output_format` at creation.
    pub fn eager(mut self) -> Self {
        self.eager_format = true;
        self
    }

    pub fn with_config_buffer(mut self) -> Self {
        self.config_buffer = true;
        self
    }

    /// Returns no input slot for the first `count` acquisitions.
    pub fn refusing_inputs(mut self, count: usize) -> Self {
        self.refuse_inputs = count;
        self
    }

    /// Returns no input slot for `count` acquisitions once `submitted` samples went in.
    pub fn refusing_after(mut self, submitted: usize, count: usize) -> Self {
        self.refuse_after = Some((submitted, count));
        self
    }

    /// Emits end-of-stream as soon as the first input arrives.
    pub fn with_premature_eos(mut self) -> Self {
        self.premature_eos = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

impl CodecPort for PassthroughCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_acquire_input(&mut self, _timeout: Duration) -> MediaResult<Option<InputSlot>> {
        if self.refuse_inputs > 0 {
            self.refuse_inputs -= 1;
            return Ok(None);
        }
        if let Some((after, count)) = self.refuse_after {
            if self.submitted >= after && count > 0 {
                self.refuse_after = Some((after, count - 1));
                self.log.lock().push(format!("{}.busy", self.name));
                return Ok(None);
            }
        }
        Ok(self.free.pop_front().map(|index| InputSlot {
            index,
            capacity: None,
        }))
    }

    fn submit(&mut self, slot: InputSlot, sample: SampleBuffer) -> MediaResult<()> {
        if slot.index >= self.slots {
            return Err(MediaError::InvalidSlot {
                codec: self.name.clone(),
                index: slot.index,
            });
        }
        if sample.is_end_of_stream() {
            self.log.lock().push(format!("{}.eos", self.name));
        } else {
            self.submitted += 1;
        }
        if self.premature_eos && !sample.is_end_of_stream() {
            self.pending.push_back(sample);
            self.pending.push_back(SampleBuffer::end_of_stream(0));
        } else {
            self.pending.push_back(sample);
        }
        self.free.push_back(slot.index);
        Ok(())
    }

    fn output_format(&self) -> Option<MediaFormat> {
        if self.eager_format {
            self.format.clone()
        } else {
            None
        }
    }

    fn try_acquire_output(&mut self, _timeout: Duration) -> MediaResult<Option<CodecOutput>> {
        if !self.format_announced && !self.pending.is_empty() {
            if let Some(format) = self.format.clone() {
                self.format_announced = true;
                return Ok(Some(CodecOutput::FormatChanged(format)));
            }
        }

        let sample = if self.config_buffer {
            self.config_buffer = false;
            Some(SampleBuffer::new(vec![0xAA; 4], 0, BufferFlags::CONFIG))
        } else {
            self.pending.pop_front()
        };

        Ok(sample.map(|sample| {
            let index = self.next_output_slot;
            self.next_output_slot += 1;
            self.borrowed.insert(index);
            CodecOutput::Buffer {
                slot: OutputSlot { index },
                sample,
            }
        }))
    }

    fn release(&mut self, slot: OutputSlot) -> MediaResult<()> {
        if !self.borrowed.remove(&slot.index) {
            return Err(MediaError::InvalidSlot {
                codec: self.name.clone(),
                index: slot.index,
            });
        }
        Ok(())
    }

    fn close(&mut self) -> MediaResult<()> {
        self.log.lock().push(format!("{}.close", self.name));
        if self.fail_close {
            return Err(MediaError::codec(self.name.clone(), "release failed"));
        }
        Ok(())
    }
}

/// Writer keeping track formats and sample timestamps in memory.
pub struct MemoryWriter {
    pub tracks: Arc<Mutex<Vec<MediaFormat>>>,
    pub samples: Arc<Mutex<Vec<(usize, i64)>>>,
    output: Option<std::path::PathBuf>,
    log: CallLog,
}

impl MemoryWriter {
    pub fn new(log: CallLog) -> Self {
        Self {
            tracks: Arc::default(),
            samples: Arc::default(),
            output: None,
            log,
        }
    }
}

impl ContainerWriter for MemoryWriter {
    fn add_track(&mut self, format: &MediaFormat) -> MediaResult<usize> {
        let mut tracks = self.tracks.lock();
        tracks.push(format.clone());
        Ok(tracks.len() - 1)
    }

    fn start(&mut self) -> MediaResult<()> {
        self.log.lock().push("writer.start".to_string());
        Ok(())
    }

    fn write_sample(&mut self, track_index: usize, sample: &SampleBuffer) -> MediaResult<()> {
        self.samples
            .lock()
            .push((track_index, sample.presentation_time_us));
        Ok(())
    }

    fn stop(&mut self) -> MediaResult<()> {
        self.log.lock().push("writer.stop".to_string());
        if let Some(output) = &self.output {
            let count = self.samples.lock().len();
            std::fs::write(output, format!("{count} samples"))?;
        }
        Ok(())
    }

    fn close(&mut self) -> MediaResult<()> {
        self.log.lock().push("writer.close".to_string());
        Ok(())
    }
}

/// Backend whose codecs are passthroughs announcing their target format.
pub struct MockBackend {
    pub log: CallLog,
    pub video_frames: usize,
    pub audio_frames: Option<usize>,
    pub include_video: bool,
    pub eager_formats: bool,
    pub fail_video_decoder_close: bool,
    pub created_codecs: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            video_frames: 30,
            audio_frames: Some(43),
            include_video: true,
            eager_formats: true,
            fail_video_decoder_close: false,
            created_codecs: Arc::default(),
        }
    }
}

impl MediaBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn open_source(&self, _input: &Path) -> MediaResult<Box<dyn MediaSource>> {
        let mut source = ScriptedSource::new(Arc::clone(&self.log));
        if self.include_video {
            source = source.with_track(
                MediaFormat::video(mime::VIDEO_AVC, 1920, 1080).with_duration_us(1_000_000),
                self.video_frames,
                33_333,
            );
        }
        if let Some(frames) = self.audio_frames {
            source = source.with_track(
                MediaFormat::audio(mime::AUDIO_AAC, 44_100, 2).with_duration_us(1_000_000),
                frames,
                23_219,
            );
        }
        Ok(Box::new(source))
    }

    fn create_decoder(
        &self,
        source_format: &MediaFormat,
        _output: &MediaFormat,
    ) -> MediaResult<Box<dyn CodecPort>> {
        let name = format!("{}-decoder", source_format.mime_type);
        self.created_codecs.lock().push(name.clone());
        let mut codec = PassthroughCodec::new(&name, Arc::clone(&self.log));
        if self.fail_video_decoder_close && source_format.mime_type.starts_with("video/") {
            codec = codec.failing_close();
        }
        Ok(Box::new(codec))
    }

    fn create_encoder(&self, target: &MediaFormat) -> MediaResult<Box<dyn CodecPort>> {
        let name = format!("{}-encoder", target.mime_type);
        self.created_codecs.lock().push(name.clone());
        let mut codec =
            PassthroughCodec::new(&name, Arc::clone(&self.log)).announcing(target.clone());
        if self.eager_formats {
            codec = codec.eager();
        }
        Ok(Box::new(codec))
    }

    fn create_writer(&self, output: &Path) -> MediaResult<Box<dyn ContainerWriter>> {
        let mut writer = MemoryWriter::new(Arc::clone(&self.log));
        writer.output = Some(output.to_path_buf());
        Ok(Box::new(writer))
    }
}
