//! Simulated media platform implementing [`MediaBackend`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use vidopt_core::media::{
    CodecPort, CodecRole, ContainerWriter, MediaBackend, MediaError, MediaFormat, MediaResult,
    MediaSource, TrackKind, mime,
};

use crate::codec::{CodecBehavior, CodecSetup, SimulatedCodec};
use crate::faults::{CodecTarget, FaultPlan};
use crate::ledger::{LedgerAction, ResourceKind, ResourceLedger};
use crate::media::SimulatedMedia;
use crate::source::SimulatedSource;
use crate::writer::{SimulatedWriter, WriterFaults, WriterRecord, WrittenOutput};

/// Compressed formats the simulated platform can decode and encode.
pub const SUPPORTED_MIME_TYPES: &[&str] = &[
    mime::VIDEO_AVC,
    mime::VIDEO_HEVC,
    mime::VIDEO_VP9,
    mime::VIDEO_AV1,
    mime::AUDIO_AAC,
];

/// Deterministic platform backed by [`SimulatedMedia`] descriptions.
///
/// Inputs are looked up by path; outputs are real files written by
/// [`SimulatedWriter`]. Every resource handed out is recorded in a shared
/// [`ResourceLedger`].
///
/// ```
/// use vidopt_sim::{SimulatedBackend, SimulatedMedia};
///
/// let backend = SimulatedBackend::new()
///     .with_seed(42)
///     .with_input("clip.mp4", SimulatedMedia::hd_clip(1_000_000));
/// assert!(backend.ledger().entries().is_empty());
/// ```
pub struct SimulatedBackend {
    inputs: RwLock<HashMap<PathBuf, SimulatedMedia>>,
    fallback_input: Option<SimulatedMedia>,
    behaviors: HashMap<(CodecRole, TrackKind), CodecBehavior>,
    faults: FaultPlan,
    ledger: ResourceLedger,
    seed: u64,
    codecs_created: AtomicU64,
    outputs: Mutex<Vec<WriterRecord>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        let mut behaviors = HashMap::new();
        for kind in [TrackKind::Video, TrackKind::Audio] {
            behaviors.insert((CodecRole::Decoder, kind), CodecBehavior::decoder());
            behaviors.insert((CodecRole::Encoder, kind), CodecBehavior::encoder());
        }
        Self {
            inputs: RwLock::new(HashMap::new()),
            fallback_input: None,
            behaviors,
            faults: FaultPlan::default(),
            ledger: ResourceLedger::new(),
            seed: 0,
            codecs_created: AtomicU64::new(0),
            outputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_input(self, path: impl Into<PathBuf>, media: SimulatedMedia) -> Self {
        self.register_input(path, media);
        self
    }

    /// Media served for paths that were never registered.
    pub fn with_fallback_input(mut self, media: SimulatedMedia) -> Self {
        self.fallback_input = Some(media);
        self
    }

    /// Behaviour of every codec with `role`.
    pub fn with_codec_behavior(mut self, role: CodecRole, behavior: CodecBehavior) -> Self {
        for kind in [TrackKind::Video, TrackKind::Audio] {
            self.behaviors.insert((role, kind), behavior.clone());
        }
        self
    }

    /// Behaviour of the codec with `role` for `kind` tracks only.
    pub fn with_track_behavior(
        mut self,
        role: CodecRole,
        kind: TrackKind,
        behavior: CodecBehavior,
    ) -> Self {
        self.behaviors.insert((role, kind), behavior);
        self
    }

    pub fn with_faults(mut self, faults: FaultPlan) -> Self {
        self.faults = faults;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn register_input(&self, path: impl Into<PathBuf>, media: SimulatedMedia) {
        self.inputs.write().insert(path.into(), media);
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Snapshots of every writer created so far, oldest first.
    pub fn outputs(&self) -> Vec<WrittenOutput> {
        self.outputs
            .lock()
            .iter()
            .map(|record| record.lock().clone())
            .collect()
    }

    pub fn last_output(&self) -> Option<WrittenOutput> {
        self.outputs.lock().last().map(|record| record.lock().clone())
    }

    fn media_for(&self, input: &Path) -> MediaResult<SimulatedMedia> {
        let media = self
            .inputs
            .read()
            .get(input)
            .cloned()
            .or_else(|| self.fallback_input.clone())
            .ok_or_else(|| MediaError::source(format!("{}: no such file", input.display())))?;
        media
            .validate()
            .map_err(|e| MediaError::source(format!("{}: {e}", input.display())))?;
        Ok(media)
    }

    fn create_codec(
        &self,
        role: CodecRole,
        format: &MediaFormat,
        output_format: &MediaFormat,
    ) -> MediaResult<Box<dyn CodecPort>> {
        let kind = format.track_kind().ok_or_else(|| {
            MediaError::codec("sim", format!("{} is neither audio nor video", format.mime_type))
        })?;
        let supported = SUPPORTED_MIME_TYPES
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(&format.mime_type));
        if !supported {
            return Err(MediaError::CodecUnavailable {
                kind,
                mime_type: format.mime_type.clone(),
            });
        }

        let target = CodecTarget::new(role, kind);
        if self.faults.fails_create(target) {
            return Err(MediaError::codec(
                format!("sim.{kind}.{role}"),
                "simulated configuration failure",
            ));
        }

        let serial = self.codecs_created.fetch_add(1, Ordering::Relaxed);
        let behavior = self
            .behaviors
            .get(&(role, kind))
            .cloned()
            .unwrap_or_else(|| match role {
                CodecRole::Decoder => CodecBehavior::decoder(),
                CodecRole::Encoder => CodecBehavior::encoder(),
            });
        let setup = CodecSetup {
            role,
            kind,
            output_format: output_format.clone(),
            behavior,
            faults: self.faults.for_codec(target),
            seed: self.seed.wrapping_add(serial),
        };
        let id = self.ledger.open(ResourceKind::Codec(role, kind));
        debug!(codec = %id, format = %output_format, "Created simulated codec");
        Ok(Box::new(SimulatedCodec::new(setup, self.ledger.clone(), id)))
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedBackend")
            .field("inputs", &self.inputs.read().len())
            .field("seed", &self.seed)
            .field("faults", &self.faults)
            .finish()
    }
}

impl MediaBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open_source(&self, input: &Path) -> MediaResult<Box<dyn MediaSource>> {
        if self.faults.source_open {
            return Err(MediaError::source(format!("{}: simulated open failure", input.display())));
        }
        let media = self.media_for(input)?;

        let id = self.ledger.open(ResourceKind::Source);
        let mut source = SimulatedSource::new(&media, self.ledger.clone(), id);
        if let Some(samples) = self.faults.source_read_after {
            source = source.failing_read_after(samples);
        }
        if self.faults.source_close {
            source = source.failing_close();
        }
        info!(input = %input.display(), tracks = media.tracks.len(), "Opened simulated source");
        Ok(Box::new(source))
    }

    fn create_decoder(
        &self,
        source_format: &MediaFormat,
        output: &MediaFormat,
    ) -> MediaResult<Box<dyn CodecPort>> {
        self.create_codec(CodecRole::Decoder, source_format, output)
    }

    fn create_encoder(&self, target: &MediaFormat) -> MediaResult<Box<dyn CodecPort>> {
        self.create_codec(CodecRole::Encoder, target, target)
    }

    fn create_writer(&self, output: &Path) -> MediaResult<Box<dyn ContainerWriter>> {
        if self.faults.writer_create {
            return Err(MediaError::writer(format!(
                "{}: simulated create failure",
                output.display()
            )));
        }
        let faults = WriterFaults {
            start: self.faults.writer_start,
            stop: self.faults.writer_stop,
            close: self.faults.writer_close,
        };
        let id = self.ledger.open(ResourceKind::Writer);
        let created = SimulatedWriter::create(output, faults, self.ledger.clone(), id);
        let (writer, record) = match created {
            Ok(created) => created,
            Err(e) => {
                // A writer that failed to open has nothing left to release.
                self.ledger.record(id, LedgerAction::Release);
                return Err(e);
            }
        };
        self.outputs.lock().push(record);
        Ok(Box::new(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidopt_core::media::SampleBuffer;
    use vidopt_core::test_fixtures::create_temp_output;

    #[test]
    fn test_unknown_input_fails_to_open() {
        let backend = SimulatedBackend::new();
        let result = backend.open_source(Path::new("missing.mp4"));
        assert!(matches!(result, Err(MediaError::Source { .. })));
        assert!(backend.ledger().entries().is_empty());
    }

    #[test]
    fn test_fallback_input_serves_any_path() {
        let backend =
            SimulatedBackend::new().with_fallback_input(SimulatedMedia::hd_clip(1_000_000));
        let source = backend.open_source(Path::new("anything.mov")).unwrap();
        assert_eq!(source.track_count(), 2);
    }

    #[test]
    fn test_unsupported_codec_is_unavailable() {
        let backend = SimulatedBackend::new();
        let target = MediaFormat::video("video/x-unknown", 640, 480);
        assert!(matches!(
            backend.create_encoder(&target),
            Err(MediaError::CodecUnavailable { kind: TrackKind::Video, .. })
        ));
    }

    #[test]
    fn test_codec_create_fault() {
        let faults = FaultPlan::new().fail_codec_create(CodecTarget::encoder(TrackKind::Audio));
        let backend = SimulatedBackend::new().with_faults(faults);

        let audio = MediaFormat::audio(mime::AUDIO_AAC, 44_100, 2);
        assert!(backend.create_encoder(&audio).is_err());
        assert!(backend.create_decoder(&audio, &audio).is_ok());
    }

    #[test]
    fn test_writer_records_are_kept() {
        let (_dir, output) = create_temp_output();
        let backend = SimulatedBackend::new();
        let mut writer = backend.create_writer(&output).unwrap();
        let track = writer.add_track(&MediaFormat::audio(mime::AUDIO_AAC, 44_100, 2)).unwrap();
        writer.start().unwrap();
        writer
            .write_sample(track, &SampleBuffer::new(vec![1u8; 10], 0, Default::default()))
            .unwrap();
        writer.stop().unwrap();
        writer.close().unwrap();

        let written = backend.last_output().unwrap();
        assert_eq!(written.samples.len(), 1);
        assert!(written.stopped && written.closed);
        assert!(backend.ledger().is_balanced());
    }
}
