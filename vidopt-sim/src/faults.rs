//! Fault injection plan for the simulated platform.

use vidopt_core::media::{CodecRole, TrackKind};

/// Codec selector used by fault rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecTarget {
    pub role: CodecRole,
    pub kind: TrackKind,
}

impl CodecTarget {
    pub const fn new(role: CodecRole, kind: TrackKind) -> Self {
        Self { role, kind }
    }

    pub const fn decoder(kind: TrackKind) -> Self {
        Self::new(CodecRole::Decoder, kind)
    }

    pub const fn encoder(kind: TrackKind) -> Self {
        Self::new(CodecRole::Encoder, kind)
    }
}

/// Failures the simulated backend injects into the resources it creates.
///
/// Empty by default. Built with chained methods:
///
/// ```
/// use vidopt_core::media::TrackKind;
/// use vidopt_sim::{CodecTarget, FaultPlan};
///
/// let faults = FaultPlan::new()
///     .codec_error_after(CodecTarget::encoder(TrackKind::Video), 10)
///     .fail_writer_stop();
/// assert!(!faults.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub source_open: bool,
    pub source_read_after: Option<u64>,
    pub source_close: bool,
    pub codec_create: Vec<CodecTarget>,
    pub codec_error_after: Vec<(CodecTarget, u64)>,
    pub premature_end_of_stream: Vec<CodecTarget>,
    pub codec_close: Vec<CodecTarget>,
    pub writer_create: bool,
    pub writer_start: bool,
    pub writer_stop: bool,
    pub writer_close: bool,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn fail_source_open(mut self) -> Self {
        self.source_open = true;
        self
    }

    /// Fails the read after `samples` samples were returned.
    pub fn fail_source_read_after(mut self, samples: u64) -> Self {
        self.source_read_after = Some(samples);
        self
    }

    pub fn fail_source_close(mut self) -> Self {
        self.source_close = true;
        self
    }

    pub fn fail_codec_create(mut self, target: CodecTarget) -> Self {
        self.codec_create.push(target);
        self
    }

    /// Fails `submit` once the codec has accepted `inputs` inputs.
    pub fn codec_error_after(mut self, target: CodecTarget, inputs: u64) -> Self {
        self.codec_error_after.push((target, inputs));
        self
    }

    /// Makes the codec signal end-of-stream right after its first output.
    pub fn premature_end_of_stream(mut self, target: CodecTarget) -> Self {
        self.premature_end_of_stream.push(target);
        self
    }

    pub fn fail_codec_close(mut self, target: CodecTarget) -> Self {
        self.codec_close.push(target);
        self
    }

    pub fn fail_writer_create(mut self) -> Self {
        self.writer_create = true;
        self
    }

    pub fn fail_writer_start(mut self) -> Self {
        self.writer_start = true;
        self
    }

    pub fn fail_writer_stop(mut self) -> Self {
        self.writer_stop = true;
        self
    }

    pub fn fail_writer_close(mut self) -> Self {
        self.writer_close = true;
        self
    }

    /// Faults that apply to one codec.
    pub fn for_codec(&self, target: CodecTarget) -> CodecFaults {
        CodecFaults {
            error_after: self
                .codec_error_after
                .iter()
                .filter(|(candidate, _)| *candidate == target)
                .map(|(_, inputs)| *inputs)
                .min(),
            premature_end_of_stream: self.premature_end_of_stream.contains(&target),
            fail_close: self.codec_close.contains(&target),
        }
    }

    pub(crate) fn fails_create(&self, target: CodecTarget) -> bool {
        self.codec_create.contains(&target)
    }
}

/// Faults resolved for a single codec instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecFaults {
    pub error_after: Option<u64>,
    pub premature_end_of_stream: bool,
    pub fail_close: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_faults_are_resolved_per_target() {
        let video_encoder = CodecTarget::encoder(TrackKind::Video);
        let plan = FaultPlan::new()
            .codec_error_after(video_encoder, 20)
            .codec_error_after(video_encoder, 5)
            .fail_codec_close(CodecTarget::decoder(TrackKind::Audio));

        let faults = plan.for_codec(video_encoder);
        assert_eq!(faults.error_after, Some(5));
        assert!(!faults.fail_close);

        let audio_decoder = plan.for_codec(CodecTarget::decoder(TrackKind::Audio));
        assert!(audio_decoder.fail_close);
        assert_eq!(audio_decoder.error_after, None);
    }

    #[test]
    fn test_default_plan_is_empty() {
        assert!(FaultPlan::default().is_empty());
        assert!(!FaultPlan::new().fail_writer_start().is_empty());
    }
}
