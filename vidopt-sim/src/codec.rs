//! Simulated decoders and encoders with latency, slot limits and faults.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};
use vidopt_core::media::{
    BufferFlags, CodecOutput, CodecPort, CodecRole, InputSlot, MediaError, MediaFormat,
    MediaResult, OutputSlot, SampleBuffer, TrackKind,
};

use crate::faults::CodecFaults;
use crate::ledger::{LedgerAction, ResourceId, ResourceLedger};
use crate::media::AUDIO_FRAME_SAMPLES;

const MAX_ENCODED_BYTES: u64 = 64 * 1024;

/// How a codec makes its output format known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatReport {
    /// Known from creation and announced again before the first buffer.
    #[default]
    Eager,
    /// Announced through `FormatChanged` before the first buffer only.
    Announced,
    /// Never reported.
    Silent,
}

/// Timing and reporting behaviour of simulated codecs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecBehavior {
    pub input_slots: usize,
    pub latency: Duration,
    /// Upper bound of random extra latency per sample.
    pub jitter: Duration,
    pub format_report: FormatReport,
    /// Emit a codec configuration buffer ahead of the first data buffer.
    pub config_buffer: bool,
    /// Payload size of decoded frames.
    pub raw_payload_bytes: usize,
}

impl CodecBehavior {
    pub fn decoder() -> Self {
        Self {
            input_slots: 4,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            format_report: FormatReport::Announced,
            config_buffer: false,
            raw_payload_bytes: 64,
        }
    }

    pub fn encoder() -> Self {
        Self {
            format_report: FormatReport::Eager,
            config_buffer: true,
            ..Self::decoder()
        }
    }

    pub fn with_latency(mut self, latency: Duration, jitter: Duration) -> Self {
        self.latency = latency;
        self.jitter = jitter;
        self
    }

    pub fn with_input_slots(mut self, input_slots: usize) -> Self {
        self.input_slots = input_slots.max(1);
        self
    }

    pub fn with_format_report(mut self, format_report: FormatReport) -> Self {
        self.format_report = format_report;
        self
    }

    pub fn with_config_buffer(mut self, config_buffer: bool) -> Self {
        self.config_buffer = config_buffer;
        self
    }
}

struct Pending {
    ready_at: Instant,
    sample: SampleBuffer,
    /// Input slot held until this output is handed out.
    input_slot: Option<usize>,
}

/// Identity and wiring of a simulated codec.
pub struct CodecSetup {
    pub role: CodecRole,
    pub kind: TrackKind,
    pub output_format: MediaFormat,
    pub behavior: CodecBehavior,
    pub faults: CodecFaults,
    pub seed: u64,
}

/// Codec that turns every input into one output after a simulated delay.
///
/// Decoders emit small raw stand-ins; encoders emit payloads sized from the
/// target bitrate. Input slots stay occupied until the matching output is
/// handed out, so a slow codec eventually refuses input.
pub struct SimulatedCodec {
    name: String,
    role: CodecRole,
    kind: TrackKind,
    behavior: CodecBehavior,
    format: MediaFormat,
    faults: CodecFaults,
    rng: ChaCha8Rng,
    free_inputs: VecDeque<usize>,
    acquired_inputs: HashSet<usize>,
    pending: VecDeque<Pending>,
    borrowed_outputs: HashSet<usize>,
    next_output_slot: usize,
    announced: bool,
    config_sent: bool,
    accepted: u64,
    emitted: u64,
    ended: bool,
    closed: bool,
    ledger: ResourceLedger,
    id: ResourceId,
}

impl SimulatedCodec {
    pub fn new(setup: CodecSetup, ledger: ResourceLedger, id: ResourceId) -> Self {
        let mut format = setup.output_format;
        if setup.role == CodecRole::Encoder {
            format.extradata = Some(codec_specific_data(setup.kind));
        }
        Self {
            name: format!("sim.{}.{}", setup.kind, setup.role),
            role: setup.role,
            kind: setup.kind,
            free_inputs: (0..setup.behavior.input_slots.max(1)).collect(),
            behavior: setup.behavior,
            format,
            faults: setup.faults,
            rng: ChaCha8Rng::seed_from_u64(setup.seed),
            acquired_inputs: HashSet::new(),
            pending: VecDeque::new(),
            borrowed_outputs: HashSet::new(),
            next_output_slot: 0,
            announced: false,
            config_sent: false,
            accepted: 0,
            emitted: 0,
            ended: false,
            closed: false,
            ledger,
            id,
        }
    }

    pub fn role(&self) -> CodecRole {
        self.role
    }

    /// Inputs accepted so far, end-of-stream included.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    fn ensure_open(&self) -> MediaResult<()> {
        if self.closed {
            return Err(MediaError::codec(&self.name, "codec is closed"));
        }
        Ok(())
    }

    fn ready_at(&mut self) -> Instant {
        let jitter = if self.behavior.jitter.is_zero() {
            Duration::ZERO
        } else {
            let micros = self.behavior.jitter.as_micros() as u64;
            Duration::from_micros(self.rng.random_range(0..=micros))
        };
        let ready_at = Instant::now() + self.behavior.latency + jitter;
        // Outputs leave in submission order.
        self.pending
            .back()
            .map_or(ready_at, |last| ready_at.max(last.ready_at))
    }

    fn enqueue(&mut self, sample: SampleBuffer, input_slot: Option<usize>) {
        let ready_at = self.ready_at();
        self.pending.push_back(Pending {
            ready_at,
            sample,
            input_slot,
        });
    }

    fn process(&mut self, input: &SampleBuffer) -> SampleBuffer {
        let size = match self.role {
            CodecRole::Decoder => self.behavior.raw_payload_bytes.max(1),
            CodecRole::Encoder => encoded_size(&self.format, self.kind, self.emitted),
        };
        let mut data = vec![0u8; size];
        self.rng.fill(&mut data[..]);

        let key_frame = match (self.role, self.kind) {
            (CodecRole::Encoder, TrackKind::Video) => {
                let gop = u64::from(self.format.frame_rate.unwrap_or(30)) * 2;
                self.emitted % gop.max(1) == 0
            }
            (CodecRole::Encoder, TrackKind::Audio) => true,
            (CodecRole::Decoder, _) => false,
        };
        let flags = if key_frame {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::NONE
        };
        self.emitted += 1;
        SampleBuffer::new(data, input.presentation_time_us, flags)
    }

    fn hand_out(&mut self, sample: SampleBuffer) -> CodecOutput {
        let index = self.next_output_slot;
        self.next_output_slot += 1;
        self.borrowed_outputs.insert(index);
        CodecOutput::Buffer {
            slot: OutputSlot { index },
            sample,
        }
    }
}

impl CodecPort for SimulatedCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_acquire_input(&mut self, _timeout: Duration) -> MediaResult<Option<InputSlot>> {
        self.ensure_open()?;
        Ok(self.free_inputs.pop_front().map(|index| {
            self.acquired_inputs.insert(index);
            InputSlot {
                index,
                capacity: None,
            }
        }))
    }

    fn submit(&mut self, slot: InputSlot, sample: SampleBuffer) -> MediaResult<()> {
        self.ensure_open()?;
        if !self.acquired_inputs.remove(&slot.index) {
            return Err(MediaError::InvalidSlot {
                codec: self.name.clone(),
                index: slot.index,
            });
        }
        if let Some(limit) = self.faults.error_after {
            if self.accepted >= limit {
                self.free_inputs.push_back(slot.index);
                return Err(MediaError::codec(
                    &self.name,
                    format!("simulated failure after {limit} inputs"),
                ));
            }
        }
        self.accepted += 1;

        if self.ended {
            // Inputs after a premature end of stream are swallowed.
            self.free_inputs.push_back(slot.index);
            return Ok(());
        }

        if sample.is_end_of_stream() {
            trace!(codec = %self.name, "End of stream submitted");
            self.ended = true;
            self.enqueue(
                SampleBuffer::end_of_stream(sample.presentation_time_us),
                Some(slot.index),
            );
            return Ok(());
        }

        if sample.is_config() {
            self.free_inputs.push_back(slot.index);
            return Ok(());
        }

        if self.role == CodecRole::Encoder && self.behavior.config_buffer && !self.config_sent {
            self.config_sent = true;
            let config = SampleBuffer::new(codec_specific_data(self.kind), 0, BufferFlags::CONFIG);
            self.enqueue(config, None);
        }

        let output = self.process(&sample);
        self.enqueue(output, Some(slot.index));

        if self.faults.premature_end_of_stream {
            self.ended = true;
            self.enqueue(SampleBuffer::end_of_stream(sample.presentation_time_us), None);
        }
        Ok(())
    }

    fn try_acquire_output(&mut self, timeout: Duration) -> MediaResult<Option<CodecOutput>> {
        self.ensure_open()?;
        let Some(front) = self.pending.front() else {
            return Ok(None);
        };

        let now = Instant::now();
        if front.ready_at > now {
            let wait = front.ready_at - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }

        if !self.announced && self.behavior.format_report != FormatReport::Silent {
            self.announced = true;
            debug!(codec = %self.name, format = %self.format, "Output format available");
            return Ok(Some(CodecOutput::FormatChanged(self.format.clone())));
        }

        let Some(pending) = self.pending.pop_front() else {
            return Ok(None);
        };
        if let Some(index) = pending.input_slot {
            self.free_inputs.push_back(index);
        }
        Ok(Some(self.hand_out(pending.sample)))
    }

    fn output_format(&self) -> Option<MediaFormat> {
        (self.behavior.format_report == FormatReport::Eager).then(|| self.format.clone())
    }

    fn release(&mut self, slot: OutputSlot) -> MediaResult<()> {
        if !self.borrowed_outputs.remove(&slot.index) {
            return Err(MediaError::InvalidSlot {
                codec: self.name.clone(),
                index: slot.index,
            });
        }
        Ok(())
    }

    fn close(&mut self) -> MediaResult<()> {
        self.ledger.record(self.id, LedgerAction::Release);
        self.closed = true;
        self.pending.clear();
        if self.faults.fail_close {
            return Err(MediaError::codec(&self.name, "simulated release failure"));
        }
        debug!(
            codec = %self.name,
            accepted = self.accepted,
            emitted = self.emitted,
            "Closed simulated codec"
        );
        Ok(())
    }
}

fn codec_specific_data(kind: TrackKind) -> Vec<u8> {
    match kind {
        TrackKind::Video => vec![0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x28],
        TrackKind::Audio => vec![0x12, 0x10],
    }
}

/// Encoded payload size for the `index`th output at the target bitrate.
fn encoded_size(format: &MediaFormat, kind: TrackKind, index: u64) -> usize {
    let bytes_per_second = format.bitrate_bps.unwrap_or(1_000_000) / 8;
    let size = match kind {
        TrackKind::Video => {
            let fps = u64::from(format.frame_rate.unwrap_or(30)).max(1);
            let average = bytes_per_second / fps;
            if index % (fps * 2) == 0 { average * 3 } else { average }
        }
        TrackKind::Audio => {
            let rate = u64::from(format.sample_rate.unwrap_or(44_100)).max(1);
            bytes_per_second * AUDIO_FRAME_SAMPLES / rate
        }
    };
    size.clamp(1, MAX_ENCODED_BYTES) as usize
}
